//! Device construction
//!
//! The orchestrator builds its devices through a `DeviceFactory`, so the same experiment can run
//! on the lab hardware or on the simulated rig.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::info;

use crate::can_bus::{self, CanError, CanInterface};
use crate::ft_sensor::{self, DaqError, SerialDaq, VoltageSource};
use crate::gauge::{self, GaugeError, TensionGauge};
use crate::params::ExpParams;
use crate::pretension::Direction;
use crate::sim::{GaugeModel, SimConfig, SimRig};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Stiffness of the simulated cables.
///
/// Units: Newtons/radian
const SIM_CABLE_STIFFNESS: f64 = 20.0;

/// CAN ids given to simulated motors which only exist to load the gauges.
const SIM_SPARE_MOTOR_IDS: [u8; 2] = [1, 2];

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Opens the links to the devices.
pub trait DeviceFactory {
    fn can_interface(&mut self, params: &can_bus::Params)
        -> Result<Box<dyn CanInterface>, CanError>;

    /// Open the gauge at `index` of the configured ports.
    fn gauge(&mut self, index: usize, port: &str, params: &gauge::Params)
        -> Result<TensionGauge, GaugeError>;

    fn voltage_source(&mut self, params: &ft_sensor::Params)
        -> Result<Box<dyn VoltageSource>, DaqError>;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Opens the lab hardware.
#[derive(Default)]
pub struct HardwareFactory;

/// Opens devices of a simulated rig.
pub struct SimFactory {
    rig: SimRig
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl DeviceFactory for HardwareFactory {
    #[cfg(target_os = "linux")]
    fn can_interface(&mut self, params: &can_bus::Params)
        -> Result<Box<dyn CanInterface>, CanError>
    {
        let iface = can_bus::SocketCanInterface::open(&params.interface)?;
        info!("CAN interface {} open", params.interface);
        Ok(Box::new(iface))
    }

    #[cfg(not(target_os = "linux"))]
    fn can_interface(&mut self, params: &can_bus::Params)
        -> Result<Box<dyn CanInterface>, CanError>
    {
        Err(CanError::InterfaceOpen(
            params.interface.clone(),
            std::io::Error::new(std::io::ErrorKind::Other, "SocketCAN needs Linux")
        ))
    }

    fn gauge(&mut self, index: usize, port: &str, params: &gauge::Params)
        -> Result<TensionGauge, GaugeError>
    {
        TensionGauge::open(&gauge_tag(index), port, params)
    }

    fn voltage_source(&mut self, params: &ft_sensor::Params)
        -> Result<Box<dyn VoltageSource>, DaqError>
    {
        Ok(Box::new(SerialDaq::open(params)?))
    }
}

impl SimFactory {
    pub fn new(rig: SimRig) -> Self {
        Self {
            rig
        }
    }

    /// Build a rig matching the parameters: one motor per configured motor at rest at zero, and
    /// a linear cable on each configured gauge, reporting load as negative.
    ///
    /// Gauges without a configured motor are loaded by a spare simulated motor.
    pub fn from_params(params: &ExpParams, config: SimConfig) -> Self {
        let rig = SimRig::new(config);

        let motors = [params.motor1.as_ref(), params.motor2.as_ref()];
        let mut ids = SIM_SPARE_MOTOR_IDS;
        let mut directions = [sim_direction(Direction::Auto, 0), sim_direction(Direction::Auto, 1)];

        for (i, m) in motors.iter().enumerate() {
            if let Some(m) = m {
                ids[i] = m.id;
                directions[i] = sim_direction(m.direction, i);
            }
        }

        for id in ids.iter() {
            rig.add_motor(*id, 0.0);
        }

        let num_gauges = params.gauges.as_ref().map(|g| g.ports.len()).unwrap_or(0);
        for i in 0..num_gauges.min(ids.len()) {
            rig.add_gauge(GaugeModel {
                reported_sign: -1.0,
                ..GaugeModel::linear(ids[i], SIM_CABLE_STIFFNESS, directions[i])
            });
        }

        info!(
            "Simulated rig: motors {:?}, {} gauges at {} N/rad",
            ids, num_gauges.min(ids.len()), SIM_CABLE_STIFFNESS
        );

        Self::new(rig)
    }

    pub fn rig(&self) -> &SimRig {
        &self.rig
    }
}

impl DeviceFactory for SimFactory {
    fn can_interface(&mut self, _params: &can_bus::Params)
        -> Result<Box<dyn CanInterface>, CanError>
    {
        Ok(Box::new(self.rig.can()))
    }

    fn gauge(&mut self, index: usize, port: &str, params: &gauge::Params)
        -> Result<TensionGauge, GaugeError>
    {
        if self.rig.gauge_force(index).is_none() {
            return Err(GaugeError::OpenError(
                String::from(port),
                serialport::Error::new(serialport::ErrorKind::NoDevice, "no simulated gauge")
            ))
        }

        Ok(TensionGauge::with_port(
            &gauge_tag(index), port, Box::new(self.rig.gauge_port(index)), params
        ))
    }

    fn voltage_source(&mut self, params: &ft_sensor::Params)
        -> Result<Box<dyn VoltageSource>, DaqError>
    {
        Ok(Box::new(self.rig.daq(params.rate_hz)))
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Log tag of the gauge at `index`.
pub fn gauge_tag(index: usize) -> String {
    format!("gauge{}", index + 1)
}

/// Log tag of the motor on cable `index`.
pub fn motor_tag(index: usize) -> String {
    format!("motor{}", index + 1)
}

/// Sign used by the simulated rig for a motor's tightening direction, antagonistic when `auto`.
pub fn sim_direction(direction: Direction, index: usize) -> f64 {
    direction.sign().unwrap_or(if index == 0 { 1.0 } else { -1.0 })
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sim_factory() {
        let params: ExpParams = util::params::from_str(r#"
            duration_s = 1.0
            [gauges]
            ports = ["sim0", "sim1", "sim2"]
            [ati]
            channels = "Dev1/ai0:5"
            rate_hz = 100.0
        "#).unwrap();

        let mut factory = SimFactory::from_params(&params, SimConfig::instant());
        let gauge_params = params.gauges.clone().unwrap();

        // Spare motors load the two gauges, the third has no cable
        assert!(factory.rig().motor(1).is_some());
        let mut g = factory.gauge(0, "sim0", &gauge_params).unwrap();
        assert_eq!(g.tag(), "gauge1");
        assert_eq!(g.read_tension(), 0.0);
        assert!(factory.gauge(2, "sim2", &gauge_params).is_err());

        let mut daq = factory.voltage_source(&params.ati.unwrap()).unwrap();
        assert!(daq.read_sample().is_ok());
    }
}
