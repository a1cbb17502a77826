//! # Experiment parameters
//!
//! Aggregate of every device's parameters, loaded from one TOML file. A device whose table is
//! absent is disabled for the experiment.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// Internal
use crate::{can_bus, ft_sensor, gauge, mocap_client, motor, pretension};
use crate::cable_rig::NUM_CABLES;
use crate::traj::executor::RatePolicy;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Longest experiment accepted.
///
/// Units: seconds
pub const MAX_DURATION_S: f64 = 86_400.0;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExpParams {
    /// Nominal length of the experiment, every worker stops after it.
    ///
    /// Units: seconds
    pub duration_s: f64,

    /// Directory the experiment directory is created in.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Devices without which the experiment must not run.
    #[serde(default)]
    pub required_devices: Vec<DeviceId>,

    pub ati: Option<ft_sensor::Params>,

    pub gauges: Option<gauge::Params>,

    pub can: Option<can_bus::Params>,

    pub motor1: Option<motor::Params>,

    pub motor2: Option<motor::Params>,

    /// Rate of the trajectory loop.
    ///
    /// Units: Hertz
    #[serde(default = "default_motors_frequency_hz")]
    pub motors_frequency_hz: f64,

    #[serde(default)]
    pub rate_policy: RatePolicy,

    #[serde(default)]
    pub pretension: pretension::Params,

    pub mocap: Option<mocap_client::Params>
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The devices of the rig, as far as enabling and requiring them goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceId {
    /// Both motors and the CAN bus they share
    Motors,
    Gauges,
    Ati,
    Mocap
}

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("Expected a positive {0}, found {1}")]
    NotPositive(&'static str, f64),

    #[error("Experiment lasts {0} s, longer than a day")]
    TooLong(f64),

    #[error("Expected {0} to be zero or more, found {1}")]
    Negative(&'static str, f64),

    #[error("Motors 1 and 2 both have CAN id {0}")]
    DuplicateMotorId(u8),

    #[error("Motors need the [can] table")]
    MissingCan,

    #[error("Only one of motor1 and motor2 is configured")]
    SingleMotor,

    #[error("Motors need a gauge on each cable, found {0} gauges")]
    TooFewGauges(usize),

    #[error("Device {0} is required but not configured")]
    RequiredNotConfigured(DeviceId),

    #[error("Invalid trajectory for {0}: {1}")]
    InvalidTrajectory(&'static str, String)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ExpParams {
    /// Determines if the parameters are valid.
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        self.duration()?;

        if let Some(ref ati) = self.ati {
            positive("ati.rate_hz", ati.rate_hz)?;
            positive("ati.buffer_margin", ati.buffer_margin)?;
        }

        if let Some(ref gauges) = self.gauges {
            positive("gauges.rate_hz", gauges.rate_hz)?;
        }

        match (&self.motor1, &self.motor2) {
            (Some(m1), Some(m2)) => {
                if m1.id == m2.id {
                    return Err(ParamsError::DuplicateMotorId(m1.id))
                }
                if self.can.is_none() {
                    return Err(ParamsError::MissingCan)
                }

                let num_gauges = self.gauges.as_ref().map(|g| g.ports.len()).unwrap_or(0);
                if num_gauges < NUM_CABLES {
                    return Err(ParamsError::TooFewGauges(num_gauges))
                }

                positive("motors_frequency_hz", self.motors_frequency_hz)?;
                positive("motor1.speed_limit_rads", m1.speed_limit_rads)?;
                positive("motor2.speed_limit_rads", m2.speed_limit_rads)?;
                m1.trajectory.validate()
                    .map_err(|e| ParamsError::InvalidTrajectory("motor1", e.to_string()))?;
                m2.trajectory.validate()
                    .map_err(|e| ParamsError::InvalidTrajectory("motor2", e.to_string()))?;

                positive("pretension.target_tension_n", self.pretension.target_tension_n)?;
                positive("pretension.step_rad", self.pretension.step_rad)?;
                positive("pretension.tolerance_n", self.pretension.tolerance_n)?;
                positive("pretension.speed_limit_rads", self.pretension.speed_limit_rads)?;
                if !(self.pretension.wait_s >= 0.0 && self.pretension.wait_s.is_finite()) {
                    return Err(ParamsError::Negative("pretension.wait_s", self.pretension.wait_s))
                }
            },
            (None, None) => (),
            _ => return Err(ParamsError::SingleMotor)
        }

        for d in self.required_devices.iter() {
            if !self.is_configured(*d) {
                return Err(ParamsError::RequiredNotConfigured(*d))
            }
        }

        Ok(())
    }

    /// The experiment duration, if it is positive and no longer than [`MAX_DURATION_S`].
    pub fn duration(&self) -> Result<Duration, ParamsError> {
        positive("duration_s", self.duration_s)?;
        if self.duration_s > MAX_DURATION_S {
            return Err(ParamsError::TooLong(self.duration_s))
        }
        Ok(Duration::from_secs_f64(self.duration_s))
    }

    /// True if the parameters have a table for the device.
    pub fn is_configured(&self, device: DeviceId) -> bool {
        match device {
            DeviceId::Motors => self.motor1.is_some() && self.motor2.is_some(),
            DeviceId::Gauges => self.gauges.as_ref().map(|g| !g.ports.is_empty()).unwrap_or(false),
            DeviceId::Ati => self.ati.is_some(),
            DeviceId::Mocap => self.mocap.is_some()
        }
    }

    pub fn is_required(&self, device: DeviceId) -> bool {
        self.required_devices.contains(&device)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceId::Motors => "motors",
            DeviceId::Gauges => "gauges",
            DeviceId::Ati => "ati",
            DeviceId::Mocap => "mocap"
        };
        f.pad(s)
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn positive(name: &'static str, value: f64) -> Result<(), ParamsError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    }
    else {
        Err(ParamsError::NotPositive(name, value))
    }
}

fn default_output_dir() -> String { String::from("experiments") }
fn default_motors_frequency_hz() -> f64 { 100.0 }

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::traj::TrajectorySpec;

    const FULL: &str = r#"
        duration_s = 3.0
        required_devices = ["motors", "gauges"]
        motors_frequency_hz = 60.0
        rate_policy = "free_run"

        [ati]
        channels = "Dev1/ai0:5"
        rate_hz = 1000.0

        [gauges]
        ports = ["/dev/ttyUSB0", "/dev/ttyUSB1"]
        sign = "negated"

        [can]
        interface = "can0"

        [motor1]
        id = 127
        direction = 1
        trajectory = { type = "sine", amplitude_deg = 5.0, frequency_hz = 0.5, start_delay_s = 1.0 }

        [motor2]
        id = 126
        direction = "auto"
        trajectory = { type = "ramp", axis = "y", max_deg = 0.0, duration_s = 1.0 }

        [pretension]
        target_tension_N = 2.0

        [mocap]
        host = "192.168.1.10"
        port = 8080
    "#;

    #[test]
    fn test_load_full() {
        let p: ExpParams = util::params::from_str(FULL).unwrap();
        p.are_valid().unwrap();

        assert_eq!(p.output_dir, "experiments");
        assert_eq!(p.rate_policy, RatePolicy::FreeRun);
        assert_eq!(p.pretension.target_tension_n, 2.0);
        assert_eq!(p.pretension.step_rad, 0.01);
        assert_eq!(p.gauges.as_ref().unwrap().sign, gauge::TensionSign::Negated);
        assert_eq!(p.motor2.as_ref().unwrap().direction, pretension::Direction::Auto);
        assert!(matches!(
            p.motor1.as_ref().unwrap().trajectory,
            TrajectorySpec::Sine { .. }
        ));

        for d in [DeviceId::Motors, DeviceId::Gauges, DeviceId::Ati, DeviceId::Mocap].iter() {
            assert!(p.is_configured(*d), "{} not configured", d);
        }
        assert!(p.is_required(DeviceId::Motors));
        assert!(!p.is_required(DeviceId::Mocap));
    }

    #[test]
    fn test_trivial_ramps() {
        // Both motors hold their home angle through a ramp to zero without a duration
        let p: ExpParams = util::params::from_str(r#"
            duration_s = 1.0

            [gauges]
            ports = ["/dev/ttyUSB0", "/dev/ttyUSB1"]

            [can]
            interface = "can0"

            [motor1]
            id = 127
            direction = 1
            trajectory = { type = "ramp", axis = "y", max_deg = 0.0 }

            [motor2]
            id = 126
            direction = -1
            trajectory = { type = "ramp", axis = "y", max_deg = 0.0 }
        "#).unwrap();
        p.are_valid().unwrap();

        for m in [p.motor1.as_ref().unwrap(), p.motor2.as_ref().unwrap()].iter() {
            assert_eq!(m.trajectory, TrajectorySpec::Ramp {
                axis: crate::traj::Axis::Y,
                target_deg: 0.0,
                duration_s: None
            });
        }
        assert_eq!(p.duration().unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn test_invalid() {
        let mut p: ExpParams = util::params::from_str(FULL).unwrap();
        p.motor2.as_mut().unwrap().id = 127;
        assert!(matches!(p.are_valid(), Err(ParamsError::DuplicateMotorId(127))));

        let mut p: ExpParams = util::params::from_str(FULL).unwrap();
        p.gauges.as_mut().unwrap().ports.pop();
        assert!(matches!(p.are_valid(), Err(ParamsError::TooFewGauges(1))));

        let mut p: ExpParams = util::params::from_str(FULL).unwrap();
        p.motor2 = None;
        assert!(matches!(p.are_valid(), Err(ParamsError::SingleMotor)));

        let mut p: ExpParams = util::params::from_str(FULL).unwrap();
        p.duration_s = 0.0;
        assert!(matches!(p.are_valid(), Err(ParamsError::NotPositive("duration_s", _))));
        p.duration_s = std::f64::NAN;
        assert!(matches!(p.are_valid(), Err(ParamsError::NotPositive("duration_s", _))));
        p.duration_s = std::f64::INFINITY;
        assert!(p.duration().is_err());
        p.duration_s = 1e20;
        assert!(matches!(p.are_valid(), Err(ParamsError::TooLong(_))));

        let mut p: ExpParams = util::params::from_str(FULL).unwrap();
        p.pretension.target_tension_n = 0.0;
        assert!(matches!(
            p.are_valid(),
            Err(ParamsError::NotPositive("pretension.target_tension_n", _))
        ));

        let mut p: ExpParams = util::params::from_str(FULL).unwrap();
        p.pretension.wait_s = -0.1;
        assert!(matches!(p.are_valid(), Err(ParamsError::Negative("pretension.wait_s", _))));

        // Only the mocap server
        let p: ExpParams = util::params::from_str(r#"
            duration_s = 1.0
            required_devices = ["ati"]
            [mocap]
            host = "localhost"
            port = 8080
        "#).unwrap();
        assert!(matches!(p.are_valid(), Err(ParamsError::RequiredNotConfigured(DeviceId::Ati))));
    }
}
