//! Implementations for the Motor state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, info, warn};
use std::thread;
use comms_if::eqpt::cybergear::{Frame, MotionCommand, Param, ParamValue, RunMode, Telemetry};

// Internal
use super::{describe, MotorError, MotorStatus, Params, PowerState};
use crate::can_bus::CanBus;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Driver state for a single motor.
#[derive(Debug, Clone)]
pub struct Motor {
    tag: String,

    params: Params,

    power: PowerState,

    run_mode: Option<RunMode>,

    last_cmd_rad: Option<f64>,

    last_status: Option<MotorStatus>,

    home_rad: Option<f64>
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Motor {
    /// Create the driver for a motor. No traffic is sent until the first command.
    pub fn new(tag: &str, params: Params) -> Self {
        Self {
            tag: String::from(tag),
            params,
            power: PowerState::Uninit,
            run_mode: None,
            last_cmd_rad: None,
            last_status: None,
            home_rad: None
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn id(&self) -> u8 {
        self.params.id
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn power(&self) -> PowerState {
        self.power
    }

    pub fn run_mode(&self) -> Option<RunMode> {
        self.run_mode
    }

    /// Last angle commanded in position mode.
    pub fn last_cmd_rad(&self) -> Option<f64> {
        self.last_cmd_rad
    }

    /// Last status received from the controller, from any exchange.
    pub fn last_status(&self) -> Option<MotorStatus> {
        self.last_status
    }

    /// Home angle recorded at the end of pretensioning.
    pub fn home_rad(&self) -> Option<f64> {
        self.home_rad
    }

    /// Record the home angle. This can only be done once per experiment.
    pub fn set_home(&mut self, angle_rad: f64) -> Result<(), MotorError> {
        if let Some(h) = self.home_rad {
            return Err(MotorError::HomeAlreadySet(h))
        }
        if !angle_rad.is_finite() {
            return Err(MotorError::NonFinite(angle_rad))
        }

        info!("[{}] Home angle recorded as {:.4} rad", self.tag, angle_rad);
        self.home_rad = Some(angle_rad);
        Ok(())
    }

    /// Enable the motor. Legal once the motor has been disabled at least once.
    pub fn enable(&mut self, bus: &mut CanBus) -> Result<MotorStatus, MotorError> {
        if self.power == PowerState::Uninit {
            return Err(self.wrong_mode("disabled"))
        }

        let status = self.exchange(bus, &Frame::enable(self.id(), bus.host_id()))?;
        self.power = PowerState::Enabled;
        debug!("[{}] Enabled", self.tag);

        Ok(status)
    }

    /// Disable (stop) the motor. Legal in every state, this is how a motor leaves `Uninit`.
    pub fn disable(&mut self, bus: &mut CanBus) -> Result<MotorStatus, MotorError> {
        let status = self.exchange(bus, &Frame::stop(self.id(), bus.host_id(), false))?;
        self.power = PowerState::Disabled;
        debug!("[{}] Disabled", self.tag);

        Ok(status)
    }

    /// Change the controller's run mode. Legal whether the motor is enabled or disabled.
    pub fn set_run_mode(
        &mut self,
        bus: &mut CanBus,
        mode: RunMode
    ) -> Result<MotorStatus, MotorError> {
        if self.power == PowerState::Uninit {
            return Err(self.wrong_mode("disabled or enabled"))
        }

        let frame = Frame::param_write(
            self.id(), bus.host_id(), Param::RunMode, ParamValue::U8(mode as u8)
        )?;
        let status = self.exchange(bus, &frame)?;

        self.run_mode = Some(mode);
        debug!("[{}] Run mode set to {}", self.tag, mode);

        Ok(status)
    }

    /// Move to an absolute angle in position mode with the given speed limit.
    pub fn set_position_target(
        &mut self,
        bus: &mut CanBus,
        speed_limit_rads: f64,
        angle_rad: f64
    ) -> Result<MotorStatus, MotorError> {
        self.require(RunMode::Position)?;
        check_finite(speed_limit_rads)?;
        check_finite(angle_rad)?;

        let host_id = bus.host_id();
        let limit = Frame::param_write(
            self.id(), host_id, Param::LimitSpd, ParamValue::F32(speed_limit_rads as f32)
        )?;
        let target = Frame::param_write(
            self.id(), host_id, Param::LocRef, ParamValue::F32(angle_rad as f32)
        )?;

        self.exchange(bus, &limit)?;
        let status = self.exchange(bus, &target)?;
        self.last_cmd_rad = Some(angle_rad);

        Ok(status)
    }

    /// Write a single controller parameter.
    ///
    /// The run mode must be changed through [`Motor::set_run_mode`] so that it stays tracked.
    pub fn write_param(
        &mut self,
        bus: &mut CanBus,
        param: Param,
        value: ParamValue
    ) -> Result<MotorStatus, MotorError> {
        if param == Param::RunMode {
            return match RunMode::from_u8(value.as_f64() as u8) {
                Some(m) => self.set_run_mode(bus, m),
                None => Err(MotorError::Frame(
                    comms_if::eqpt::cybergear::FrameError::ParamType(param, value)
                ))
            }
        }

        if self.power == PowerState::Uninit {
            return Err(self.wrong_mode("disabled or enabled"))
        }
        check_finite(value.as_f64())?;

        let frame = Frame::param_write(self.id(), bus.host_id(), param, value)?;
        self.exchange(bus, &frame)
    }

    /// Write a single controller parameter given by name, for example `"limit_cur"`.
    pub fn write_param_by_name(
        &mut self,
        bus: &mut CanBus,
        name: &str,
        value: f64
    ) -> Result<MotorStatus, MotorError> {
        let param = Param::from_name(name)?;
        let value = match param.is_u8() {
            true => ParamValue::U8(value as u8),
            false => ParamValue::F32(value as f32)
        };

        self.write_param(bus, param, value)
    }

    /// Read the motor's angle, velocity, torque and temperature.
    pub fn read_status(&mut self, bus: &mut CanBus) -> Result<MotorStatus, MotorError> {
        self.exchange(bus, &Frame::feedback_request(self.id(), bus.host_id()))
    }

    /// Read the status, retrying up to the configured number of times if it fails.
    pub fn read_status_with_retry(
        &mut self,
        bus: &mut CanBus
    ) -> Result<MotorStatus, MotorError> {
        let mut attempt = 0;

        loop {
            match self.read_status(bus) {
                Ok(s) => return Ok(s),
                Err(e) if attempt < self.params.status_retries => {
                    debug!("[{}] Status read failed ({}), retrying", self.tag, e);
                    attempt += 1;
                    thread::sleep(self.params.status_retry_delay());
                },
                Err(e) => return Err(e)
            }
        }
    }

    /// Send a motion control (impedance) command.
    pub fn send_motion_control(
        &mut self,
        bus: &mut CanBus,
        cmd: &MotionCommand
    ) -> Result<MotorStatus, MotorError> {
        self.require(RunMode::Control)?;
        for v in [cmd.torque_ff_nm, cmd.angle_rad, cmd.velocity_rads, cmd.kp, cmd.kd].iter() {
            check_finite(*v)?;
        }

        self.exchange(bus, &Frame::motion_control(self.id(), cmd))
    }

    /// Set the current position as the controller's mechanical zero.
    pub fn set_mechanical_zero(&mut self, bus: &mut CanBus) -> Result<MotorStatus, MotorError> {
        if self.power == PowerState::Uninit {
            return Err(self.wrong_mode("disabled or enabled"))
        }

        warn!("[{}] Setting mechanical zero", self.tag);
        self.exchange(bus, &Frame::set_mechanical_zero(self.id(), bus.host_id()))
    }

    // ---- PRIVATE ----

    /// Send a frame and wait for the motor's telemetry in reply.
    fn exchange(&mut self, bus: &mut CanBus, frame: &Frame) -> Result<MotorStatus, MotorError> {
        let tm: Telemetry = bus.request(frame, self.id())?;

        if tm.faults != 0 {
            warn!("[{}] Controller reports faults {:#08b}", self.tag, tm.faults);
        }

        let status = MotorStatus::from(tm);
        self.last_status = Some(status);
        Ok(status)
    }

    fn require(&self, mode: RunMode) -> Result<(), MotorError> {
        if self.power == PowerState::Enabled && self.run_mode == Some(mode) {
            Ok(())
        }
        else {
            Err(self.wrong_mode(&format!("enabled in {} mode", mode)))
        }
    }

    fn wrong_mode(&self, required: &str) -> MotorError {
        MotorError::WrongMode {
            required: String::from(required),
            actual: describe(self.power, self.run_mode)
        }
    }
}

fn check_finite(value: f64) -> Result<(), MotorError> {
    match value.is_finite() {
        true => Ok(()),
        false => Err(MotorError::NonFinite(value))
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::can_bus;
    use crate::pretension::Direction;
    use crate::sim::{SimConfig, SimRig};

    fn setup(silent: bool) -> (SimRig, CanBus, Motor) {
        let rig = SimRig::new(SimConfig::instant());
        rig.add_motor(1, 0.0);
        rig.set_silent(1, silent);

        let bus = CanBus::new(Box::new(rig.can()), can_bus::Params::default());
        let motor = Motor::new("motor1", Params {
            id: 1,
            axis: Default::default(),
            speed_limit_rads: 6.0,
            direction: Direction::Positive,
            trajectory: Default::default(),
            status_retries: 2,
            status_retry_delay_ms: 0
        });

        (rig, bus, motor)
    }

    #[test]
    fn test_position_mode() {
        let (rig, mut bus, mut motor) = setup(false);

        motor.disable(&mut bus).unwrap();
        motor.set_run_mode(&mut bus, RunMode::Position).unwrap();
        motor.enable(&mut bus).unwrap();
        assert_eq!(motor.power(), PowerState::Enabled);

        motor.set_position_target(&mut bus, 2.0, 1.0).unwrap();
        assert_eq!(motor.last_cmd_rad(), Some(1.0));

        let sim = rig.motor(1).unwrap();
        assert_eq!(sim.run_mode, Some(RunMode::Position));
        assert!(sim.enabled);
        assert!((sim.speed_limit_rads - 2.0).abs() < 1e-6);

        let status = motor.read_status(&mut bus).unwrap();
        assert!((status.angle_rad - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_wrong_mode_never_reaches_bus() {
        let (rig, mut bus, mut motor) = setup(false);

        // Can't enable or change mode before the first disable
        assert!(matches!(motor.enable(&mut bus), Err(MotorError::WrongMode { .. })));
        assert!(matches!(
            motor.set_run_mode(&mut bus, RunMode::Position),
            Err(MotorError::WrongMode { .. })
        ));

        motor.disable(&mut bus).unwrap();
        motor.set_run_mode(&mut bus, RunMode::Speed).unwrap();
        motor.enable(&mut bus).unwrap();
        let sent = bus.stats().frames_sent;

        assert!(matches!(
            motor.set_position_target(&mut bus, 1.0, 0.5),
            Err(MotorError::WrongMode { .. })
        ));
        assert!(matches!(
            motor.send_motion_control(&mut bus, &MotionCommand {
                torque_ff_nm: 0.0,
                angle_rad: 0.0,
                velocity_rads: 0.0,
                kp: 10.0,
                kd: 1.0
            }),
            Err(MotorError::WrongMode { .. })
        ));
        assert_eq!(bus.stats().frames_sent, sent);
        assert_eq!(rig.motor(1).unwrap().target_rad, 0.0);

        // Changing mode while enabled is always legal
        motor.set_run_mode(&mut bus, RunMode::Position).unwrap();
        assert!(matches!(
            motor.set_position_target(&mut bus, 1.0, std::f64::NAN),
            Err(MotorError::NonFinite(_))
        ));
        motor.set_position_target(&mut bus, 1.0, 0.5).unwrap();
    }

    #[test]
    fn test_write_param_by_name() {
        let (_rig, mut bus, mut motor) = setup(false);

        motor.disable(&mut bus).unwrap();
        motor.write_param_by_name(&mut bus, "limit_cur", 5.0).unwrap();
        motor.write_param_by_name(&mut bus, "run_mode", 1.0).unwrap();
        assert_eq!(motor.run_mode(), Some(RunMode::Position));

        assert!(matches!(
            motor.write_param_by_name(&mut bus, "not_a_param", 1.0),
            Err(MotorError::Frame(_))
        ));
    }

    #[test]
    fn test_home_is_write_once() {
        let (_rig, _bus, mut motor) = setup(false);

        assert_eq!(motor.home_rad(), None);
        motor.set_home(0.75).unwrap();
        assert!(matches!(motor.set_home(0.0), Err(MotorError::HomeAlreadySet(h)) if h == 0.75));
        assert_eq!(motor.home_rad(), Some(0.75));
    }

    #[test]
    fn test_status_retry_exhausted() {
        let (_rig, mut bus, mut motor) = setup(true);

        assert!(matches!(
            motor.read_status_with_retry(&mut bus),
            Err(MotorError::Bus(can_bus::CanError::NoResponse(1)))
        ));
        // One attempt plus two retries
        assert_eq!(bus.stats().frames_sent, 3);
    }
}
