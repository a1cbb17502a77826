//! # Simulated Rig
//!
//! Stand-ins for the lab hardware, used for dry runs (`--sim`) and by the tests. The rig holds
//! virtual CyberGear motors and tension gauges whose force depends on the angle of their motor,
//! so the pretensioner and trajectory executor can be run closed loop without hardware.
//!
//! Every handle given out (CAN interface, gauge port, DAQ) shares the one rig state.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use byteorder::{ByteOrder, LittleEndian};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use comms_if::eqpt::cybergear::{
    CmdMode, Frame, Param, RunMode, Telemetry, HOST_ID, POSITION, PAYLOAD_LEN
};

use crate::can_bus::{CanError, CanInterface};
use crate::ft_sensor::{DaqError, VoltageSource, NUM_CHANNELS};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Behaviour of the simulated hardware.
#[derive(Debug, Clone, Copy)]
pub struct SimConfig {
    /// Move motors at their speed limit rather than jumping straight to the target.
    pub slew: bool,

    /// Delay between a gauge probe and its reply.
    pub gauge_latency: Duration,

    /// Pace DAQ samples on the sample clock rather than returning them immediately.
    pub daq_paced: bool,

    /// Idle voltage on every DAQ channel.
    ///
    /// Units: volts
    pub daq_offset_v: f64
}

/// A shared handle to the simulated rig.
#[derive(Clone)]
pub struct SimRig {
    config: SimConfig,

    state: Arc<Mutex<RigState>>
}

/// State of a simulated motor.
#[derive(Debug, Clone)]
pub struct SimMotor {
    pub id: u8,

    /// Units: radians
    pub angle_rad: f64,

    /// Units: radians
    pub target_rad: f64,

    /// Units: radians/second
    pub speed_limit_rads: f64,

    /// Units: radians/second
    pub velocity_rads: f64,

    pub run_mode: Option<RunMode>,

    pub enabled: bool,

    /// A silent motor never replies
    pub silent: bool,

    updated: Instant
}

/// A gauge whose force is linear in the angle of one motor once its cable is taut.
#[derive(Debug, Clone)]
pub struct GaugeModel {
    pub motor_id: u8,

    /// Units: Newtons/radian
    pub gain_n_per_rad: f64,

    /// +1 if the cable tightens as the motor angle increases, -1 if it tightens as it decreases.
    pub tension_direction: f64,

    /// Angle at which the cable becomes taut. `None` takes the motor's angle when the gauge is
    /// added.
    ///
    /// Units: radians
    pub zero_rad: Option<f64>,

    /// Sign of the reported value, -1 for gauges which report load as negative.
    pub reported_sign: f64,

    /// A silent gauge never replies
    pub silent: bool
}

/// CAN interface onto the rig's motors.
pub struct SimCan {
    rig: SimRig,

    inbound: VecDeque<Frame>
}

/// Serial port onto one of the rig's gauges.
pub struct SimGaugePort {
    rig: SimRig,

    index: usize,

    pending: VecDeque<u8>
}

/// DAQ producing a slow sinusoid on every channel around the idle voltage.
pub struct SimDaq {
    rig: SimRig,

    rate_hz: f64,

    start: Instant,

    sample: u64
}

struct RigState {
    motors: Vec<SimMotor>,

    gauges: Vec<GaugeModel>
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SimConfig {
    /// Motors move instantly, gauges and DAQ reply immediately.
    pub fn instant() -> Self {
        Self {
            slew: false,
            gauge_latency: Duration::from_secs(0),
            daq_paced: false,
            daq_offset_v: 0.05
        }
    }

    /// Motors slew at their speed limit, gauges take a couple of milliseconds to reply and the
    /// DAQ runs on its sample clock.
    pub fn realistic() -> Self {
        Self {
            slew: true,
            gauge_latency: Duration::from_millis(2),
            daq_paced: true,
            daq_offset_v: 0.05
        }
    }
}

impl SimRig {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(RigState {
                motors: Vec::new(),
                gauges: Vec::new()
            }))
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Add a disabled motor at rest at the given angle.
    pub fn add_motor(&self, id: u8, angle_rad: f64) {
        self.lock().motors.push(SimMotor {
            id,
            angle_rad,
            target_rad: angle_rad,
            speed_limit_rads: 0.0,
            velocity_rads: 0.0,
            run_mode: None,
            enabled: false,
            silent: false,
            updated: Instant::now()
        });
    }

    /// Add a gauge, returning its index.
    pub fn add_gauge(&self, mut model: GaugeModel) -> usize {
        let mut state = self.lock();

        if model.zero_rad.is_none() {
            model.zero_rad = state.motors.iter()
                .find(|m| m.id == model.motor_id)
                .map(|m| m.angle_rad);
        }

        state.gauges.push(model);
        state.gauges.len() - 1
    }

    /// Stop (or restart) a motor answering on the bus.
    pub fn set_silent(&self, id: u8, silent: bool) {
        if let Some(m) = self.lock().motors.iter_mut().find(|m| m.id == id) {
            m.silent = silent;
        }
    }

    /// Stop (or restart) a gauge answering its probes.
    pub fn set_gauge_silent(&self, index: usize, silent: bool) {
        if let Some(g) = self.lock().gauges.get_mut(index) {
            g.silent = silent;
        }
    }

    /// Snapshot of a motor's state.
    pub fn motor(&self, id: u8) -> Option<SimMotor> {
        let slew = self.config.slew;
        let mut state = self.lock();
        state.motors.iter_mut()
            .find(|m| m.id == id)
            .map(|m| {
                m.advance(slew);
                m.clone()
            })
    }

    /// Force currently measured by a gauge, in its reported sign.
    ///
    /// Units: Newtons
    pub fn gauge_force(&self, index: usize) -> Option<f64> {
        let slew = self.config.slew;
        let mut state = self.lock();
        let model = state.gauges.get(index)?.clone();
        let motor = state.motors.iter_mut().find(|m| m.id == model.motor_id)?;

        motor.advance(slew);
        Some(model.force(motor.angle_rad))
    }

    pub fn can(&self) -> SimCan {
        SimCan {
            rig: self.clone(),
            inbound: VecDeque::new()
        }
    }

    pub fn gauge_port(&self, index: usize) -> SimGaugePort {
        SimGaugePort {
            rig: self.clone(),
            index,
            pending: VecDeque::new()
        }
    }

    pub fn daq(&self, rate_hz: f64) -> SimDaq {
        SimDaq {
            rig: self.clone(),
            rate_hz,
            start: Instant::now(),
            sample: 0
        }
    }

    /// Build a cable rig on the first two motors and gauges.
    #[cfg(test)]
    pub fn cable_rig(&self) -> crate::cable_rig::CableRig {
        use crate::{can_bus, gauge, motor, pretension::Direction};

        let (ids, num_gauges) = {
            let state = self.lock();
            let ids: Vec<u8> = state.motors.iter().map(|m| m.id).collect();
            (ids, state.gauges.len())
        };

        let motor = |i: usize, direction| motor::Motor::new(
            &format!("motor{}", i + 1),
            motor::Params {
                id: ids[i],
                axis: Default::default(),
                speed_limit_rads: 6.0,
                direction,
                trajectory: Default::default(),
                status_retries: 1,
                status_retry_delay_ms: 0
            }
        );
        let gauge = |i: usize| match i < num_gauges {
            true => Some(gauge::TensionGauge::with_port(
                &format!("gauge{}", i + 1),
                "sim",
                Box::new(self.gauge_port(i)),
                &gauge::Params::default()
            )),
            false => None
        };

        crate::cable_rig::CableRig::new(
            can_bus::CanBus::new(Box::new(self.can()), can_bus::Params::default()),
            [motor(0, Direction::Positive), motor(1, Direction::Negative)],
            [gauge(0), gauge(1)]
        )
    }

    // ---- PRIVATE ----

    fn lock(&self) -> MutexGuard<'_, RigState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner()
        }
    }

    /// Apply a frame to the addressed motor, returning its telemetry reply if it answers.
    fn handle_frame(&self, frame: &Frame) -> Option<Frame> {
        let slew = self.config.slew;
        let mut state = self.lock();
        let motor = state.motors.iter_mut().find(|m| m.id == frame.id.motor_id)?;

        motor.advance(slew);

        let reply_to = match CmdMode::from_u8(frame.id.cmd) {
            Some(CmdMode::Enable) => {
                motor.enabled = true;
                frame.id.aux as u8
            },
            Some(CmdMode::Stop) => {
                motor.enabled = false;
                motor.target_rad = motor.angle_rad;
                frame.id.aux as u8
            },
            Some(CmdMode::SetMechanicalZero) => {
                motor.angle_rad = 0.0;
                motor.target_rad = 0.0;
                frame.id.aux as u8
            },
            Some(CmdMode::ParamWrite) => {
                motor.write_param(&frame.data);
                frame.id.aux as u8
            },
            Some(CmdMode::MotionControl) => {
                if motor.enabled && motor.run_mode == Some(RunMode::Control) {
                    let raw = ((frame.data[0] as u16) << 8) | frame.data[1] as u16;
                    motor.target_rad = POSITION.decode(raw);
                }
                HOST_ID
            },
            _ => frame.id.aux as u8
        };

        if motor.silent {
            return None
        }

        // Instant motors have already arrived
        motor.advance(slew);

        Some(Telemetry {
            motor_id: motor.id,
            position_rad: motor.angle_rad,
            velocity_rads: motor.velocity_rads,
            torque_nm: 0.0,
            temperature_c: 31.5,
            faults: 0
        }.to_frame(reply_to))
    }
}

impl SimMotor {
    /// Move towards the target for the time since the last update.
    fn advance(&mut self, slew: bool) {
        let now = Instant::now();
        let dt = now.duration_since(self.updated).as_secs_f64();
        self.updated = now;

        let moving = self.enabled
            && matches!(self.run_mode, Some(RunMode::Position) | Some(RunMode::Control));
        if !moving {
            self.velocity_rads = 0.0;
            return
        }

        let error = self.target_rad - self.angle_rad;
        if !slew {
            self.angle_rad = self.target_rad;
            self.velocity_rads = 0.0;
            return
        }

        let max_step = self.speed_limit_rads.abs() * dt;
        if error.abs() <= max_step {
            self.angle_rad = self.target_rad;
            self.velocity_rads = 0.0;
        }
        else {
            self.angle_rad += max_step * error.signum();
            self.velocity_rads = self.speed_limit_rads.abs() * error.signum();
        }
    }

    /// Apply a single parameter write payload.
    fn write_param(&mut self, data: &[u8; PAYLOAD_LEN]) {
        let index = LittleEndian::read_u16(&data[0..2]);
        let value = LittleEndian::read_f32(&data[4..8]) as f64;

        if index == Param::RunMode.index() {
            self.run_mode = RunMode::from_u8(data[4]);
        }
        else if index == Param::LimitSpd.index() {
            self.speed_limit_rads = value;
        }
        else if index == Param::LocRef.index() {
            if self.run_mode == Some(RunMode::Position) {
                self.target_rad = value;
            }
        }
    }
}

impl GaugeModel {
    /// A gauge on the given motor with a linear force past the motor's current angle, reporting
    /// load as positive.
    pub fn linear(motor_id: u8, gain_n_per_rad: f64, tension_direction: f64) -> Self {
        Self {
            motor_id,
            gain_n_per_rad,
            tension_direction,
            zero_rad: None,
            reported_sign: 1.0,
            silent: false
        }
    }

    /// Force reported at the given motor angle.
    ///
    /// Units: Newtons
    pub fn force(&self, angle_rad: f64) -> f64 {
        let stretch = self.tension_direction * (angle_rad - self.zero_rad.unwrap_or(0.0));
        self.reported_sign * self.gain_n_per_rad * stretch.max(0.0)
    }
}

impl CanInterface for SimCan {
    fn write_frame(&mut self, frame: &Frame, _timeout: Duration) -> Result<(), CanError> {
        if let Some(reply) = self.rig.handle_frame(frame) {
            self.inbound.push_back(reply);
        }
        Ok(())
    }

    fn read_frame(&mut self, _timeout: Duration) -> Result<Option<Frame>, CanError> {
        Ok(self.inbound.pop_front())
    }
}

impl Write for SimGaugePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let silent = {
            let state = self.rig.lock();
            state.gauges.get(self.index).map_or(true, |g| g.silent)
        };

        if !silent {
            let latency = self.rig.config.gauge_latency;
            if latency > Duration::from_secs(0) {
                thread::sleep(latency);
            }
            if let Some(force) = self.rig.gauge_force(self.index) {
                self.pending.extend(format!("{:.3} N\r\n", force).bytes());
            }
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for SimGaugePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no reply"))
        }

        let mut n = 0;
        while n < buf.len() {
            match self.pending.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                },
                None => break
            }
        }
        Ok(n)
    }
}

impl VoltageSource for SimDaq {
    fn read_sample(&mut self) -> Result<[f64; NUM_CHANNELS], DaqError> {
        let t = self.sample as f64 / self.rate_hz;
        self.sample += 1;

        if self.rig.config.daq_paced {
            let due = Duration::from_secs_f64(t);
            if let Some(wait) = due.checked_sub(self.start.elapsed()) {
                thread::sleep(wait);
            }
        }

        let mut v = [0f64; NUM_CHANNELS];
        for (i, c) in v.iter_mut().enumerate() {
            let phase = i as f64 * std::f64::consts::FRAC_PI_3;
            *c = self.rig.config.daq_offset_v
                + 0.01 * (2.0 * std::f64::consts::PI * 0.5 * t + phase).sin();
        }
        Ok(v)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::eqpt::cybergear::ParamValue;

    #[test]
    fn test_motor_follows_commands() {
        let rig = SimRig::new(SimConfig::instant());
        rig.add_motor(3, 0.0);
        let mut can = rig.can();
        let t = Duration::from_millis(1);

        // Targets are ignored until in position mode
        can.write_frame(&Frame::param_write(
            3, HOST_ID, Param::LocRef, ParamValue::F32(1.0)
        ).unwrap(), t).unwrap();
        assert_eq!(rig.motor(3).unwrap().target_rad, 0.0);

        for frame in [
            Frame::param_write(3, HOST_ID, Param::RunMode, ParamValue::U8(1)).unwrap(),
            Frame::enable(3, HOST_ID),
            Frame::param_write(3, HOST_ID, Param::LimitSpd, ParamValue::F32(2.0)).unwrap(),
            Frame::param_write(3, HOST_ID, Param::LocRef, ParamValue::F32(-0.5)).unwrap()
        ].iter() {
            can.write_frame(frame, t).unwrap();
        }

        let m = rig.motor(3).unwrap();
        assert!(m.enabled);
        assert_eq!(m.run_mode, Some(RunMode::Position));
        assert_eq!(m.angle_rad, -0.5);

        // One reply per frame, addressed to the host
        let mut replies = 0;
        while let Some(f) = can.read_frame(t).unwrap() {
            assert_eq!(f.id.motor_id, HOST_ID);
            assert_eq!(f.id.source_motor(), 3);
            replies += 1;
        }
        assert_eq!(replies, 5);

        // Frames for unknown motors are not answered
        can.write_frame(&Frame::enable(9, HOST_ID), t).unwrap();
        assert!(can.read_frame(t).unwrap().is_none());
    }

    #[test]
    fn test_slewed_motor() {
        let rig = SimRig::new(SimConfig::realistic());
        rig.add_motor(1, 0.0);
        let mut can = rig.can();
        let t = Duration::from_millis(1);

        for frame in [
            Frame::param_write(1, HOST_ID, Param::RunMode, ParamValue::U8(1)).unwrap(),
            Frame::enable(1, HOST_ID),
            Frame::param_write(1, HOST_ID, Param::LimitSpd, ParamValue::F32(1.0)).unwrap(),
            Frame::param_write(1, HOST_ID, Param::LocRef, ParamValue::F32(10.0)).unwrap()
        ].iter() {
            can.write_frame(frame, t).unwrap();
        }

        thread::sleep(Duration::from_millis(100));
        let m = rig.motor(1).unwrap();
        assert!(m.angle_rad > 0.05 && m.angle_rad < 0.5, "{}", m.angle_rad);
        assert_eq!(m.velocity_rads, 1.0);
    }

    #[test]
    fn test_gauge_port() {
        let rig = SimRig::new(SimConfig::instant());
        rig.add_motor(2, 1.0);
        let g = rig.add_gauge(GaugeModel {
            reported_sign: -1.0,
            ..GaugeModel::linear(2, 4.0, -1.0)
        });

        // Slack cable
        assert_eq!(rig.gauge_force(g), Some(-0.0));

        {
            let mut state = rig.lock();
            state.motors[0].angle_rad = 0.5;
        }
        assert_eq!(rig.gauge_force(g), Some(-2.0));

        let mut port = rig.gauge_port(g);
        port.write_all(b"?C\r\n").unwrap();
        let mut reply = [0u8; 64];
        let n = port.read(&mut reply).unwrap();
        assert_eq!(&reply[..n], b"-2.000 N\r\n");

        rig.set_gauge_silent(g, true);
        port.write_all(b"?C\r\n").unwrap();
        let mut buf = [0u8; 1];
        assert!(port.read(&mut buf).is_err());
    }

    #[test]
    fn test_daq_is_around_offset() {
        let rig = SimRig::new(SimConfig::instant());
        let mut daq = rig.daq(1000.0);

        for _ in 0..100 {
            let v = daq.read_sample().unwrap();
            assert!(v.iter().all(|c| (c - 0.05).abs() <= 0.01 + 1e-12));
        }
    }
}
