//! # CyberGear Motor Controller Frames
//!
//! Encoding and decoding of the CAN frames understood by the CyberGear family of motor
//! controllers. Every frame uses a 29-bit extended arbitration ID laid out as
//! `[cmd:8][aux:16][motor_id:8]` and an eight byte payload.
//!
//! Floats leaving the host are clamped into the field's range and linearly mapped onto a 16-bit
//! unsigned integer, values coming back from the controller use the inverse map.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use util::maths::{float_to_uint, uint_to_float};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// CAN ID of the host (this computer) on the motor bus.
pub const HOST_ID: u8 = 254;

/// Length of every payload sent to a controller.
pub const PAYLOAD_LEN: usize = 8;

/// Mask for a 29-bit extended arbitration ID.
pub const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;

/// Mechanical position field.
///
/// Units: radians
pub const POSITION: FieldRange = FieldRange { min: -4.0 * PI, max: 4.0 * PI, bits: 16 };

/// Velocity field.
///
/// Units: radians/second
pub const VELOCITY: FieldRange = FieldRange { min: -30.0, max: 30.0, bits: 16 };

/// Torque field.
///
/// Units: Newton meters
pub const TORQUE: FieldRange = FieldRange { min: -12.0, max: 12.0, bits: 16 };

/// Position gain of the motion control command.
pub const KP: FieldRange = FieldRange { min: 0.0, max: 500.0, bits: 16 };

/// Velocity gain of the motion control command.
pub const KD: FieldRange = FieldRange { min: 0.0, max: 5.0, bits: 16 };

/// Value of the least significant bit of the temperature field.
///
/// Units: degrees Celsius
pub const TEMPERATURE_LSB_C: f64 = 0.1;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The range and width of a fixed point field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldRange {
    pub min: f64,
    pub max: f64,
    pub bits: u32
}

/// The decoded three field arbitration ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArbitrationId {
    /// Command mode, see [`CmdMode`].
    pub cmd: u8,

    /// Auxiliary data. Usually the host ID, for motion control the mapped feed forward torque,
    /// for telemetry the replying motor's ID and status bits.
    pub aux: u16,

    /// ID of the addressed motor, or for replies the host ID.
    pub motor_id: u8
}

/// A single frame on the motor bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub id: ArbitrationId,

    pub data: [u8; PAYLOAD_LEN],

    /// Number of valid bytes in `data`. Frames built by the host are always full length.
    pub len: usize
}

/// A decoded telemetry (feedback) frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// ID of the motor which sent the frame.
    pub motor_id: u8,

    /// Units: radians
    pub position_rad: f64,

    /// Units: radians/second
    pub velocity_rads: f64,

    /// Units: Newton meters
    pub torque_nm: f64,

    /// Units: degrees Celsius
    pub temperature_c: f64,

    /// Fault bits reported alongside the motor ID, zero when healthy.
    pub faults: u8
}

/// Parameters of a motion control (impedance) command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionCommand {
    /// Units: Newton meters
    pub torque_ff_nm: f64,

    /// Units: radians
    pub angle_rad: f64,

    /// Units: radians/second
    pub velocity_rads: f64,

    pub kp: f64,

    pub kd: f64
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Command modes carried in the top field of the arbitration ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmdMode {
    GetDeviceId = 0,
    MotionControl = 1,
    Feedback = 2,
    Enable = 3,
    Stop = 4,
    SetMechanicalZero = 6,
    SetCanId = 7,
    ParamTableWrite = 8,
    ParamRead = 17,
    ParamWrite = 18,
    FaultFeedback = 21
}

/// Controller run modes, written to the `run_mode` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Motion control (impedance) mode
    Control = 0,
    Position = 1,
    Speed = 2,
    Current = 3
}

/// Single parameters which can be written to a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Param {
    RunMode,
    IqRef,
    SpdRef,
    LimitTorque,
    CurKp,
    CurKi,
    CurFiltGain,
    LocRef,
    LimitSpd,
    LimitCur
}

/// Value of a single parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    U8(u8),
    F32(f32)
}

/// Errors in building or parsing frames.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FrameError {
    #[error("Frame payload too short, expected {expected} bytes but got {actual}")]
    ShortPayload { expected: usize, actual: usize },

    #[error("Frame is not telemetry (command mode {0})")]
    NotTelemetry(u8),

    #[error("Parameter {0:?} does not accept the value {1:?}")]
    ParamType(Param, ParamValue),

    #[error("Unknown parameter name \"{0}\"")]
    UnknownParam(String)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl FieldRange {
    /// Encode a float into this field.
    pub fn encode(&self, value: f64) -> u16 {
        float_to_uint(value, (self.min, self.max), self.bits) as u16
    }

    /// Decode this field into a float.
    pub fn decode(&self, value: u16) -> f64 {
        uint_to_float(value as u32, (self.min, self.max), self.bits)
    }

    /// Value of one least significant bit of the field.
    pub fn lsb(&self) -> f64 {
        (self.max - self.min) / util::maths::max_uint(self.bits) as f64
    }
}

impl ArbitrationId {
    pub fn new(cmd: CmdMode, aux: u16, motor_id: u8) -> Self {
        Self {
            cmd: cmd as u8,
            aux,
            motor_id
        }
    }

    /// Pack into a raw 29-bit extended ID.
    pub fn to_raw(&self) -> u32 {
        (((self.cmd as u32) << 24) | ((self.aux as u32) << 8) | self.motor_id as u32)
            & EXTENDED_ID_MASK
    }

    /// Unpack a raw extended ID.
    pub fn from_raw(raw: u32) -> Self {
        let raw = raw & EXTENDED_ID_MASK;
        Self {
            cmd: (raw >> 24) as u8,
            aux: ((raw >> 8) & 0xFFFF) as u16,
            motor_id: (raw & 0xFF) as u8
        }
    }

    pub fn cmd_mode(&self) -> Option<CmdMode> {
        CmdMode::from_u8(self.cmd)
    }

    /// True if this frame is a telemetry (feedback) frame.
    pub fn is_telemetry(&self) -> bool {
        self.cmd == CmdMode::Feedback as u8
    }

    /// For telemetry frames, the ID of the motor which sent the frame.
    pub fn source_motor(&self) -> u8 {
        (self.aux & 0xFF) as u8
    }
}

impl Frame {
    /// Build a full length frame from an ID and a (possibly short) payload, zero filling the
    /// remainder.
    pub fn new(id: ArbitrationId, payload: &[u8]) -> Self {
        let mut data = [0u8; PAYLOAD_LEN];
        let len = payload.len().min(PAYLOAD_LEN);
        data[..len].copy_from_slice(&payload[..len]);

        Self {
            id,
            data,
            len: PAYLOAD_LEN
        }
    }

    /// Build a frame as received from the bus, keeping the received length.
    pub fn from_raw(raw_id: u32, payload: &[u8]) -> Self {
        let mut frame = Self::new(ArbitrationId::from_raw(raw_id), payload);
        frame.len = payload.len().min(PAYLOAD_LEN);
        frame
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Enable (start) the motor.
    pub fn enable(motor_id: u8, host_id: u8) -> Self {
        Self::new(ArbitrationId::new(CmdMode::Enable, host_id as u16, motor_id), &[])
    }

    /// Stop the motor, optionally clearing any latched faults.
    pub fn stop(motor_id: u8, host_id: u8, clear_faults: bool) -> Self {
        Self::new(
            ArbitrationId::new(CmdMode::Stop, host_id as u16, motor_id),
            &[clear_faults as u8]
        )
    }

    /// Set the current position as the mechanical zero.
    pub fn set_mechanical_zero(motor_id: u8, host_id: u8) -> Self {
        Self::new(
            ArbitrationId::new(CmdMode::SetMechanicalZero, host_id as u16, motor_id),
            &[1]
        )
    }

    /// Request a telemetry frame without changing the motor's state.
    pub fn feedback_request(motor_id: u8, host_id: u8) -> Self {
        Self::new(ArbitrationId::new(CmdMode::Feedback, host_id as u16, motor_id), &[])
    }

    /// Write a single parameter.
    ///
    /// Payload layout is the parameter index (u16 LE), two zero bytes, then the value (LE).
    pub fn param_write(
        motor_id: u8,
        host_id: u8,
        param: Param,
        value: ParamValue
    ) -> Result<Self, FrameError> {
        let mut data = [0u8; PAYLOAD_LEN];
        LittleEndian::write_u16(&mut data[0..2], param.index());

        match (param.is_u8(), value) {
            (true, ParamValue::U8(v)) => data[4] = v,
            (false, ParamValue::F32(v)) => LittleEndian::write_f32(&mut data[4..8], v),
            _ => return Err(FrameError::ParamType(param, value))
        }

        Ok(Self::new(
            ArbitrationId::new(CmdMode::ParamWrite, host_id as u16, motor_id),
            &data
        ))
    }

    /// Motion control command. The feed forward torque is carried in the aux field, the payload
    /// holds angle, velocity, Kp and Kd as big endian 16-bit words.
    pub fn motion_control(motor_id: u8, cmd: &MotionCommand) -> Self {
        let mut data = [0u8; PAYLOAD_LEN];
        BigEndian::write_u16(&mut data[0..2], POSITION.encode(cmd.angle_rad));
        BigEndian::write_u16(&mut data[2..4], VELOCITY.encode(cmd.velocity_rads));
        BigEndian::write_u16(&mut data[4..6], KP.encode(cmd.kp));
        BigEndian::write_u16(&mut data[6..8], KD.encode(cmd.kd));

        Self::new(
            ArbitrationId::new(
                CmdMode::MotionControl,
                TORQUE.encode(cmd.torque_ff_nm),
                motor_id
            ),
            &data
        )
    }
}

impl Telemetry {
    /// Parse a telemetry frame.
    ///
    /// The payload holds position, velocity, torque and temperature as big endian 16-bit words,
    /// the sending motor's ID and fault bits are in the aux field of the arbitration ID.
    pub fn from_frame(frame: &Frame) -> Result<Self, FrameError> {
        if !frame.id.is_telemetry() {
            return Err(FrameError::NotTelemetry(frame.id.cmd))
        }

        if frame.len < PAYLOAD_LEN {
            return Err(FrameError::ShortPayload {
                expected: PAYLOAD_LEN,
                actual: frame.len
            })
        }

        let d = &frame.data;
        Ok(Self {
            motor_id: frame.id.source_motor(),
            position_rad: POSITION.decode(BigEndian::read_u16(&d[0..2])),
            velocity_rads: VELOCITY.decode(BigEndian::read_u16(&d[2..4])),
            torque_nm: TORQUE.decode(BigEndian::read_u16(&d[4..6])),
            temperature_c: BigEndian::read_u16(&d[6..8]) as f64 * TEMPERATURE_LSB_C,
            faults: ((frame.id.aux >> 8) & 0x3F) as u8
        })
    }

    /// Build the frame a motor would send for this telemetry, addressed to `host_id`.
    pub fn to_frame(&self, host_id: u8) -> Frame {
        let mut data = [0u8; PAYLOAD_LEN];
        BigEndian::write_u16(&mut data[0..2], POSITION.encode(self.position_rad));
        BigEndian::write_u16(&mut data[2..4], VELOCITY.encode(self.velocity_rads));
        BigEndian::write_u16(&mut data[4..6], TORQUE.encode(self.torque_nm));
        BigEndian::write_u16(
            &mut data[6..8],
            (self.temperature_c / TEMPERATURE_LSB_C).round().max(0.0) as u16
        );

        let aux = ((self.faults as u16 & 0x3F) << 8) | self.motor_id as u16;

        Frame::new(ArbitrationId::new(CmdMode::Feedback, aux, host_id), &data)
    }
}

impl CmdMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => CmdMode::GetDeviceId,
            1 => CmdMode::MotionControl,
            2 => CmdMode::Feedback,
            3 => CmdMode::Enable,
            4 => CmdMode::Stop,
            6 => CmdMode::SetMechanicalZero,
            7 => CmdMode::SetCanId,
            8 => CmdMode::ParamTableWrite,
            17 => CmdMode::ParamRead,
            18 => CmdMode::ParamWrite,
            21 => CmdMode::FaultFeedback,
            _ => return None
        })
    }
}

impl Param {
    /// Index of the parameter in the controller's parameter table.
    pub fn index(&self) -> u16 {
        match self {
            Param::RunMode => 0x7005,
            Param::IqRef => 0x7006,
            Param::SpdRef => 0x700A,
            Param::LimitTorque => 0x700B,
            Param::CurKp => 0x7010,
            Param::CurKi => 0x7011,
            Param::CurFiltGain => 0x7014,
            Param::LocRef => 0x7016,
            Param::LimitSpd => 0x7017,
            Param::LimitCur => 0x7018
        }
    }

    /// True if the parameter is a single byte rather than a float.
    pub fn is_u8(&self) -> bool {
        matches!(self, Param::RunMode)
    }

    pub fn from_name(name: &str) -> Result<Self, FrameError> {
        Ok(match name {
            "run_mode" => Param::RunMode,
            "iq_ref" => Param::IqRef,
            "spd_ref" => Param::SpdRef,
            "limit_torque" => Param::LimitTorque,
            "cur_kp" => Param::CurKp,
            "cur_ki" => Param::CurKi,
            "cur_filt_gain" => Param::CurFiltGain,
            "loc_ref" => Param::LocRef,
            "limit_spd" => Param::LimitSpd,
            "limit_cur" => Param::LimitCur,
            _ => return Err(FrameError::UnknownParam(String::from(name)))
        })
    }
}

impl ParamValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            ParamValue::U8(v) => *v as f64,
            ParamValue::F32(v) => *v as f64
        }
    }
}

impl RunMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RunMode::Control),
            1 => Some(RunMode::Position),
            2 => Some(RunMode::Speed),
            3 => Some(RunMode::Current),
            _ => None
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Control => write!(f, "control"),
            RunMode::Position => write!(f, "position"),
            RunMode::Speed => write!(f, "speed"),
            RunMode::Current => write!(f, "current")
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
