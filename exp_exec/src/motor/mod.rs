//! # Motor Driver
//!
//! Per-motor semantic commands on top of the shared CAN bus. A `Motor` holds no link of its own,
//! every operation borrows the bus from the motor worker, which makes the two motors views onto
//! one bus parameterised by their CAN address.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;
use comms_if::eqpt::cybergear::{FrameError, RunMode, Telemetry};

use crate::can_bus::CanError;

pub use params::*;
pub use state::*;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// State of a motor as read back from its controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MotorStatus {
    /// Units: radians
    pub angle_rad: f64,

    /// Units: radians/second
    pub velocity_rads: f64,

    /// Units: Newton meters
    pub torque_nm: f64,

    /// Units: degrees Celsius
    pub temperature_c: f64
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Power state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PowerState {
    /// Nothing has been sent to the controller yet
    Uninit,
    Disabled,
    Enabled
}

/// Possible errors that can occur during motor operation.
#[derive(Debug, thiserror::Error)]
pub enum MotorError {
    #[error("Command needs the motor to be {required} but it is {actual}")]
    WrongMode { required: String, actual: String },

    #[error("Refusing to command a non-finite value ({0})")]
    NonFinite(f64),

    #[error("The home angle has already been recorded as {0} rad")]
    HomeAlreadySet(f64),

    #[error("Bus error: {0}")]
    Bus(CanError),

    #[error("Frame error: {0}")]
    Frame(FrameError)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl From<Telemetry> for MotorStatus {
    fn from(tm: Telemetry) -> Self {
        Self {
            angle_rad: tm.position_rad,
            velocity_rads: tm.velocity_rads,
            torque_nm: tm.torque_nm,
            temperature_c: tm.temperature_c
        }
    }
}

impl From<CanError> for MotorError {
    fn from(e: CanError) -> Self {
        MotorError::Bus(e)
    }
}

impl From<FrameError> for MotorError {
    fn from(e: FrameError) -> Self {
        MotorError::Frame(e)
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerState::Uninit => write!(f, "uninitialised"),
            PowerState::Disabled => write!(f, "disabled"),
            PowerState::Enabled => write!(f, "enabled")
        }
    }
}

/// Describe a power state and run mode pair for error messages.
pub(crate) fn describe(power: PowerState, mode: Option<RunMode>) -> String {
    match mode {
        Some(m) => format!("{} in {} mode", power, m),
        None => format!("{} with no run mode set", power)
    }
}
