//! Parameters structure for a motor

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::pretension::Direction;
use crate::traj::{Axis, TrajectorySpec};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for one motor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Params {
    /// CAN address of the motor controller.
    pub id: u8,

    /// Axis of the rig the motor's cable acts along.
    #[serde(default)]
    pub axis: Axis,

    /// Speed limit applied to every position command during the trajectory.
    ///
    /// Units: radians/second
    #[serde(default = "default_speed_limit_rads")]
    pub speed_limit_rads: f64,

    /// Direction of rotation which increases the cable tension.
    pub direction: Direction,

    /// Trajectory followed after pretensioning.
    #[serde(default)]
    pub trajectory: TrajectorySpec,

    /// Number of extra attempts made when a status read gets no reply.
    #[serde(default = "default_status_retries")]
    pub status_retries: u32,

    /// Delay between status read attempts.
    ///
    /// Units: milliseconds
    #[serde(default = "default_status_retry_delay_ms")]
    pub status_retry_delay_ms: u64
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Params {
    pub fn status_retry_delay(&self) -> Duration {
        Duration::from_millis(self.status_retry_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn default_speed_limit_rads() -> f64 { 6.0 }
fn default_status_retries() -> u32 { 3 }
fn default_status_retry_delay_ms() -> u64 { 10 }
