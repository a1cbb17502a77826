//! Parameters structure for the force/torque transducer

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::NUM_CHANNELS;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the F/T transducer and its DAQ.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Params {
    /// DAQ channel string of the six gauge channels.
    #[serde(default = "default_channels")]
    pub channels: String,

    /// Sample rate of the DAQ.
    ///
    /// Units: Hertz
    #[serde(default = "default_rate_hz")]
    pub rate_hz: f64,

    /// Calibration matrix, rows are Fx, Fy, Fz, Mx, My, Mz and columns the gauge channels.
    ///
    /// Units: Newtons/volt for the force rows, Newton meters/volt for the torque rows
    #[serde(default = "default_calibration")]
    pub calibration: [[f64; NUM_CHANNELS]; NUM_CHANNELS],

    /// Number of idle samples averaged into the bias. Zero disables bias removal.
    #[serde(default = "default_bias_samples")]
    pub bias_samples: usize,

    /// Ratio of preallocated rows to the rows expected from the rate and duration.
    #[serde(default = "default_buffer_margin")]
    pub buffer_margin: f64,

    /// Serial port of the DAQ bridge streaming the channel voltages.
    #[serde(default)]
    pub port: Option<String>,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Longest wait for one sample from the DAQ.
    ///
    /// Units: milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Params {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Number of rows to preallocate for an acquisition of the given length.
    pub fn buffer_rows(&self, duration_s: f64) -> usize {
        (self.rate_hz * duration_s * self.buffer_margin).ceil().max(0.0) as usize
    }
}

impl Default for Params {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            rate_hz: default_rate_hz(),
            calibration: default_calibration(),
            bias_samples: default_bias_samples(),
            buffer_margin: default_buffer_margin(),
            port: None,
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms()
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn default_channels() -> String { String::from("Dev1/ai0:5") }
fn default_rate_hz() -> f64 { 1000.0 }
fn default_bias_samples() -> usize { 100 }
fn default_buffer_margin() -> f64 { 1.2 }
fn default_baud_rate() -> u32 { 12_000_000 }
fn default_timeout_ms() -> u64 { 100 }

/// Calibration of the lab's transducer.
fn default_calibration() -> [[f64; NUM_CHANNELS]; NUM_CHANNELS] {
    [
        [0.13221, -0.07541, 0.07645, 6.18461, -0.15573, -6.10142],
        [-0.16220, -7.45852, 0.11342, 3.46326, 0.05746, 3.61610],
        [10.41723, 0.02199, 10.34789, -0.17272, 10.74723, -0.41960],
        [-0.00066, -0.04164, 0.15144, 0.01453, -0.14737, 0.02745],
        [-0.17053, -0.00023, 0.08313, -0.03642, 0.08890, 0.03090],
        [-0.00105, -0.09214, -0.00218, -0.08602, -0.00095, -0.08592]
    ]
}
