//! Parameters structure for the tension gauges

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters shared by every tension gauge.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Params {
    /// Serial port of each gauge, gauge `n` sits on the cable of motor `n`.
    pub ports: Vec<String>,

    /// Target probe rate when sampling on their own.
    ///
    /// Units: Hertz
    #[serde(default = "default_rate_hz")]
    pub rate_hz: f64,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Longest wait for a reply to a probe.
    ///
    /// Units: milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Bytes written to request a reading.
    #[serde(default = "default_probe")]
    pub probe: String,

    /// Sign convention of the recorded force.
    #[serde(default)]
    pub sign: TensionSign,

    /// Number of probes used to estimate the effective rate at startup.
    #[serde(default = "default_timing_samples")]
    pub timing_samples: usize,

    /// Longest reply accepted before giving up on a newline.
    ///
    /// Units: bytes
    #[serde(default = "default_max_reply_len")]
    pub max_reply_len: usize
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// How the force parsed from a gauge's reply is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TensionSign {
    /// Keep the gauge's sign, tension reads negative on the usual mounting.
    AsReported,

    /// Flip the sign so that tension reads positive.
    Negated
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Params {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate_hz)
    }
}

impl Default for Params {
    fn default() -> Self {
        Self {
            ports: Vec::new(),
            rate_hz: default_rate_hz(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            probe: default_probe(),
            sign: TensionSign::default(),
            timing_samples: default_timing_samples(),
            max_reply_len: default_max_reply_len()
        }
    }
}

impl Default for TensionSign {
    fn default() -> Self {
        TensionSign::AsReported
    }
}

impl TensionSign {
    pub fn apply(&self, force_n: f64) -> f64 {
        match self {
            TensionSign::AsReported => force_n,
            TensionSign::Negated => -force_n
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn default_rate_hz() -> f64 { 350.0 }
fn default_baud_rate() -> u32 { 115_200 }
fn default_timeout_ms() -> u64 { 100 }
fn default_probe() -> String { String::from("?C\r\n") }
fn default_timing_samples() -> usize { 50 }
fn default_max_reply_len() -> usize { 64 }
