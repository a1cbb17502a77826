//! Parameters structure for the motion capture client

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the motion capture client.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Params {
    /// Host running the motion capture server.
    pub host: String,

    pub port: u16,

    /// Units: milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Longest wait for any reply, on top of the capture itself for `get_data`.
    ///
    /// Units: milliseconds
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Params {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn default_connect_timeout_ms() -> u64 { 5000 }
fn default_io_timeout_ms() -> u64 { 10000 }
