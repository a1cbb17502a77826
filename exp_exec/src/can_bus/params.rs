//! Parameters structure for the CAN bus

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::time::Duration;
use comms_if::eqpt::cybergear::HOST_ID;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the CAN bus.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Params {
    /// Name of the SocketCAN interface, for example `can0`.
    pub interface: String,

    /// CAN ID of this computer on the bus.
    #[serde(default = "default_host_id")]
    pub host_id: u8,

    /// Longest time a frame send may block before failing as busy.
    ///
    /// Units: milliseconds
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Longest time to wait for a reply to a request.
    ///
    /// Units: milliseconds
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,

    /// Time to wait for each stale frame while draining the inbound queue.
    ///
    /// Units: milliseconds
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Maximum number of frames removed by a single drain.
    #[serde(default = "default_max_drain_frames")]
    pub max_drain_frames: usize
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Params {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms.max(1))
    }
}

impl Default for Params {
    fn default() -> Self {
        Self {
            interface: String::from("can0"),
            host_id: default_host_id(),
            send_timeout_ms: default_send_timeout_ms(),
            recv_timeout_ms: default_recv_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            max_drain_frames: default_max_drain_frames()
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn default_host_id() -> u8 { HOST_ID }
fn default_send_timeout_ms() -> u64 { 10 }
fn default_recv_timeout_ms() -> u64 { 50 }
fn default_drain_timeout_ms() -> u64 { 1 }
fn default_max_drain_frames() -> usize { 64 }
