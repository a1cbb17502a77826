//! # Motion Capture Executable Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MocapExecParams {
    /// Network endpoint the server listens on
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Ratio of preallocated rows to the rows expected from the frame rate and duration
    #[serde(default = "default_buffer_margin")]
    pub buffer_margin: f64,

    /// Longest time a response write may block.
    ///
    /// Units: milliseconds
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// The simulated capture system
    #[serde(default)]
    pub sim: SimParams
}

/// Parameters of the simulated capture system.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimParams {
    /// Units: Hertz
    #[serde(default = "default_frame_rate_hz")]
    pub frame_rate_hz: f64,

    /// Tracked subjects, each with its segments. A segment named after its subject is the
    /// subject's root segment.
    #[serde(default = "default_subjects")]
    pub subjects: Vec<SubjectParams>,

    /// Every `occlusion_period`th frame reports the last segment occluded, zero never does.
    #[serde(default)]
    pub occlusion_period: usize
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubjectParams {
    pub name: String,

    pub segments: Vec<String>
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MocapExecParams {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            frame_rate_hz: default_frame_rate_hz(),
            subjects: default_subjects(),
            occlusion_period: 0
        }
    }
}

impl SimParams {
    /// `(subject, segment)` pairs in the order they are reported.
    pub fn segments(&self) -> Vec<(String, String)> {
        self.subjects.iter()
            .flat_map(|s| s.segments.iter().map(move |seg| (s.name.clone(), seg.clone())))
            .collect()
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn default_endpoint() -> String { String::from("0.0.0.0:8080") }
fn default_buffer_margin() -> f64 { 1.3 }
fn default_send_timeout_ms() -> u64 { 10_000 }
fn default_frame_rate_hz() -> f64 { 100.0 }

fn default_subjects() -> Vec<SubjectParams> {
    vec![SubjectParams {
        name: String::from("arm"),
        segments: vec![String::from("arm")]
    }]
}
