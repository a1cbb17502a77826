//! Parameters structure for the pretensioner

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::time::Duration;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the pretensioner.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Params {
    /// Tension magnitude both cables are brought to.
    ///
    /// Units: Newtons
    #[serde(alias = "target_tension_N")]
    pub target_tension_n: f64,

    /// Angle a motor moves by in one iteration.
    ///
    /// Units: radians
    #[serde(default = "default_step_rad")]
    pub step_rad: f64,

    /// Wait between iterations, for the cables to settle.
    ///
    /// Units: seconds
    #[serde(default = "default_wait_s")]
    pub wait_s: f64,

    /// Band around the target within which a cable is settled.
    ///
    /// Units: Newtons
    #[serde(default = "default_tolerance_n")]
    pub tolerance_n: f64,

    /// Iterations after which the operator is asked whether to carry on.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Speed limit of every pretension move.
    ///
    /// Units: radians/second
    #[serde(default = "default_speed_limit_rads")]
    pub speed_limit_rads: f64,

    /// Size of the test move used to find a motor's direction when it is `auto`.
    ///
    /// Units: radians
    #[serde(default = "default_probe_step_rad")]
    pub probe_step_rad: f64,

    /// Smallest change of tension over a probe move taken as a response.
    ///
    /// Units: Newtons
    #[serde(default = "default_probe_threshold_n")]
    pub probe_threshold_n: f64
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Direction of rotation which tightens a motor's cable.
///
/// Written as `1`, `-1` or `"auto"` in parameter files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "DirectionRepr", into = "DirectionRepr")]
pub enum Direction {
    /// Tension increases as the angle increases
    Positive,

    /// Tension increases as the angle decreases
    Negative,

    /// Found by a probe move before pretensioning
    Auto
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
enum DirectionRepr {
    Sign(i8),
    Word(String)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Params {
    pub fn wait(&self) -> Duration {
        Duration::from_secs_f64(self.wait_s.max(0.0))
    }
}

impl Default for Params {
    fn default() -> Self {
        Self {
            target_tension_n: 2.0,
            step_rad: default_step_rad(),
            wait_s: default_wait_s(),
            tolerance_n: default_tolerance_n(),
            max_iterations: default_max_iterations(),
            speed_limit_rads: default_speed_limit_rads(),
            probe_step_rad: default_probe_step_rad(),
            probe_threshold_n: default_probe_threshold_n()
        }
    }
}

impl Direction {
    /// Sign of the angle change which tightens the cable, `None` until resolved.
    pub fn sign(&self) -> Option<f64> {
        match self {
            Direction::Positive => Some(1.0),
            Direction::Negative => Some(-1.0),
            Direction::Auto => None
        }
    }
}

impl TryFrom<DirectionRepr> for Direction {
    type Error = String;

    fn try_from(repr: DirectionRepr) -> Result<Self, Self::Error> {
        match repr {
            DirectionRepr::Sign(1) => Ok(Direction::Positive),
            DirectionRepr::Sign(-1) => Ok(Direction::Negative),
            DirectionRepr::Word(ref w) if w == "auto" => Ok(Direction::Auto),
            DirectionRepr::Word(ref w) if w == "positive" => Ok(Direction::Positive),
            DirectionRepr::Word(ref w) if w == "negative" => Ok(Direction::Negative),
            r => Err(format!("Expected 1, -1 or \"auto\" for a direction, found {:?}", r))
        }
    }
}

impl From<Direction> for DirectionRepr {
    fn from(d: Direction) -> Self {
        match d {
            Direction::Positive => DirectionRepr::Sign(1),
            Direction::Negative => DirectionRepr::Sign(-1),
            Direction::Auto => DirectionRepr::Word(String::from("auto"))
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn default_step_rad() -> f64 { 0.01 }
fn default_wait_s() -> f64 { 0.2 }
fn default_tolerance_n() -> f64 { 0.1 }
fn default_max_iterations() -> usize { 200 }
fn default_speed_limit_rads() -> f64 { 5.0 }
fn default_probe_step_rad() -> f64 { 0.05 }
fn default_probe_threshold_n() -> f64 { 0.05 }

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Deserialize)]
    struct Motors {
        a: Direction,
        b: Direction,
        c: Direction
    }

    #[test]
    fn test_direction_repr() {
        let m: Motors = util::params::from_str("a = 1\nb = -1\nc = \"auto\"\n").unwrap();
        assert_eq!(m.a, Direction::Positive);
        assert_eq!(m.b, Direction::Negative);
        assert_eq!(m.c, Direction::Auto);
        assert_eq!(m.c.sign(), None);

        assert!(util::params::from_str::<Motors>("a = 2\nb = -1\nc = 1\n").is_err());
        assert!(util::params::from_str::<Motors>("a = \"up\"\nb = -1\nc = 1\n").is_err());

        assert_eq!(serde_json::to_string(&Direction::Negative).unwrap(), "-1");
        assert_eq!(serde_json::to_string(&Direction::Auto).unwrap(), "\"auto\"");
    }
}
