//! # Trajectories
//!
//! Parametric descriptions of how a motor's target angle varies with the time elapsed since the
//! start of the trajectory, and the executor which streams them to the motors.
//!
//! Every trajectory is absolute: it is evaluated against a base angle, the motor's home angle
//! recorded at the end of pretensioning. Evaluation is a total function of the shape, the elapsed
//! time and the base, failing only if the result is not finite.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod executor;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

pub use executor::*;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A trajectory bound to its base angle.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub spec: TrajectorySpec,

    /// Units: radians
    pub base_rad: f64
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Axis of the rig a cable, or a circle component, acts along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y
}

/// Shape of a trajectory. Angles are relative to the base.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrajectorySpec {
    /// Linear from the base to base + target over `duration_s`, then held.
    Ramp {
        #[serde(default)]
        axis: Axis,

        /// Units: degrees
        #[serde(alias = "max_deg")]
        target_deg: f64,

        /// Ramps over the whole experiment if not given.
        ///
        /// Units: seconds
        #[serde(default)]
        duration_s: Option<f64>
    },

    /// The base until `start_delay_s`, then a sine starting from zero phase.
    Sine {
        /// Units: degrees
        amplitude_deg: f64,

        /// Units: Hertz
        frequency_hz: f64,

        /// Units: seconds
        #[serde(default)]
        start_delay_s: f64
    },

    /// A cosine, starting at base + amplitude.
    Cosine {
        /// Units: degrees
        amplitude_deg: f64,

        /// Units: Hertz
        frequency_hz: f64
    },

    /// One component of a circle traced by two motors: cosine on X, sine on Y.
    Circle {
        /// Units: degrees
        radius_deg: f64,

        /// Units: Hertz
        frequency_hz: f64,

        /// Units: degrees
        #[serde(default)]
        phase_deg: f64,

        axis: Axis
    },

    /// The base for the whole experiment.
    Hold
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TrajError {
    #[error("Trajectory evaluated to {value} at t = {t} s")]
    Fault { t: f64, value: f64 },

    #[error("Invalid trajectory: {0}")]
    Invalid(String),

    #[error("{0} has no home angle, pretension must finish before the trajectory")]
    NotHomed(String),

    #[error("Cannot archive trajectory rows: {0}")]
    Archive(String)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Axis {
    fn default() -> Self {
        Axis::X
    }
}

impl Default for TrajectorySpec {
    fn default() -> Self {
        TrajectorySpec::Hold
    }
}

impl TrajectorySpec {
    /// Check that every parameter is usable.
    pub fn validate(&self) -> Result<(), TrajError> {
        let (values, frequency, duration): (Vec<f64>, Option<f64>, Option<f64>) = match *self {
            TrajectorySpec::Ramp { target_deg, duration_s, .. } => {
                (vec![target_deg, duration_s.unwrap_or(0.0)], None, duration_s)
            },
            TrajectorySpec::Sine { amplitude_deg, frequency_hz, start_delay_s } => {
                (vec![amplitude_deg, frequency_hz, start_delay_s], Some(frequency_hz), Some(start_delay_s))
            },
            TrajectorySpec::Cosine { amplitude_deg, frequency_hz } => {
                (vec![amplitude_deg, frequency_hz], Some(frequency_hz), None)
            },
            TrajectorySpec::Circle { radius_deg, frequency_hz, phase_deg, .. } => {
                (vec![radius_deg, frequency_hz, phase_deg], Some(frequency_hz), None)
            },
            TrajectorySpec::Hold => (vec![], None, None)
        };

        if values.iter().any(|v| !v.is_finite()) {
            return Err(TrajError::Invalid(format!("{:?} has a non-finite parameter", self)))
        }
        if frequency.map_or(false, |f| f < 0.0) {
            return Err(TrajError::Invalid(format!("{:?} has a negative frequency", self)))
        }
        if duration.map_or(false, |d| d < 0.0) {
            return Err(TrajError::Invalid(format!("{:?} has a negative duration", self)))
        }

        Ok(())
    }

    /// Give a ramp without a duration the experiment's duration.
    pub fn with_default_duration(self, experiment_s: f64) -> Self {
        match self {
            TrajectorySpec::Ramp { axis, target_deg, duration_s: None } => TrajectorySpec::Ramp {
                axis,
                target_deg,
                duration_s: Some(experiment_s)
            },
            spec => spec
        }
    }

    /// True if the trajectory starts exactly on its base angle.
    pub fn starts_at_base(&self) -> bool {
        match *self {
            TrajectorySpec::Cosine { amplitude_deg, .. } => amplitude_deg == 0.0,
            TrajectorySpec::Circle { radius_deg, phase_deg, axis, .. } => {
                radius_deg == 0.0 || (axis == Axis::Y && phase_deg == 0.0)
            },
            _ => true
        }
    }
}

impl Trajectory {
    pub fn new(spec: TrajectorySpec, base_rad: f64) -> Self {
        Self {
            spec,
            base_rad
        }
    }

    /// Target angle `elapsed_s` after the start.
    ///
    /// Units: radians
    pub fn at(&self, elapsed_s: f64) -> Result<f64, TrajError> {
        eval(&self.spec, elapsed_s, self.base_rad)
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Evaluate a trajectory at `t` seconds after its start, relative to `base_rad`.
pub fn eval(spec: &TrajectorySpec, t: f64, base_rad: f64) -> Result<f64, TrajError> {
    let angle = match *spec {
        TrajectorySpec::Ramp { target_deg, duration_s, .. } => {
            let duration_s = duration_s.unwrap_or(0.0);
            let frac = if duration_s > 0.0 {
                (t / duration_s).max(0.0).min(1.0)
            }
            else {
                1.0
            };
            base_rad + target_deg.to_radians() * frac
        },
        TrajectorySpec::Sine { amplitude_deg, frequency_hz, start_delay_s } => {
            if t < start_delay_s {
                base_rad
            }
            else {
                base_rad
                    + amplitude_deg.to_radians()
                    * (2.0 * PI * frequency_hz * (t - start_delay_s)).sin()
            }
        },
        TrajectorySpec::Cosine { amplitude_deg, frequency_hz } => {
            base_rad + amplitude_deg.to_radians() * (2.0 * PI * frequency_hz * t).cos()
        },
        TrajectorySpec::Circle { radius_deg, frequency_hz, phase_deg, axis } => {
            let theta = 2.0 * PI * frequency_hz * t + phase_deg.to_radians();
            let component = match axis {
                Axis::X => theta.cos(),
                Axis::Y => theta.sin()
            };
            base_rad + radius_deg.to_radians() * component
        },
        TrajectorySpec::Hold => base_rad
    };

    if angle.is_finite() {
        Ok(angle)
    }
    else {
        Err(TrajError::Fault { t, value: angle })
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_ramp() {
        let spec = TrajectorySpec::Ramp {
            axis: Axis::Y,
            target_deg: 90.0,
            duration_s: Some(2.0)
        };

        assert_eq!(eval(&spec, 0.0, 0.4).unwrap(), 0.4);
        assert!(close(eval(&spec, 1.0, 0.4).unwrap(), 0.4 + PI / 4.0));
        assert!(close(eval(&spec, 2.0, 0.4).unwrap(), 0.4 + PI / 2.0));
        assert!(close(eval(&spec, 10.0, 0.4).unwrap(), 0.4 + PI / 2.0));

        // Zero length ramps jump straight to the target
        let step = TrajectorySpec::Ramp { axis: Axis::X, target_deg: 10.0, duration_s: Some(0.0) };
        assert!(close(eval(&step, 0.0, 0.0).unwrap(), 10f64.to_radians()));
    }

    #[test]
    fn test_sine_with_delay() {
        let spec = TrajectorySpec::Sine {
            amplitude_deg: 5.0,
            frequency_hz: 0.5,
            start_delay_s: 1.0
        };
        let traj = Trajectory::new(spec, 0.0);

        assert_eq!(traj.at(0.0).unwrap(), 0.0);
        assert_eq!(traj.at(0.99).unwrap(), 0.0);
        assert!(traj.at(2.0).unwrap().abs() < 1e-12);
        assert!(close(traj.at(1.5).unwrap(), 5f64.to_radians()));
        assert!(close(traj.at(2.5).unwrap(), -(5f64.to_radians())));
    }

    #[test]
    fn test_cosine_and_circle() {
        let cos = TrajectorySpec::Cosine { amplitude_deg: 10.0, frequency_hz: 1.0 };
        assert!(close(eval(&cos, 0.0, 1.0).unwrap(), 1.0 + 10f64.to_radians()));
        assert!(close(eval(&cos, 0.5, 1.0).unwrap(), 1.0 - 10f64.to_radians()));
        assert!(!cos.starts_at_base());

        let x = TrajectorySpec::Circle {
            radius_deg: 10.0, frequency_hz: 0.25, phase_deg: 0.0, axis: Axis::X
        };
        let y = TrajectorySpec::Circle {
            radius_deg: 10.0, frequency_hz: 0.25, phase_deg: 0.0, axis: Axis::Y
        };
        assert!(y.starts_at_base());

        // The two components stay on the circle
        let r = 10f64.to_radians();
        for i in 0..20 {
            let t = i as f64 * 0.37;
            let a = eval(&x, t, 0.0).unwrap();
            let b = eval(&y, t, 0.0).unwrap();
            assert!(close(a * a + b * b, r * r));
        }
    }

    #[test]
    fn test_home_freeze() {
        let home = -1.2345;
        let specs = vec![
            TrajectorySpec::Hold,
            TrajectorySpec::Ramp { axis: Axis::Y, target_deg: 0.0, duration_s: Some(1.0) },
            TrajectorySpec::Ramp { axis: Axis::X, target_deg: 30.0, duration_s: None },
            TrajectorySpec::Sine { amplitude_deg: 5.0, frequency_hz: 2.0, start_delay_s: 0.0 },
            TrajectorySpec::Circle {
                radius_deg: 4.0, frequency_hz: 1.0, phase_deg: 0.0, axis: Axis::Y
            }
        ];

        for spec in specs {
            assert!(spec.starts_at_base());
            assert_eq!(eval(&spec, 0.0, home).unwrap(), home, "{:?}", spec);
        }
    }

    #[test]
    fn test_faults_and_validation() {
        let bad = TrajectorySpec::Sine {
            amplitude_deg: std::f64::INFINITY,
            frequency_hz: 1.0,
            start_delay_s: 0.0
        };
        assert!(matches!(eval(&bad, 0.25, 0.0), Err(TrajError::Fault { .. })));
        assert!(bad.validate().is_err());

        let neg = TrajectorySpec::Cosine { amplitude_deg: 1.0, frequency_hz: -1.0 };
        assert!(neg.validate().is_err());
        assert!(TrajectorySpec::Hold.validate().is_ok());
    }

    #[test]
    fn test_deserialise() {
        #[derive(Deserialize)]
        struct Wrapper {
            trajectory: TrajectorySpec
        }

        let w: Wrapper = util::params::from_str(
            "[trajectory]\ntype = \"ramp\"\naxis = \"y\"\nmax_deg = 0.0\nduration_s = 1.0\n"
        ).unwrap();
        assert_eq!(w.trajectory, TrajectorySpec::Ramp {
            axis: Axis::Y,
            target_deg: 0.0,
            duration_s: Some(1.0)
        });

        let w: Wrapper = util::params::from_str(
            "[trajectory]\ntype = \"ramp\"\naxis = \"y\"\nmax_deg = 10.0\n"
        ).unwrap();
        assert_eq!(w.trajectory.clone().with_default_duration(4.0), TrajectorySpec::Ramp {
            axis: Axis::Y,
            target_deg: 10.0,
            duration_s: Some(4.0)
        });
        assert!(close(eval(&w.trajectory.with_default_duration(4.0), 2.0, 0.0).unwrap(), 5f64.to_radians()));

        let w: Wrapper = util::params::from_str(
            "[trajectory]\ntype = \"sine\"\namplitude_deg = 5.0\nfrequency_hz = 0.5\n"
        ).unwrap();
        assert!(matches!(w.trajectory, TrajectorySpec::Sine { start_delay_s, .. } if start_delay_s == 0.0));

        let w: Wrapper = util::params::from_str("[trajectory]\ntype = \"hold\"\n").unwrap();
        assert_eq!(w.trajectory, TrajectorySpec::Hold);
    }
}
