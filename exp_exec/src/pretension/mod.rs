//! # Pretensioner
//!
//! Brings both cables to the target tension magnitude before the trajectory starts. Each
//! iteration reads both gauges, then for each motor either marks it settled, if its tension is
//! within tolerance of the target, or moves it one step in the direction which corrects the
//! tension. Both corrections of an iteration are commanded back to back, so the cables always see
//! a symmetric correction.
//!
//! The decision logic is the [`Pretensioner`] module, the device I/O around it is in [`run`].
//! When both cables are settled the motors' angles are recorded as their home angles.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod driver;
mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;
use util::module::State;

use crate::cable_rig::NUM_CABLES;
use crate::motor::MotorError;

pub use driver::*;
pub use params::*;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Pretension control module state.
#[derive(Debug, Clone)]
pub struct Pretensioner {
    params: Params,

    /// Resolved direction of each motor, +1 or -1. `None` before init.
    directions: Option<[f64; NUM_CABLES]>,

    /// Iteration cap, raised each time the operator chooses to carry on.
    max_iterations: usize,

    iteration: usize,

    phases: [Phase; NUM_CABLES]
}

/// Input data to the pretensioner.
#[derive(Debug, Clone, Copy)]
pub struct InputData {
    /// Tension read from each gauge, `NaN` for a bad read.
    ///
    /// Units: Newtons
    pub tensions: [f64; NUM_CABLES],

    /// Current (last commanded) angle of each motor.
    ///
    /// Units: radians
    pub angles: [f64; NUM_CABLES]
}

/// New angle targets, `None` where a motor should not move this iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OutputData {
    /// Units: radians
    pub targets: [Option<f64>; NUM_CABLES]
}

/// Status report for pretension processing.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatusReport {
    pub iteration: usize,

    pub phases: [Phase; NUM_CABLES],

    /// Motors skipped because their gauge gave a bad read
    pub skipped: [bool; NUM_CABLES]
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Pretension phase of one cable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Searching,
    Settled
}

#[derive(Debug, thiserror::Error)]
pub enum PretensionError {
    #[error("The cables did not settle within {0} iterations")]
    IterationCap(usize),

    #[error("Cannot find the direction of {0}: {1}")]
    DirectionUnresolved(String, String),

    #[error("Expected a resolved direction of +1 or -1, found {0}")]
    InvalidDirection(f64),

    #[error("The pretensioner has not been initialised")]
    NotInitialised,

    #[error("Pretensioning needs a gauge on every cable")]
    MissingGauge,

    #[error("Motor error: {0}")]
    Motor(MotorError)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Pretensioner {
    pub fn new(params: Params) -> Self {
        Self {
            max_iterations: params.max_iterations,
            params,
            directions: None,
            iteration: 0,
            phases: [Phase::Searching; NUM_CABLES]
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Iterations run so far.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn phases(&self) -> [Phase; NUM_CABLES] {
        self.phases
    }

    pub fn is_settled(&self) -> bool {
        self.phases.iter().all(|p| *p == Phase::Settled)
    }

    /// Allow another `extra` iterations after the cap was reached.
    pub fn extend(&mut self, extra: usize) {
        self.max_iterations += extra;
    }
}

impl State for Pretensioner {
    /// Resolved direction of each motor
    type InitData = [f64; NUM_CABLES];
    type InitError = PretensionError;

    type InputData = InputData;
    type OutputData = OutputData;
    type StatusReport = StatusReport;
    type ProcError = PretensionError;

    fn init(&mut self, directions: Self::InitData) -> Result<(), Self::InitError> {
        for d in directions.iter() {
            if *d != 1.0 && *d != -1.0 {
                return Err(PretensionError::InvalidDirection(*d))
            }
        }

        self.directions = Some(directions);
        self.iteration = 0;
        self.phases = [Phase::Searching; NUM_CABLES];

        Ok(())
    }

    fn proc(&mut self, input: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>
    {
        let directions = self.directions.ok_or(PretensionError::NotInitialised)?;

        if self.iteration >= self.max_iterations {
            return Err(PretensionError::IterationCap(self.iteration))
        }
        self.iteration += 1;

        let mut output = OutputData::default();
        let mut skipped = [false; NUM_CABLES];

        for i in 0..NUM_CABLES {
            let magnitude = input.tensions[i].abs();

            // A bad read leaves the motor where it is
            if magnitude.is_nan() {
                skipped[i] = true;
                continue
            }

            let error = magnitude - self.params.target_tension_n;
            if error.abs() <= self.params.tolerance_n {
                self.phases[i] = Phase::Settled;
                continue
            }

            self.phases[i] = Phase::Searching;
            let sign = if error < 0.0 { 1.0 } else { -1.0 };
            output.targets[i] = Some(input.angles[i] + directions[i] * sign * self.params.step_rad);
        }

        Ok((output, StatusReport {
            iteration: self.iteration,
            phases: self.phases,
            skipped
        }))
    }
}

impl From<MotorError> for PretensionError {
    fn from(e: MotorError) -> Self {
        PretensionError::Motor(e)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn pretensioner() -> Pretensioner {
        let mut p = Pretensioner::new(Params {
            target_tension_n: 2.0,
            step_rad: 0.01,
            tolerance_n: 0.1,
            max_iterations: 3,
            ..Default::default()
        });
        p.init([1.0, -1.0]).unwrap();
        p
    }

    #[test]
    fn test_steps_towards_target() {
        let mut p = pretensioner();

        // Motor 1 slack, motor 2 over tensioned (reported negative)
        let (out, report) = p.proc(&InputData {
            tensions: [0.5, -3.0],
            angles: [1.0, 2.0]
        }).unwrap();

        assert_eq!(out.targets, [Some(1.01), Some(2.01)]);
        assert_eq!(report.phases, [Phase::Searching, Phase::Searching]);
        assert_eq!(report.iteration, 1);
    }

    #[test]
    fn test_settle_skip_and_cap() {
        let mut p = pretensioner();

        let (out, report) = p.proc(&InputData {
            tensions: [-1.95, std::f64::NAN],
            angles: [0.0, 0.0]
        }).unwrap();
        assert_eq!(out.targets, [None, None]);
        assert_eq!(report.phases, [Phase::Settled, Phase::Searching]);
        assert_eq!(report.skipped, [false, true]);
        assert!(!p.is_settled());

        let (out, _) = p.proc(&InputData {
            tensions: [2.05, 1.0],
            angles: [0.0, 0.0]
        }).unwrap();
        assert_eq!(out.targets, [None, Some(-0.01)]);

        let (_, report) = p.proc(&InputData {
            tensions: [2.0, 2.0],
            angles: [0.0, -0.01]
        }).unwrap();
        assert_eq!(report.phases, [Phase::Settled, Phase::Settled]);
        assert!(p.is_settled());

        // Cap reached, carrying on needs an extension
        assert!(matches!(
            p.proc(&InputData { tensions: [0.0, 0.0], angles: [0.0, 0.0] }),
            Err(PretensionError::IterationCap(3))
        ));
        p.extend(1);
        assert!(p.proc(&InputData { tensions: [0.0, 0.0], angles: [0.0, 0.0] }).is_ok());
    }

    #[test]
    fn test_init_checks() {
        let mut p = Pretensioner::new(Params::default());
        assert!(matches!(
            p.proc(&InputData { tensions: [0.0; 2], angles: [0.0; 2] }),
            Err(PretensionError::NotInitialised)
        ));
        assert!(matches!(p.init([1.0, 0.0]), Err(PretensionError::InvalidDirection(_))));
    }
}
