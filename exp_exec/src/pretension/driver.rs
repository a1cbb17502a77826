//! Device I/O around the pretensioner

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, info, warn};
use serde::Serialize;
use std::thread;
use util::module::State;

use super::{InputData, Params, PretensionError, Pretensioner};
use crate::cable_rig::{CableRig, NUM_CABLES};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Attempts made to get a valid tension reading during a direction probe.
const PROBE_READ_ATTEMPTS: usize = 3;

/// Consecutive bad reads after which a cable's gauge is reported again.
const BAD_READ_REPORT_INTERVAL: usize = 10;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Result of a successful pretension.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Outcome {
    /// Home angle recorded for each motor.
    ///
    /// Units: radians
    pub home_rad: [f64; NUM_CABLES],

    /// Last tension read on each cable.
    ///
    /// Units: Newtons
    pub tensions_n: [f64; NUM_CABLES],

    pub iterations: usize
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Direction sign of every motor, probing those configured as `auto`.
///
/// The motors must already be enabled in position mode.
pub fn resolve_directions(
    rig: &mut CableRig,
    params: &Params
) -> Result<[f64; NUM_CABLES], PretensionError> {
    let mut signs = [0f64; NUM_CABLES];

    for (i, sign) in signs.iter_mut().enumerate() {
        *sign = match rig.motors[i].params().direction.sign() {
            Some(s) => s,
            None => probe_direction(rig, i, params)?
        };
    }

    Ok(signs)
}

/// Run the pretension loop until both cables settle.
///
/// `start_rad` are the motors' angles before the first iteration. Returns
/// `PretensionError::IterationCap` when the cap is reached, after which the loop can be resumed
/// by extending the pretensioner and calling this again.
pub fn run(
    rig: &mut CableRig,
    ctrl: &mut Pretensioner,
    start_rad: [f64; NUM_CABLES]
) -> Result<Outcome, PretensionError> {
    if !rig.has_gauges() {
        return Err(PretensionError::MissingGauge)
    }

    let params = ctrl.params().clone();
    let mut bad_reads = [0usize; NUM_CABLES];

    info!(
        "Pretensioning to {:.2} N (+/- {:.2} N), {:.3} rad steps",
        params.target_tension_n, params.tolerance_n, params.step_rad
    );

    loop {
        // Both reads first, then both commands
        let mut tensions = [std::f64::NAN; NUM_CABLES];
        for (i, t) in tensions.iter_mut().enumerate() {
            *t = rig.read_tension(i).unwrap_or(std::f64::NAN);

            if t.is_nan() {
                bad_reads[i] += 1;
                if bad_reads[i] % BAD_READ_REPORT_INTERVAL == 1 {
                    warn!(
                        "[{}] No valid tension, {} bad reads in a row",
                        rig.motors[i].tag(), bad_reads[i]
                    );
                }
            }
            else {
                bad_reads[i] = 0;
            }
        }

        let commanded = rig.commanded();
        let mut angles = start_rad;
        for (a, c) in angles.iter_mut().zip(commanded.iter()) {
            if let Some(c) = c {
                *a = *c;
            }
        }

        let (output, report) = ctrl.proc(&InputData { tensions, angles })?;

        info!(
            "Pretension {}: |T1| = {:.3} N at {:.4} rad ({:?}), |T2| = {:.3} N at {:.4} rad ({:?})",
            report.iteration,
            tensions[0].abs(), angles[0], report.phases[0],
            tensions[1].abs(), angles[1], report.phases[1]
        );

        if ctrl.is_settled() {
            let home_rad = record_home(rig, angles)?;
            info!(
                "Pretension settled after {} iterations, home at {:.4} rad and {:.4} rad",
                report.iteration, home_rad[0], home_rad[1]
            );

            return Ok(Outcome {
                home_rad,
                tensions_n: tensions,
                iterations: report.iteration
            })
        }

        for (i, target) in output.targets.iter().enumerate() {
            if let Some(target) = target {
                if let Err(e) = rig.command(i, params.speed_limit_rads, *target) {
                    warn!("[{}] Pretension move failed: {}", rig.motors[i].tag(), e);
                }
            }
        }

        thread::sleep(params.wait());
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Record the motors' current angles as their home angles.
fn record_home(
    rig: &mut CableRig,
    commanded: [f64; NUM_CABLES]
) -> Result<[f64; NUM_CABLES], PretensionError> {
    let mut home = commanded;

    for (i, h) in home.iter_mut().enumerate() {
        match rig.read_status(i) {
            Some(s) => *h = s.angle_rad,
            None => warn!(
                "[{}] No status, using the commanded angle as home",
                rig.motors[i].tag()
            )
        }
        rig.motors[i].set_home(*h)?;
    }

    Ok(home)
}

/// Find the direction which tightens one cable by moving its motor each way in turn.
///
/// The motor is returned to its start angle after each probe move.
fn probe_direction(
    rig: &mut CableRig,
    cable: usize,
    params: &Params
) -> Result<f64, PretensionError> {
    let tag = String::from(rig.motors[cable].tag());
    let unresolved = |reason: &str| {
        PretensionError::DirectionUnresolved(tag.clone(), String::from(reason))
    };

    let start = match rig.read_status(cable) {
        Some(s) => s.angle_rad,
        None => return Err(unresolved("the motor did not answer"))
    };
    let before = probe_magnitude(rig, cable).ok_or_else(|| unresolved("no valid tension"))?;

    info!("[{}] Probing direction from {:.4} rad at |T| = {:.3} N", tag, start, before);

    for sign in [1.0, -1.0].iter() {
        rig.command(cable, params.speed_limit_rads, start + sign * params.probe_step_rad)?;
        thread::sleep(params.wait());
        let after = probe_magnitude(rig, cable);

        rig.command(cable, params.speed_limit_rads, start)?;
        thread::sleep(params.wait());

        debug!("[{}] Probe {:+}: |T| = {:?}", tag, sign, after);

        if let Some(after) = after {
            if after - before >= params.probe_threshold_n {
                info!("[{}] Tension increases with direction {:+}", tag, sign);
                return Ok(*sign)
            }
        }
    }

    Err(unresolved("neither direction changed the tension"))
}

/// Tension magnitude on a cable, taking the first valid of a few reads.
fn probe_magnitude(rig: &mut CableRig, cable: usize) -> Option<f64> {
    (0..PROBE_READ_ATTEMPTS)
        .filter_map(|_| rig.read_tension(cable))
        .find(|t| !t.is_nan())
        .map(f64::abs)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::pretension::Direction;
    use crate::sim::{GaugeModel, SimConfig, SimRig};

    fn params(max_iterations: usize) -> Params {
        Params {
            target_tension_n: 2.0,
            step_rad: 0.01,
            wait_s: 0.0,
            tolerance_n: 0.1,
            max_iterations,
            ..Default::default()
        }
    }

    fn sim(gain: f64) -> (SimRig, CableRig, [f64; NUM_CABLES]) {
        let rig = SimRig::new(SimConfig::instant());
        rig.add_motor(1, 0.2);
        rig.add_motor(2, -0.3);
        // Motor 2 tightens its cable by turning backwards
        rig.add_gauge(GaugeModel::linear(1, gain, 1.0));
        rig.add_gauge(GaugeModel {
            reported_sign: -1.0,
            ..GaugeModel::linear(2, gain, -1.0)
        });

        let mut cables = rig.cable_rig();
        let start = cables.prepare().unwrap();
        (rig, cables, start)
    }

    #[test]
    fn test_converges() {
        let (rig, mut cables, start) = sim(2.0);

        let mut ctrl = Pretensioner::new(params(200));
        ctrl.init(resolve_directions(&mut cables, ctrl.params()).unwrap()).unwrap();

        let outcome = run(&mut cables, &mut ctrl, start).unwrap();
        assert!(outcome.iterations <= 100, "{} iterations", outcome.iterations);

        for i in 0..NUM_CABLES {
            assert!((outcome.tensions_n[i].abs() - 2.0).abs() <= 0.1);
            assert!((rig.gauge_force(i).unwrap().abs() - 2.0).abs() <= 0.1 + 1e-3);
            assert_eq!(cables.motors[i].home_rad(), Some(outcome.home_rad[i]));
        }

        // Each motor moved the way its cable tightens
        assert!(outcome.home_rad[0] > start[0]);
        assert!(outcome.home_rad[1] < start[1]);
    }

    #[test]
    fn test_stuck_gauge_hits_cap() {
        let (_rig, mut cables, start) = sim(0.0);

        let mut ctrl = Pretensioner::new(params(30));
        ctrl.init([1.0, -1.0]).unwrap();

        assert!(matches!(
            run(&mut cables, &mut ctrl, start),
            Err(PretensionError::IterationCap(30))
        ));

        // Never further than cap * step from the start
        let cmd = cables.commanded();
        for i in 0..NUM_CABLES {
            let moved = (cmd[i].unwrap() - start[i]).abs();
            assert!(moved <= 30.0 * 0.01 + 1e-9, "moved {}", moved);
        }
        assert!(cables.motors[0].home_rad().is_none());

        // Carrying on resumes from where it stopped
        ctrl.extend(5);
        assert!(matches!(
            run(&mut cables, &mut ctrl, start),
            Err(PretensionError::IterationCap(35))
        ));
        let moved = (cables.commanded()[0].unwrap() - start[0]).abs();
        assert!(moved <= 35.0 * 0.01 + 1e-9);
    }

    #[test]
    fn test_direction_probe() {
        let (_rig, mut cables, start) = sim(2.0);
        cables.motors[0] = crate::motor::Motor::new("motor1", crate::motor::Params {
            direction: Direction::Auto,
            ..cables.motors[0].params().clone()
        });
        cables.motors[1] = crate::motor::Motor::new("motor2", crate::motor::Params {
            direction: Direction::Auto,
            ..cables.motors[1].params().clone()
        });
        cables.prepare().unwrap();

        let signs = resolve_directions(&mut cables, &params(10)).unwrap();
        assert_eq!(signs, [1.0, -1.0]);

        // Probing leaves the motors where they started
        let cmd = cables.commanded();
        assert!((cmd[0].unwrap() - start[0]).abs() < 1e-6);
        assert!((cmd[1].unwrap() - start[1]).abs() < 1e-6);
    }

    #[test]
    fn test_direction_probe_fails_on_stuck_gauge() {
        let (_rig, mut cables, _) = sim(0.0);
        cables.motors[0] = crate::motor::Motor::new("motor1", crate::motor::Params {
            direction: Direction::Auto,
            ..cables.motors[0].params().clone()
        });
        cables.prepare().unwrap();

        assert!(matches!(
            resolve_directions(&mut cables, &params(10)),
            Err(PretensionError::DirectionUnresolved(..))
        ));
    }

    #[test]
    fn test_needs_gauges() {
        let rig = SimRig::new(SimConfig::instant());
        rig.add_motor(1, 0.0);
        rig.add_motor(2, 0.0);
        let mut cables = rig.cable_rig();

        let mut ctrl = Pretensioner::new(params(10));
        ctrl.init([1.0, -1.0]).unwrap();
        assert!(matches!(
            run(&mut cables, &mut ctrl, [0.0, 0.0]),
            Err(PretensionError::MissingGauge)
        ));
    }
}
