//! Trajectory executor
//!
//! Streams setpoints from both trajectories to the motors at a fixed rate and logs one row per
//! tick. Each tick runs strictly in this order:
//!
//! 1. evaluate trajectory 1, then trajectory 2, at the elapsed time
//! 2. command motor 1, then motor 2
//! 3. read the status of motor 1, then motor 2
//! 4. read tension 1, then tension 2
//! 5. write the row
//!
//! The reads never change a setpoint. The executor leaves the motors at their last commanded
//! angles on exit.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};
use util::archive::Archiver;
use util::time::unix_timestamp_s;

use super::{TrajError, Trajectory};
use crate::cable_rig::{CableRig, NUM_CABLES};
use crate::gauge::TensionRow;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Column names of the motor/trajectory CSV.
pub const CSV_HEADER: [&str; 12] = [
    "timestamp",
    "elapsed_s",
    "motor1_cmd_rad",
    "motor1_cmd_deg",
    "motor1_feedback_rad",
    "motor1_feedback_deg",
    "mark10_motor1_N",
    "motor2_cmd_rad",
    "motor2_cmd_deg",
    "motor2_feedback_rad",
    "motor2_feedback_deg",
    "mark10_motor2_N"
];

/// Name of the motor/trajectory CSV in the experiment directory.
pub const CSV_FILE_NAME: &str = "motor_trajectory.csv";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Timing of the trajectory loop.
#[derive(Debug, Clone, Copy)]
pub struct ExecParams {
    /// Units: Hertz
    pub frequency_hz: f64,

    /// Units: seconds
    pub duration_s: f64,

    pub rate_policy: RatePolicy,

    /// Speed limit sent with every position command of each motor.
    ///
    /// Units: radians/second
    pub speed_limit_rads: [f64; NUM_CABLES]
}

/// One row of the motor/trajectory CSV. Fields of a motor which did not answer are empty.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TrajRow {
    pub timestamp: f64,
    pub elapsed_s: f64,

    pub motor1_cmd_rad: f64,
    pub motor1_cmd_deg: f64,
    pub motor1_feedback_rad: Option<f64>,
    pub motor1_feedback_deg: Option<f64>,
    pub mark10_motor1_n: Option<f64>,

    pub motor2_cmd_rad: f64,
    pub motor2_cmd_deg: f64,
    pub motor2_feedback_rad: Option<f64>,
    pub motor2_feedback_deg: Option<f64>,
    pub mark10_motor2_n: Option<f64>
}

/// Summary of a trajectory run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrajReport {
    pub rows: usize,

    /// Position commands which failed, the previous setpoint then stands
    pub command_faults: u64,

    /// Status reads which got no answer
    pub status_faults: u64,

    /// Tension reads which gave `NaN`
    pub bad_tensions: u64,

    /// Units: seconds
    pub elapsed_s: f64
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// How the executor keeps to its rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RatePolicy {
    /// Sleep to the next `t0 + k / f` boundary, so the loop phase never drifts
    Paced,

    /// Run ticks back to back, as fast as the devices answer
    FreeRun
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for RatePolicy {
    fn default() -> Self {
        RatePolicy::Paced
    }
}

/// Run both trajectories for the configured duration.
///
/// `tension_archives` receive every tension read of their gauge.
pub fn execute(
    rig: &mut CableRig,
    trajs: &[Trajectory; NUM_CABLES],
    params: &ExecParams,
    archive: &mut Archiver,
    tension_archives: &mut [Option<Archiver>; NUM_CABLES]
) -> Result<TrajReport, TrajError> {
    let mut report = TrajReport::default();
    let duration = Duration::from_secs_f64(params.duration_s.max(0.0));
    let period_s = 1.0 / params.frequency_hz;

    info!(
        "Running trajectories for {:.1} s at {:.1} Hz ({:?})",
        params.duration_s, params.frequency_hz, params.rate_policy
    );

    let t0 = Instant::now();

    loop {
        let elapsed = t0.elapsed();
        if elapsed >= duration {
            break
        }
        let elapsed_s = elapsed.as_secs_f64();

        // Setpoints
        let mut cmd = [0f64; NUM_CABLES];
        for (c, traj) in cmd.iter_mut().zip(trajs.iter()) {
            *c = traj.at(elapsed_s)?;
        }

        // Commands
        for (i, c) in cmd.iter().enumerate() {
            if let Err(e) = rig.command(i, params.speed_limit_rads[i], *c) {
                if report.command_faults == 0 {
                    warn!("[{}] Position command failed: {}", rig.motors[i].tag(), e);
                }
                report.command_faults += 1;
            }
        }

        // Feedback
        let mut fb = [None; NUM_CABLES];
        for (i, f) in fb.iter_mut().enumerate() {
            *f = rig.read_status(i).map(|s| s.angle_rad);
            if f.is_none() {
                report.status_faults += 1;
            }
        }

        let mut tension = [None; NUM_CABLES];
        for (i, t) in tension.iter_mut().enumerate() {
            *t = rig.read_tension(i);
        }
        let timestamp = unix_timestamp_s();

        let row = TrajRow {
            timestamp,
            elapsed_s,
            motor1_cmd_rad: cmd[0],
            motor1_cmd_deg: cmd[0].to_degrees(),
            motor1_feedback_rad: fb[0],
            motor1_feedback_deg: fb[0].map(f64::to_degrees),
            mark10_motor1_n: tension[0],
            motor2_cmd_rad: cmd[1],
            motor2_cmd_deg: cmd[1].to_degrees(),
            motor2_feedback_rad: fb[1],
            motor2_feedback_deg: fb[1].map(f64::to_degrees),
            mark10_motor2_n: tension[1]
        };
        archive.serialise(row).map_err(|e| TrajError::Archive(e.to_string()))?;
        report.rows += 1;

        for (t, arch) in tension.iter().zip(tension_archives.iter_mut()) {
            if let (Some(force), Some(arch)) = (t, arch.as_mut()) {
                if force.is_nan() {
                    report.bad_tensions += 1;
                }
                if let Err(e) = arch.serialise(TensionRow { timestamp, force: *force }) {
                    debug!("Cannot archive tension row: {}", e);
                }
            }
        }

        if params.rate_policy == RatePolicy::Paced {
            // Next tick boundary after now
            let now_s = t0.elapsed().as_secs_f64();
            let next_s = ((now_s / period_s).floor() + 1.0) * period_s;
            if next_s < params.duration_s {
                thread::sleep(Duration::from_secs_f64(next_s - now_s));
            }
            else {
                thread::sleep(duration.checked_sub(t0.elapsed()).unwrap_or_default());
            }
        }
    }

    report.elapsed_s = t0.elapsed().as_secs_f64();

    if report.status_faults > 0 || report.bad_tensions > 0 {
        warn!(
            "Trajectory had {} missing status reads and {} bad tension reads",
            report.status_faults, report.bad_tensions
        );
    }
    info!(
        "Trajectory complete: {} rows in {:.2} s ({:.1} Hz effective)",
        report.rows,
        report.elapsed_s,
        report.rows as f64 / report.elapsed_s.max(1e-9)
    );

    Ok(report)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::{GaugeModel, SimConfig, SimRig};
    use crate::traj::{Axis, TrajectorySpec};

    fn temp_archive(name: &str, header: &[&str]) -> Archiver {
        let path = std::env::temp_dir().join(format!(
            "traj_{}_{}.csv", name, std::process::id()
        ));
        Archiver::create(path, header).unwrap()
    }

    fn read_rows(arch: &Archiver) -> Vec<Vec<String>> {
        let mut reader = csv::Reader::from_path(arch.path()).unwrap();
        reader.records()
            .map(|r| r.unwrap().iter().map(String::from).collect())
            .collect()
    }

    #[test]
    fn test_trivial_trajectory() {
        let rig = SimRig::new(SimConfig::instant());
        rig.add_motor(1, 0.25);
        rig.add_motor(2, -0.5);
        // Gauges never see any load
        rig.add_gauge(GaugeModel::linear(1, 0.0, 1.0));
        rig.add_gauge(GaugeModel::linear(2, 0.0, -1.0));

        let mut cables = rig.cable_rig();
        let home = cables.prepare().unwrap();

        let spec = TrajectorySpec::Ramp { axis: Axis::Y, target_deg: 0.0, duration_s: Some(1.0) };
        let trajs = [
            Trajectory::new(spec.clone(), home[0]),
            Trajectory::new(spec, home[1])
        ];
        let params = ExecParams {
            frequency_hz: 50.0,
            duration_s: 1.0,
            rate_policy: RatePolicy::Paced,
            speed_limit_rads: [6.0, 6.0]
        };

        let mut arch = temp_archive("trivial", &CSV_HEADER);
        let mut tension_archs = [
            Some(temp_archive("trivial_t1", &["timestamp", "force"])),
            None
        ];
        let report = execute(&mut cables, &trajs, &params, &mut arch, &mut tension_archs)
            .unwrap();

        // About one row per period
        assert!(report.rows >= 45 && report.rows <= 51, "{} rows", report.rows);
        assert_eq!(report.command_faults, 0);

        let rows = read_rows(&arch);
        assert_eq!(rows.len(), report.rows);

        let mut last_ts = 0.0;
        for row in rows.iter() {
            assert_eq!(row.len(), CSV_HEADER.len());

            let ts: f64 = row[0].parse().unwrap();
            assert!(ts >= last_ts);
            last_ts = ts;

            assert_eq!(row[2].parse::<f64>().unwrap(), home[0]);
            assert_eq!(row[7].parse::<f64>().unwrap(), home[1]);
            assert_eq!(row[6].parse::<f64>().unwrap(), 0.0);
            assert_eq!(row[11].parse::<f64>().unwrap(), 0.0);
        }

        assert_eq!(tension_archs[0].as_ref().unwrap().num_records(), report.rows);
    }

    #[test]
    fn test_sine_trajectory() {
        let rig = SimRig::new(SimConfig::instant());
        rig.add_motor(1, 0.0);
        rig.add_motor(2, 0.0);

        let mut cables = rig.cable_rig();
        cables.prepare().unwrap();

        let sine = TrajectorySpec::Sine {
            amplitude_deg: 5.0,
            frequency_hz: 0.5,
            start_delay_s: 1.0
        };
        let trajs = [
            Trajectory::new(sine, 0.0),
            Trajectory::new(TrajectorySpec::Hold, 0.0)
        ];
        let params = ExecParams {
            frequency_hz: 60.0,
            duration_s: 3.0,
            rate_policy: RatePolicy::Paced,
            speed_limit_rads: [6.0, 6.0]
        };

        let mut arch = temp_archive("sine", &CSV_HEADER);
        let report = execute(
            &mut cables, &trajs, &params, &mut arch, &mut [None, None]
        ).unwrap();
        assert!(report.rows >= 170 && report.rows <= 181, "{} rows", report.rows);

        let amp = 5f64.to_radians();
        let mut max_cmd = std::f64::MIN;
        let mut t_at_max = 0.0;

        for row in read_rows(&arch) {
            let t: f64 = row[1].parse().unwrap();
            let cmd: f64 = row[2].parse().unwrap();

            if t < 1.0 {
                assert_eq!(cmd, 0.0);
            }
            assert!(cmd <= amp + 1e-12);
            if cmd > max_cmd {
                max_cmd = cmd;
                t_at_max = t;
            }

            // Feedback follows the command on the instant rig, no tension columns
            let fb: f64 = row[4].parse().unwrap();
            assert!((fb - cmd).abs() < 1e-3);
            assert_eq!(row[6], "");
        }

        assert!((max_cmd - amp).abs() < 1e-3);
        assert!((t_at_max - 1.5).abs() < 0.05);
    }

    #[test]
    fn test_missing_motor_gives_empty_fields() {
        let rig = SimRig::new(SimConfig::instant());
        rig.add_motor(1, 0.0);
        rig.add_motor(2, 0.0);

        let mut cables = rig.cable_rig();
        cables.prepare().unwrap();
        rig.set_silent(2, true);

        let trajs = [
            Trajectory::new(TrajectorySpec::Hold, 0.0),
            Trajectory::new(TrajectorySpec::Hold, 0.0)
        ];
        let params = ExecParams {
            frequency_hz: 20.0,
            duration_s: 0.2,
            rate_policy: RatePolicy::FreeRun,
            speed_limit_rads: [6.0, 6.0]
        };

        let mut arch = temp_archive("silent", &CSV_HEADER);
        let report = execute(
            &mut cables, &trajs, &params, &mut arch, &mut [None, None]
        ).unwrap();

        assert!(report.rows > 0);
        assert_eq!(report.command_faults, report.rows as u64);
        assert_eq!(report.status_faults, report.rows as u64);

        for row in read_rows(&arch) {
            assert!(row[4].parse::<f64>().unwrap().abs() < 1e-3);
            assert_eq!(row[9], "");
            assert_eq!(row[10], "");
        }
    }

    #[test]
    fn test_fault_stops_the_loop() {
        let rig = SimRig::new(SimConfig::instant());
        rig.add_motor(1, 0.0);
        rig.add_motor(2, 0.0);

        let mut cables = rig.cable_rig();
        cables.prepare().unwrap();

        let bad = TrajectorySpec::Cosine { amplitude_deg: std::f64::NAN, frequency_hz: 1.0 };
        let trajs = [
            Trajectory::new(TrajectorySpec::Hold, 0.0),
            Trajectory::new(bad, 0.0)
        ];
        let params = ExecParams {
            frequency_hz: 10.0,
            duration_s: 1.0,
            rate_policy: RatePolicy::Paced,
            speed_limit_rads: [6.0, 6.0]
        };

        let mut arch = temp_archive("fault", &CSV_HEADER);
        assert!(matches!(
            execute(&mut cables, &trajs, &params, &mut arch, &mut [None, None]),
            Err(TrajError::Fault { .. })
        ));

        // Nothing was commanded on the faulting tick
        assert_eq!(arch.num_records(), 0);
        assert_eq!(cables.commanded(), [None, None]);
    }
}
