//! Device workers
//!
//! One thread per device. A worker owns its device for the run, waits for the start signal, runs
//! the device's acquisition loop and hands the device back when joined so the orchestrator can
//! tear it down. Workers share nothing but the logger.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{error, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use util::archive::Archiver;

use super::Verdict;
use crate::cable_rig::{CableRig, NUM_CABLES};
use crate::ft_sensor::{self, FtSensor, StopReason};
use crate::gauge::{self, TensionGauge};
use crate::mocap_client::{self, MocapClient};
use crate::params::DeviceId;
use crate::traj::{executor::{self, ExecParams}, Trajectory};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Outcome of one worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub device: DeviceId,

    pub verdict: Verdict,

    /// Rows written to the device's main CSV
    pub rows: usize,

    /// Faults recovered from within the loop
    pub faults: u64,

    pub message: Option<String>,

    /// Units: seconds
    pub elapsed_s: f64
}

/// A running worker, giving back its device when joined.
pub struct Worker<D> {
    pub device: DeviceId,

    handle: JoinHandle<(D, WorkerReport)>
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl WorkerReport {
    pub fn new(device: DeviceId, verdict: Verdict) -> Self {
        Self {
            device,
            verdict,
            rows: 0,
            faults: 0,
            message: None,
            elapsed_s: 0.0
        }
    }

    fn failed<S: ToString>(device: DeviceId, message: S) -> Self {
        let message = message.to_string();
        error!("[{}] {}", device, message);

        Self {
            message: Some(message),
            ..Self::new(device, Verdict::Failed)
        }
    }
}

impl<D: Send + 'static> Worker<D> {
    /// Spawn a worker running `body` on `dev` once the start signal arrives.
    ///
    /// If the start sender is dropped without a signal the body never runs. On a spawn failure
    /// the device is lost with the thread.
    pub fn spawn<F>(
        device: DeviceId,
        dev: D,
        start: Receiver<()>,
        body: F
    ) -> Result<Self, std::io::Error>
    where
        F: FnOnce(&mut D) -> WorkerReport + Send + 'static
    {
        let handle = thread::Builder::new()
            .name(format!("{}{}", device, util::logger::WORKER_THREAD_SUFFIX))
            .spawn(move || {
                let mut dev = dev;

                if start.recv().is_err() {
                    return (dev, WorkerReport::new(device, Verdict::OperatorAbort))
                }

                let t0 = Instant::now();
                let mut report = body(&mut dev);
                report.elapsed_s = t0.elapsed().as_secs_f64();

                (dev, report)
            })?;

        Ok(Self {
            device,
            handle
        })
    }

    /// Wait for the worker to finish. `None` for the device if the worker panicked.
    pub fn join(self) -> (Option<D>, WorkerReport) {
        match self.handle.join() {
            Ok((dev, report)) => (Some(dev), report),
            Err(_) => (None, WorkerReport::failed(self.device, "worker panicked"))
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Run both trajectories, logging every tension read to the per-gauge CSVs too.
pub fn run_motors(
    rig: &mut CableRig,
    trajs: &[Trajectory; NUM_CABLES],
    params: &ExecParams,
    exp_dir: &Path
) -> WorkerReport {
    let mut archive = match Archiver::create(
        exp_dir.join(executor::CSV_FILE_NAME), &executor::CSV_HEADER
    ) {
        Ok(a) => a,
        Err(e) => return WorkerReport::failed(DeviceId::Motors, e)
    };

    let mut tension_archives: [Option<Archiver>; NUM_CABLES] = [None, None];
    for (i, slot) in tension_archives.iter_mut().enumerate() {
        if rig.gauges[i].is_some() {
            *slot = open_tension_archive(exp_dir, i);
        }
    }

    match executor::execute(rig, trajs, params, &mut archive, &mut tension_archives) {
        Ok(r) => WorkerReport {
            rows: r.rows,
            faults: r.command_faults + r.status_faults + r.bad_tensions,
            ..WorkerReport::new(DeviceId::Motors, Verdict::Success)
        },
        Err(e) => WorkerReport {
            rows: archive.num_records(),
            ..WorkerReport::failed(DeviceId::Motors, e)
        }
    }
}

/// Sample the gauges on their own, `indices[i]` being the position of `gauges[i]` among the
/// configured ports.
pub fn run_gauges(
    gauges: &mut [TensionGauge],
    indices: &[usize],
    rate_hz: f64,
    duration: Duration,
    exp_dir: &Path
) -> WorkerReport {
    let mut archives = Vec::with_capacity(indices.len());
    for i in indices.iter() {
        match open_tension_archive(exp_dir, *i) {
            Some(a) => archives.push(a),
            None => return WorkerReport::failed(
                DeviceId::Gauges, format!("cannot create {}", gauge::csv_file_name(*i))
            )
        }
    }

    match gauge::acquire(gauges, &mut archives, rate_hz, duration) {
        Ok(r) => WorkerReport {
            rows: r.rows.iter().copied().min().unwrap_or(0),
            faults: r.bad_reads,
            ..WorkerReport::new(DeviceId::Gauges, Verdict::Success)
        },
        Err(e) => WorkerReport::failed(DeviceId::Gauges, e)
    }
}

/// Acquire from the F/T sensor. A full buffer ends the run early as a partial success.
pub fn run_ati(ft: &mut FtSensor, duration: Duration, exp_dir: &Path) -> WorkerReport {
    let mut archive = match Archiver::create(
        exp_dir.join(ft_sensor::CSV_FILE_NAME), &ft_sensor::CSV_HEADER
    ) {
        Ok(a) => a,
        Err(e) => return WorkerReport::failed(DeviceId::Ati, e)
    };

    match ft.acquire(duration, &mut archive) {
        Ok(r) => {
            let (verdict, message) = match r.stop {
                StopReason::Duration => (Verdict::Success, None),
                StopReason::BufferFull => (
                    Verdict::Partial,
                    Some(format!("buffer of {} rows full before the end", r.allocated_rows))
                )
            };

            WorkerReport {
                rows: r.rows,
                faults: r.read_faults,
                message,
                ..WorkerReport::new(DeviceId::Ati, verdict)
            }
        },
        Err(e) => WorkerReport::failed(DeviceId::Ati, e)
    }
}

/// Run the capture set up on the client. No CSV is written unless the whole capture arrives.
pub fn run_mocap(client: &mut MocapClient, exp_dir: &Path) -> WorkerReport {
    match client.run_capture(exp_dir.join(mocap_client::CSV_FILE_NAME)) {
        Ok(r) => {
            info!("[mocap] Capture saved, {} rows x {} columns", r.rows, r.cols);
            WorkerReport {
                rows: r.rows,
                ..WorkerReport::new(DeviceId::Mocap, Verdict::Success)
            }
        },
        Err(e) => WorkerReport::failed(DeviceId::Mocap, e)
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn open_tension_archive(exp_dir: &Path, index: usize) -> Option<Archiver> {
    let path: PathBuf = exp_dir.join(gauge::csv_file_name(index));

    match Archiver::create(&path, &gauge::CSV_HEADER) {
        Ok(a) => Some(a),
        Err(e) => {
            warn!("[{}] Cannot create {:?}: {}", super::factory::gauge_tag(index), path, e);
            None
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn test_worker_start_signal() {
        let (tx, rx) = channel();
        let worker = Worker::spawn(DeviceId::Ati, 5u32, rx, |n| {
            *n += 1;
            WorkerReport {
                rows: *n as usize,
                ..WorkerReport::new(DeviceId::Ati, Verdict::Success)
            }
        }).unwrap();

        tx.send(()).unwrap();
        let (dev, report) = worker.join();
        assert_eq!(dev, Some(6));
        assert_eq!(report.rows, 6);
        assert_eq!(report.verdict, Verdict::Success);

        // Dropping the sender cancels before the body runs
        let (tx, rx) = channel::<()>();
        let worker = Worker::spawn(DeviceId::Mocap, 5u32, rx, |_| unreachable!()).unwrap();
        drop(tx);
        let (dev, report) = worker.join();
        assert_eq!(dev, Some(5));
        assert_eq!(report.verdict, Verdict::OperatorAbort);
    }

    #[test]
    fn test_worker_panic() {
        let (tx, rx) = channel();
        let worker = Worker::spawn(DeviceId::Gauges, (), rx, |_| panic!("boom")).unwrap();
        tx.send(()).unwrap();

        let (dev, report) = worker.join();
        assert!(dev.is_none());
        assert_eq!(report.verdict, Verdict::Failed);
    }
}
