//! # Acquisition Orchestrator
//!
//! Runs one experiment from start to finish:
//!
//! 1. instantiate every configured device, a failure disabling only that device
//! 2. pretension the cables if both the motors and their gauges are present
//! 3. freeze the home angles and build the absolute trajectories from them
//! 4. hold at the operator's start barrier
//! 5. start one worker per device and join them all
//! 6. tear every device down in reverse construction order
//!
//! Devices are constructed in the order gauges, motors, F/T sensor, motion capture. The
//! orchestrator owns every device outside of the workers.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod factory;
pub mod operator;
pub mod workers;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{error, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Sender};
use std::time::{Duration, Instant};
use util::module::State;

use crate::cable_rig::{CableRig, NUM_CABLES};
use crate::can_bus::CanBus;
use crate::ft_sensor::FtSensor;
use crate::gauge::TensionGauge;
use crate::mocap_client::MocapClient;
use crate::motor::Motor;
use crate::params::{DeviceId, ExpParams};
use crate::pretension::{self, driver::Outcome, PretensionError, Pretensioner};
use crate::traj::{executor::ExecParams, Trajectory};

pub use factory::{DeviceFactory, HardwareFactory, SimFactory};
pub use operator::{AutoOperator, CapChoice, ConsoleOperator, Operator};
pub use workers::WorkerReport;
use workers::Worker;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Everything that happened in one experiment, saved as `report.json`.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub exit_code: ExitCode,

    pub devices: Vec<DeviceInit>,

    pub pretension: Option<Outcome>,

    pub pretension_error: Option<String>,

    pub workers: Vec<WorkerReport>,

    /// Units: seconds
    pub elapsed_s: f64
}

/// Result of constructing one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInit {
    pub device: DeviceId,

    pub ok: bool,

    pub error: Option<String>
}

/// Devices held by the orchestrator.
#[derive(Default)]
struct Devices {
    /// Gauges not fitted to the rig, by configured index
    gauges: Vec<(usize, TensionGauge)>,

    rig: Option<CableRig>,

    /// Motor angles when the rig was prepared
    start_rad: [f64; NUM_CABLES],

    ft: Option<FtSensor>,

    mocap: Option<MocapClient>
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Verdict on one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Success,

    /// Stopped early but what was acquired is valid, for example on a full buffer
    Partial,

    Failed,

    /// Never started because the experiment was aborted
    OperatorAbort
}

/// Exit code of the experiment, the worst of everything that happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCode {
    Success = 0,

    /// The operator declined to continue with a subset of devices, or at the start barrier
    OperatorAbort = 1,

    /// Pretensioning failed and the experiment was aborted
    PretensionAbort = 2,

    /// At least one worker failed
    WorkerFailed = 3,

    /// A required device could not be started
    RequiredDeviceFailed = 4
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ExitCode {
    pub fn code(&self) -> i32 {
        *self as i32
    }
}

impl Summary {
    fn new() -> Self {
        Self {
            exit_code: ExitCode::Success,
            devices: Vec::new(),
            pretension: None,
            pretension_error: None,
            workers: Vec::new(),
            elapsed_s: 0.0
        }
    }

    /// Raise the exit code to `code` if it is worse than the current one.
    fn escalate(&mut self, code: ExitCode) {
        self.exit_code = self.exit_code.max(code);
    }

    fn failed_devices(&self) -> Vec<DeviceId> {
        self.devices.iter().filter(|d| !d.ok).map(|d| d.device).collect()
    }

    /// Log the per-device and per-worker verdicts.
    pub fn log(&self) {
        info!("---- EXPERIMENT SUMMARY ----");
        for d in self.devices.iter() {
            match d.error {
                Some(ref e) => warn!("  {:<8} init failed: {}", d.device, e),
                None => info!("  {:<8} init ok", d.device)
            }
        }
        if let Some(ref p) = self.pretension {
            info!(
                "  pretension settled in {} iterations at {:.3} N and {:.3} N",
                p.iterations, p.tensions_n[0].abs(), p.tensions_n[1].abs()
            );
        }
        if let Some(ref e) = self.pretension_error {
            warn!("  pretension failed: {}", e);
        }
        for w in self.workers.iter() {
            info!(
                "  {:<8} {:?}: {} rows, {} faults in {:.2} s{}",
                w.device, w.verdict, w.rows, w.faults, w.elapsed_s,
                w.message.as_ref().map(|m| format!(" ({})", m)).unwrap_or_default()
            );
        }
        info!("  exit code {} ({:?}) after {:.1} s", self.exit_code.code(), self.exit_code, self.elapsed_s);
    }
}

impl Devices {
    /// Tear everything down in reverse construction order.
    fn teardown(&mut self) {
        info!("Tearing down devices");

        if let Some(mut m) = self.mocap.take() {
            m.close();
        }
        if let Some(mut ft) = self.ft.take() {
            ft.close();
        }
        if let Some(mut rig) = self.rig.take() {
            rig.shutdown();
        }
        for (_, g) in self.gauges.iter_mut().rev() {
            g.close();
        }
        self.gauges.clear();
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Run an experiment, writing every CSV into `exp_dir`.
///
/// An unusable duration ends the experiment before any device is started, as nothing could be
/// acquired.
pub fn run(
    params: &ExpParams,
    exp_dir: &Path,
    factory: &mut dyn DeviceFactory,
    operator: &mut dyn Operator
) -> Summary {
    let t0 = Instant::now();
    let mut summary = Summary::new();

    let duration = match params.duration() {
        Ok(d) => d,
        Err(e) => {
            error!("Cannot run the experiment: {}", e);
            summary.escalate(ExitCode::RequiredDeviceFailed);
            return summary
        }
    };

    let mut devices = instantiate(params, factory, &mut summary);

    if let Err(code) = proceed(params, duration, exp_dir, operator, &mut devices, &mut summary) {
        summary.escalate(code);
    }

    devices.teardown();

    summary.elapsed_s = t0.elapsed().as_secs_f64();
    summary
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Construct every configured device, recording the outcome of each.
fn instantiate(
    params: &ExpParams,
    factory: &mut dyn DeviceFactory,
    summary: &mut Summary
) -> Devices {
    let mut devices = Devices::default();
    let mut record = |device: DeviceId, error: Option<String>| {
        if let Some(ref e) = error {
            error!("[{}] Failed to start: {}", device, e);
        }
        summary.devices.push(DeviceInit {
            device,
            ok: error.is_none(),
            error
        });
    };

    // ---- GAUGES ----

    let mut gauge_slots: Vec<Option<TensionGauge>> = Vec::new();
    if let Some(ref gp) = params.gauges {
        let mut errors = Vec::new();

        for (i, port) in gp.ports.iter().enumerate() {
            match factory.gauge(i, port, gp) {
                Ok(mut g) => {
                    g.calibrate(gp.timing_samples);
                    gauge_slots.push(Some(g));
                },
                Err(e) => {
                    errors.push(format!("{}: {}", factory::gauge_tag(i), e));
                    gauge_slots.push(None);
                }
            }
        }

        record(DeviceId::Gauges, match errors.is_empty() {
            true => None,
            false => Some(errors.join("; "))
        });
    }

    // ---- MOTORS ----

    if let (Some(m1), Some(m2)) = (&params.motor1, &params.motor2) {
        let mut fitted = [None, None];
        for (i, slot) in fitted.iter_mut().enumerate() {
            if let Some(g) = gauge_slots.get_mut(i) {
                *slot = g.take();
            }
        }

        match build_rig(params, factory, [m1.clone(), m2.clone()], fitted) {
            Ok((rig, start_rad)) => {
                devices.rig = Some(rig);
                devices.start_rad = start_rad;
                record(DeviceId::Motors, None);
            },
            Err((e, mut gauges)) => {
                // Gauges go back to sampling on their own
                for (slot, g) in gauge_slots.iter_mut().zip(gauges.iter_mut()) {
                    if g.is_some() {
                        *slot = g.take();
                    }
                }
                record(DeviceId::Motors, Some(e));
            }
        }
    }

    devices.gauges = gauge_slots.into_iter()
        .enumerate()
        .filter_map(|(i, g)| g.map(|g| (i, g)))
        .collect();

    // ---- F/T SENSOR ----

    if let Some(ref ap) = params.ati {
        match factory.voltage_source(ap) {
            Ok(source) => {
                devices.ft = Some(FtSensor::new(source, ap, params.duration_s));
                record(DeviceId::Ati, None);
            },
            Err(e) => record(DeviceId::Ati, Some(e.to_string()))
        }
    }

    // ---- MOTION CAPTURE ----

    if let Some(ref mp) = params.mocap {
        let client = MocapClient::connect(mp).and_then(|mut c| {
            c.setup(params.duration_s)?;
            Ok(c)
        });

        match client {
            Ok(c) => {
                devices.mocap = Some(c);
                record(DeviceId::Mocap, None);
            },
            Err(e) => record(DeviceId::Mocap, Some(e.to_string()))
        }
    }

    devices
}

/// Open the bus and put both motors in position mode.
///
/// On failure the fitted gauges are handed back.
fn build_rig(
    params: &ExpParams,
    factory: &mut dyn DeviceFactory,
    motor_params: [crate::motor::Params; NUM_CABLES],
    gauges: [Option<TensionGauge>; NUM_CABLES]
) -> Result<(CableRig, [f64; NUM_CABLES]), (String, [Option<TensionGauge>; NUM_CABLES])> {
    let can_params = match params.can {
        Some(ref c) => c.clone(),
        None => return Err((String::from("no [can] table"), gauges))
    };

    let iface = match factory.can_interface(&can_params) {
        Ok(i) => i,
        Err(e) => return Err((e.to_string(), gauges))
    };

    let [p1, p2] = motor_params;
    let mut rig = CableRig::new(
        CanBus::new(iface, can_params),
        [Motor::new(&factory::motor_tag(0), p1), Motor::new(&factory::motor_tag(1), p2)],
        gauges
    );

    match rig.prepare() {
        Ok(start_rad) => Ok((rig, start_rad)),
        Err(e) => {
            let gauges = [rig.gauges[0].take(), rig.gauges[1].take()];
            rig.shutdown();
            Err((e.to_string(), gauges))
        }
    }
}

/// Everything between instantiation and teardown. An `Err` ends the experiment with that code.
fn proceed(
    params: &ExpParams,
    duration: Duration,
    exp_dir: &Path,
    operator: &mut dyn Operator,
    devices: &mut Devices,
    summary: &mut Summary
) -> Result<(), ExitCode> {
    // ---- DEVICE POLICY ----

    let failed = summary.failed_devices();
    if let Some(d) = failed.iter().find(|d| params.is_required(**d)) {
        error!("Required device {} failed to start", d);
        return Err(ExitCode::RequiredDeviceFailed)
    }
    if !failed.is_empty() && !operator.confirm_partial(&failed) {
        info!("Aborted by the operator");
        return Err(ExitCode::OperatorAbort)
    }

    // ---- PRETENSION ----

    let mut trajs = None;
    if let Some(ref mut rig) = devices.rig {
        let home = match pretension_phase(rig, &params.pretension, devices.start_rad, operator) {
            Ok(outcome) => {
                let home = outcome.home_rad;
                summary.pretension = Some(outcome);
                home
            },
            Err(e) => {
                summary.pretension_error = Some(e.to_string());
                return Err(ExitCode::PretensionAbort)
            }
        };

        trajs = Some(build_trajectories(rig, home, params.duration_s));
    }

    // ---- BARRIER ----

    if !operator.barrier() {
        info!("Aborted at the start barrier");
        return Err(ExitCode::OperatorAbort)
    }

    // ---- WORKERS ----

    let dir = PathBuf::from(exp_dir);
    let mut starters: Vec<Sender<()>> = Vec::new();
    let mut spawn_failures = Vec::new();

    macro_rules! start_worker {
        ($device:expr, $dev:expr, $body:expr) => {{
            let (tx, rx) = channel();
            match Worker::spawn($device, $dev, rx, $body) {
                Ok(w) => {
                    starters.push(tx);
                    Some(w)
                },
                Err(e) => {
                    spawn_failures.push(($device, e.to_string()));
                    None
                }
            }
        }};
    }

    let ati_worker = devices.ft.take().and_then(|ft| {
        let dir = dir.clone();
        start_worker!(DeviceId::Ati, ft, move |ft: &mut FtSensor| workers::run_ati(ft, duration, &dir))
    });

    let mocap_worker = devices.mocap.take().and_then(|client| {
        let dir = dir.clone();
        start_worker!(DeviceId::Mocap, client, move |c: &mut MocapClient| workers::run_mocap(c, &dir))
    });

    let motor_worker = match (devices.rig.take(), trajs) {
        (Some(rig), Some(trajs)) => {
            let exec = exec_params(params, &rig);
            let dir = dir.clone();
            start_worker!(DeviceId::Motors, rig, move |rig: &mut CableRig| {
                workers::run_motors(rig, &trajs, &exec, &dir)
            })
        },
        (rig, _) => {
            devices.rig = rig;
            None
        }
    };

    // Gauges not fitted to a running rig sample on their own
    let gauge_worker = match (devices.gauges.is_empty(), &params.gauges) {
        (false, Some(gp)) => {
            let (indices, gauges): (Vec<usize>, Vec<TensionGauge>) =
                devices.gauges.drain(..).unzip();
            let rate_hz = gp.rate_hz;
            let dir = dir.clone();
            start_worker!(DeviceId::Gauges, gauges, move |g: &mut Vec<TensionGauge>| {
                workers::run_gauges(g, &indices, rate_hz, duration, &dir)
            })
        },
        _ => None
    };

    info!("Starting {} workers", starters.len());
    for tx in starters.iter() {
        tx.send(()).ok();
    }

    for (device, e) in spawn_failures {
        summary.workers.push(WorkerReport {
            message: Some(format!("cannot spawn worker: {}", e)),
            ..WorkerReport::new(device, Verdict::Failed)
        });
    }

    // ---- JOIN ----

    if let Some(w) = ati_worker {
        let (ft, report) = w.join();
        devices.ft = ft;
        summary.workers.push(report);
    }
    if let Some(w) = mocap_worker {
        let (client, report) = w.join();
        devices.mocap = client;
        summary.workers.push(report);
    }
    if let Some(w) = motor_worker {
        let (rig, report) = w.join();
        devices.rig = rig;
        summary.workers.push(report);
    }
    if let Some(w) = gauge_worker {
        let (gauges, report) = w.join();
        // Indices only matter for file names, which are written by now
        devices.gauges = gauges.unwrap_or_default().into_iter().enumerate().collect();
        summary.workers.push(report);
    }

    if summary.workers.iter().any(|w| w.verdict == Verdict::Failed) {
        return Err(ExitCode::WorkerFailed)
    }

    Ok(())
}

/// Pretension the cables, or take the current angles as home if a cable has no gauge.
fn pretension_phase(
    rig: &mut CableRig,
    params: &pretension::Params,
    start_rad: [f64; NUM_CABLES],
    operator: &mut dyn Operator
) -> Result<Outcome, PretensionError> {
    if !rig.has_gauges() {
        warn!("Not every cable has a gauge, skipping pretension and homing at the current angles");
        for (m, a) in rig.motors.iter_mut().zip(start_rad.iter()) {
            m.set_home(*a)?;
        }
        return Ok(Outcome {
            home_rad: start_rad,
            tensions_n: [std::f64::NAN; NUM_CABLES],
            iterations: 0
        })
    }

    let mut ctrl = Pretensioner::new(params.clone());
    let directions = pretension::driver::resolve_directions(rig, params)?;
    ctrl.init(directions)?;

    loop {
        match pretension::driver::run(rig, &mut ctrl, start_rad) {
            Err(PretensionError::IterationCap(n)) => match operator.on_pretension_cap(n) {
                CapChoice::Continue => ctrl.extend(params.max_iterations),
                CapChoice::Abort => {
                    error!("Pretension aborted after {} iterations", n);
                    return Err(PretensionError::IterationCap(n))
                }
            },
            Err(e) => {
                error!("Pretension failed: {}", e);
                return Err(e)
            },
            Ok(outcome) => return Ok(outcome)
        }
    }
}

/// Absolute trajectories from the frozen home angles.
fn build_trajectories(
    rig: &CableRig,
    home: [f64; NUM_CABLES],
    duration_s: f64
) -> [Trajectory; NUM_CABLES] {
    let spec = |i: usize| rig.motors[i].params().trajectory.clone().with_default_duration(duration_s);
    let trajs = [
        Trajectory::new(spec(0), home[0]),
        Trajectory::new(spec(1), home[1])
    ];

    for (t, m) in trajs.iter().zip(rig.motors.iter()) {
        if !t.spec.starts_at_base() {
            warn!(
                "[{}] {:?} does not start at home, the motor will step at t = 0",
                m.tag(), t.spec
            );
        }
    }

    trajs
}

fn exec_params(params: &ExpParams, rig: &CableRig) -> ExecParams {
    ExecParams {
        frequency_hz: params.motors_frequency_hz,
        duration_s: params.duration_s,
        rate_policy: params.rate_policy,
        speed_limit_rads: [
            rig.motors[0].params().speed_limit_rads,
            rig.motors[1].params().speed_limit_rads
        ]
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::eqpt::mocap::{self, CaptureMatrix, DataHeader, MocapStatus};
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::thread;
    use crate::sim::{GaugeModel, SimConfig, SimRig};

    /// Answers from a script, recording every prompt.
    struct Scripted {
        partial: bool,
        cap: CapChoice,
        barrier: bool,
        prompts: Vec<&'static str>
    }

    impl Scripted {
        fn yes() -> Self {
            Self {
                partial: true,
                cap: CapChoice::Abort,
                barrier: true,
                prompts: Vec::new()
            }
        }
    }

    impl Operator for Scripted {
        fn confirm_partial(&mut self, _failed: &[DeviceId]) -> bool {
            self.prompts.push("partial");
            self.partial
        }

        fn on_pretension_cap(&mut self, _iterations: usize) -> CapChoice {
            self.prompts.push("cap");
            self.cap
        }

        fn barrier(&mut self) -> bool {
            self.prompts.push("barrier");
            self.barrier
        }
    }

    fn exp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("acquisition_{}_{}", name, std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn line_count(path: &Path) -> usize {
        std::fs::read_to_string(path).unwrap().lines().count()
    }

    /// Serve one capture of 500 rows, sending only `send_bytes` of its samples.
    fn mocap_server(send_bytes: usize) -> (u16, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            let (mut s, _): (TcpStream, _) = listener.accept().unwrap();
            for _ in 0..3 {
                mocap::read_request(&mut s).unwrap();
                mocap::write_status(&mut s, &MocapStatus::new("ok")).unwrap();
            }

            let columns = mocap::column_names(&[(String::from("arm"), String::from("arm"))]);
            if send_bytes == 500 * 7 * 8 {
                let data = (0..500 * 7).map(|i| i as f64).collect();
                mocap::write_data(&mut s, &CaptureMatrix::new(columns, data).unwrap()).unwrap();
            }
            else {
                let header = serde_json::to_vec(&columns).unwrap();
                DataHeader {
                    data_size: 500 * 7 * 8,
                    rows: 500,
                    cols: 7,
                    header_size: header.len() as u32
                }.write_to(&mut s).unwrap();
                s.write_all(&header).unwrap();
                s.write_all(&vec![0u8; send_bytes]).unwrap();
            }
        });

        (port, handle)
    }

    fn motor_toml() -> &'static str {
        r#"
        motors_frequency_hz = 100.0

        [gauges]
        ports = ["sim0", "sim1"]
        timing_samples = 2

        [can]
        interface = "sim"
        recv_timeout_ms = 5

        [motor1]
        id = 127
        direction = 1
        status_retry_delay_ms = 0
        trajectory = { type = "ramp", axis = "y", max_deg = 0.0, duration_s = 1.0 }

        [motor2]
        id = 126
        direction = -1
        status_retry_delay_ms = 0
        trajectory = { type = "sine", amplitude_deg = 5.0, frequency_hz = 0.5, start_delay_s = 0.2 }

        [pretension]
        target_tension_n = 2.0
        wait_s = 0.0
        max_iterations = 50
        "#
    }

    #[test]
    fn test_full_run() {
        let (port, server) = mocap_server(500 * 7 * 8);
        let params: ExpParams = util::params::from_str(&format!(r#"
            duration_s = 0.5
            {}
            [ati]
            channels = "Dev1/ai0:5"
            rate_hz = 200.0
            bias_samples = 10

            [mocap]
            host = "127.0.0.1"
            port = {}
        "#, motor_toml(), port)).unwrap();
        params.are_valid().unwrap();

        let dir = exp_dir("full");
        let config = SimConfig {
            daq_paced: true,
            ..SimConfig::instant()
        };
        let mut factory = SimFactory::from_params(&params, config);
        let mut op = Scripted::yes();

        let summary = run(&params, &dir, &mut factory, &mut op);
        server.join().unwrap();

        assert_eq!(summary.exit_code, ExitCode::Success, "{:#?}", summary);
        assert_eq!(op.prompts, vec!["barrier"]);
        assert_eq!(summary.workers.len(), 3);
        assert!(summary.workers.iter().all(|w| w.verdict == Verdict::Success));

        // Pretension settled on the 20 N/rad simulated cables
        let p = summary.pretension.unwrap();
        assert!(p.tensions_n.iter().all(|t| (t.abs() - 2.0).abs() <= 0.15), "{:?}", p);

        // About 50 ticks at 100 Hz, the per-gauge files have a row per tick
        let traj_lines = line_count(&dir.join("motor_trajectory.csv"));
        assert!(traj_lines >= 40 && traj_lines <= 52, "{} lines", traj_lines);
        assert_eq!(line_count(&dir.join("tension_1.csv")), traj_lines);
        assert_eq!(line_count(&dir.join("tension_2.csv")), traj_lines);

        assert!(line_count(&dir.join("ati_data.csv")) > 50);
        assert_eq!(line_count(&dir.join("vicon_data.csv")), 501);

        // Torn down
        assert!(!factory.rig().motor(127).unwrap().enabled);
        assert!(!factory.rig().motor(126).unwrap().enabled);
    }

    #[test]
    fn test_pretension_abort() {
        let params: ExpParams = util::params::from_str(&format!(
            "duration_s = 1.0\n{}", motor_toml()
        )).unwrap();

        // Both gauges stuck at 0 N
        let rig = SimRig::new(SimConfig::instant());
        rig.add_motor(127, 0.0);
        rig.add_motor(126, 0.0);
        rig.add_gauge(GaugeModel::linear(127, 0.0, 1.0));
        rig.add_gauge(GaugeModel::linear(126, 0.0, -1.0));

        let dir = exp_dir("pretension_abort");
        let mut factory = SimFactory::new(rig);
        let mut op = Scripted::yes();

        let summary = run(&params, &dir, &mut factory, &mut op);

        assert_eq!(summary.exit_code, ExitCode::PretensionAbort);
        assert_eq!(summary.exit_code.code(), 2);
        assert_eq!(op.prompts, vec!["cap"]);
        assert!(summary.workers.is_empty());
        assert!(summary.pretension_error.is_some());

        assert!(!dir.join("motor_trajectory.csv").exists());
        assert!(!dir.join("tension_1.csv").exists());
        assert!(!factory.rig().motor(127).unwrap().enabled);
    }

    #[test]
    fn test_mocap_short_payload() {
        let (port, server) = mocap_server(27992);
        let params: ExpParams = util::params::from_str(&format!(r#"
            duration_s = 0.3
            [ati]
            channels = "Dev1/ai0:5"
            rate_hz = 100.0
            bias_samples = 0

            [mocap]
            host = "127.0.0.1"
            port = {}
        "#, port)).unwrap();

        let dir = exp_dir("short_payload");
        let mut factory = SimFactory::from_params(&params, SimConfig::realistic());
        let mut op = Scripted::yes();

        let summary = run(&params, &dir, &mut factory, &mut op);
        server.join().unwrap();

        assert_eq!(summary.exit_code, ExitCode::WorkerFailed);
        let verdict = |d| summary.workers.iter().find(|w| w.device == d).unwrap().verdict;
        assert_eq!(verdict(DeviceId::Mocap), Verdict::Failed);
        assert_eq!(verdict(DeviceId::Ati), Verdict::Success);

        assert!(!dir.join("vicon_data.csv").exists());
        assert!(line_count(&dir.join("ati_data.csv")) > 1);
    }

    #[test]
    fn test_gauges_sample_alone_when_motors_fail() {
        // No [can] table, the rig cannot be built and hands its gauges back
        let params: ExpParams = util::params::from_str(r#"
            duration_s = 0.2

            [gauges]
            ports = ["sim0", "sim1"]
            rate_hz = 50.0
            timing_samples = 2

            [motor1]
            id = 127
            direction = 1

            [motor2]
            id = 126
            direction = -1
        "#).unwrap();

        let dir = exp_dir("motors_failed");
        let mut factory = SimFactory::from_params(&params, SimConfig::instant());
        let mut op = Scripted::yes();

        let summary = run(&params, &dir, &mut factory, &mut op);

        assert_eq!(summary.exit_code, ExitCode::Success, "{:#?}", summary);
        assert_eq!(op.prompts, vec!["partial", "barrier"]);
        assert_eq!(summary.failed_devices(), vec![DeviceId::Motors]);

        let gauges = summary.workers.iter().find(|w| w.device == DeviceId::Gauges).unwrap();
        assert_eq!(gauges.verdict, Verdict::Success);

        assert!(!dir.join("motor_trajectory.csv").exists());
        assert!(line_count(&dir.join("tension_1.csv")) > 1);
        assert!(line_count(&dir.join("tension_2.csv")) > 1);
    }

    #[test]
    fn test_unusable_duration() {
        let mut factory = SimFactory::new(SimRig::new(SimConfig::instant()));

        for duration in ["-1.0", "nan", "inf", "1e300"].iter() {
            let params: ExpParams = util::params::from_str(&format!(
                "duration_s = {}\n[ati]\nchannels = \"Dev1/ai0:5\"\n", duration
            )).unwrap();
            let mut op = Scripted::yes();

            let summary = run(&params, &exp_dir("bad_duration"), &mut factory, &mut op);

            assert_eq!(summary.exit_code, ExitCode::RequiredDeviceFailed, "{}", duration);
            assert!(summary.devices.is_empty());
            assert!(op.prompts.is_empty());
        }
    }

    #[test]
    fn test_device_policy() {
        // Nothing listens on the mocap port
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let toml = |required: &str| format!(r#"
            duration_s = 0.2
            required_devices = [{}]
            [ati]
            channels = "Dev1/ai0:5"
            rate_hz = 100.0
            bias_samples = 0

            [mocap]
            host = "127.0.0.1"
            port = {}
            connect_timeout_ms = 200
        "#, required, port);

        // Required device missing, no prompt
        let params: ExpParams = util::params::from_str(&toml("\"mocap\"")).unwrap();
        let mut factory = SimFactory::from_params(&params, SimConfig::instant());
        let mut op = Scripted::yes();
        let summary = run(&params, &exp_dir("required"), &mut factory, &mut op);
        assert_eq!(summary.exit_code, ExitCode::RequiredDeviceFailed);
        assert_eq!(summary.exit_code.code(), 4);
        assert!(op.prompts.is_empty());

        // Operator declines to go on without it
        let params: ExpParams = util::params::from_str(&toml("")).unwrap();
        let mut op = Scripted {
            partial: false,
            ..Scripted::yes()
        };
        let dir = exp_dir("declined");
        let summary = run(&params, &dir, &mut factory, &mut op);
        assert_eq!(summary.exit_code, ExitCode::OperatorAbort);
        assert_eq!(op.prompts, vec!["partial"]);
        assert!(!dir.join("ati_data.csv").exists());

        // Operator aborts at the barrier
        let mut op = Scripted {
            barrier: false,
            ..Scripted::yes()
        };
        let summary = run(&params, &dir, &mut factory, &mut op);
        assert_eq!(summary.exit_code, ExitCode::OperatorAbort);
        assert_eq!(op.prompts, vec!["partial", "barrier"]);
        assert!(summary.workers.is_empty());
    }
}
