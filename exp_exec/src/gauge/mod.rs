//! # Tension Gauge Driver
//!
//! Inline force gauges queried over a serial link. Each read writes the probe sequence, then
//! reads a short ASCII reply whose first signed decimal literal is the force. Probe and reply are
//! strictly serial on the port.
//!
//! A read never fails: an empty reply, a timeout or an unparseable reply gives `NaN` and bumps
//! the gauge's error counter. Bad reads are not logged one by one.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use conquer_once::Lazy;
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;
use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};
use util::archive::{ArchiveError, Archiver};
use util::time::unix_timestamp_s;

pub use params::*;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Header of every per-gauge CSV.
pub const CSV_HEADER: [&str; 2] = ["timestamp", "force"];

// ---------------------------------------------------------------------------
// STATICS
// ---------------------------------------------------------------------------

/// First signed decimal literal in a reply.
static FORCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?")
        .expect("force pattern is a valid regex")
});

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A serial link to a gauge.
pub trait GaugePort: Read + Write + Send {}

impl<T: Read + Write + Send> GaugePort for T {}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A tension gauge on a serial port.
pub struct TensionGauge {
    tag: String,

    port_name: String,

    port: Option<Box<dyn GaugePort>>,

    probe: Vec<u8>,

    sign: TensionSign,

    max_reply_len: usize,

    target_rate_hz: f64,

    last_force_n: f64,

    effective_rate_hz: Option<f64>,

    stats: GaugeStats
}

/// A per-gauge `timestamp, force` row.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TensionRow {
    pub timestamp: f64,

    /// Units: Newtons
    pub force: f64
}

/// Summary of a standalone gauge acquisition.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SampleReport {
    /// Rows written for each gauge
    pub rows: Vec<usize>,

    pub bad_reads: u64,

    /// Units: seconds
    pub elapsed_s: f64
}

/// Read counters for a gauge.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct GaugeStats {
    pub reads: u64,

    /// Reads which returned `NaN`
    pub bad_reads: u64
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GaugeError {
    #[error("Cannot open serial port {0}: {1}")]
    OpenError(String, serialport::Error),

    #[error("Cannot write the tension CSV: {0}")]
    Archive(ArchiveError)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl TensionGauge {
    /// Open the gauge on the named serial port.
    pub fn open(tag: &str, port_name: &str, params: &Params) -> Result<Self, GaugeError> {
        let port = serialport::new(port_name, params.baud_rate)
            .timeout(params.timeout())
            .open()
            .map_err(|e| GaugeError::OpenError(port_name.into(), e))?;

        info!("[{}] Opened on {} at {} baud", tag, port_name, params.baud_rate);

        Ok(Self::with_port(tag, port_name, Box::new(port), params))
    }

    /// Create a gauge on an already open link.
    pub fn with_port(
        tag: &str,
        port_name: &str,
        port: Box<dyn GaugePort>,
        params: &Params
    ) -> Self {
        Self {
            tag: String::from(tag),
            port_name: String::from(port_name),
            port: Some(port),
            probe: params.probe.as_bytes().to_vec(),
            sign: params.sign,
            max_reply_len: params.max_reply_len,
            target_rate_hz: params.rate_hz,
            last_force_n: std::f64::NAN,
            effective_rate_hz: None,
            stats: GaugeStats::default()
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    pub fn stats(&self) -> GaugeStats {
        self.stats
    }

    /// Last force read, `NaN` if the last read failed.
    ///
    /// Units: Newtons
    pub fn last_force_n(&self) -> f64 {
        self.last_force_n
    }

    /// Rate estimated by [`TensionGauge::calibrate`].
    ///
    /// Units: Hertz
    pub fn effective_rate_hz(&self) -> Option<f64> {
        self.effective_rate_hz
    }

    /// Read the force on the gauge.
    ///
    /// Returns `NaN` if the gauge gave no usable reply, or if it has been closed.
    ///
    /// Units: Newtons
    pub fn read_tension(&mut self) -> f64 {
        self.stats.reads += 1;

        let force = match self.exchange() {
            Ok(reply) => match parse_force(&reply) {
                Some(f) => self.sign.apply(f),
                None => std::f64::NAN
            },
            Err(_) => std::f64::NAN
        };

        if force.is_nan() {
            self.stats.bad_reads += 1;
        }

        self.last_force_n = force;
        force
    }

    /// Measure the probe round trip over `num_probes` reads and record the effective rate.
    pub fn calibrate(&mut self, num_probes: usize) -> Option<f64> {
        if num_probes == 0 {
            return None
        }

        let start = Instant::now();
        let mut good = 0;
        for _ in 0..num_probes {
            if !self.read_tension().is_nan() {
                good += 1;
            }
        }
        let elapsed_s = start.elapsed().as_secs_f64();

        if good == 0 {
            warn!("[{}] No valid replies in {} timing probes", self.tag, num_probes);
            return None
        }

        let rate = num_probes as f64 / elapsed_s.max(1e-9);
        info!(
            "[{}] Effective rate {:.1} Hz (target {:.1} Hz, {}/{} valid replies)",
            self.tag, rate, self.target_rate_hz, good, num_probes
        );
        if rate < self.target_rate_hz {
            warn!(
                "[{}] Gauge cannot keep up with the target rate of {:.1} Hz",
                self.tag, self.target_rate_hz
            );
        }

        self.effective_rate_hz = Some(rate);
        Some(rate)
    }

    /// Close the port. Reads after closing return `NaN`.
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(
                "[{}] Closed after {} reads ({} bad)",
                self.tag, self.stats.reads, self.stats.bad_reads
            );
        }
    }

    // ---- PRIVATE ----

    /// Write the probe and read one reply line.
    fn exchange(&mut self) -> io::Result<String> {
        let port = match self.port.as_mut() {
            Some(p) => p,
            None => return Err(io::Error::new(io::ErrorKind::NotConnected, "gauge closed"))
        };

        port.write_all(&self.probe)?;
        port.flush()?;

        let mut reply = Vec::with_capacity(self.max_reply_len);
        let mut buf = [0u8; 1];

        while reply.len() < self.max_reply_len {
            match port.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    if buf[0] == b'\n' {
                        break
                    }
                    reply.push(buf[0]);
                },
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e)
            }
        }

        Ok(String::from_utf8_lossy(&reply).into_owned())
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Name of the CSV of the gauge at `index`, counting from zero.
pub fn csv_file_name(index: usize) -> String {
    format!("tension_{}.csv", index + 1)
}

/// Sample every gauge in turn at `rate_hz` for `duration`, gauge `i` into `archives[i]`.
///
/// Used when the gauges run without the motors. Each tick sleeps to the next `t0 + k / rate`
/// boundary.
pub fn acquire(
    gauges: &mut [TensionGauge],
    archives: &mut [Archiver],
    rate_hz: f64,
    duration: Duration
) -> Result<SampleReport, GaugeError> {
    let period_s = 1.0 / rate_hz;
    let mut report = SampleReport {
        rows: vec![0; gauges.len()],
        ..Default::default()
    };

    info!("Sampling {} gauges at {:.1} Hz for {:.1} s", gauges.len(), rate_hz, duration.as_secs_f64());
    let t0 = Instant::now();

    while t0.elapsed() < duration {
        for (i, (gauge, archive)) in gauges.iter_mut().zip(archives.iter_mut()).enumerate() {
            let force = gauge.read_tension();
            let timestamp = unix_timestamp_s();
            if force.is_nan() {
                report.bad_reads += 1;
            }

            archive.serialise(TensionRow { timestamp, force }).map_err(GaugeError::Archive)?;
            report.rows[i] += 1;
        }

        let now_s = t0.elapsed().as_secs_f64();
        let next_s = ((now_s / period_s).floor() + 1.0) * period_s;
        let next = Duration::from_secs_f64(next_s).min(duration);
        thread::sleep(next.checked_sub(t0.elapsed()).unwrap_or_default());
    }

    report.elapsed_s = t0.elapsed().as_secs_f64();
    if report.bad_reads > 0 {
        warn!("{} bad gauge reads during sampling", report.bad_reads);
    }

    Ok(report)
}

/// Parse the force from a gauge reply, the first signed decimal literal in the text.
pub fn parse_force(reply: &str) -> Option<f64> {
    FORCE_PATTERN.find(reply)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|f| f.is_finite())
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replies with the next scripted line after each probe, times out when there is none.
    #[derive(Clone, Default)]
    struct ScriptedPort {
        replies: Arc<Mutex<VecDeque<&'static [u8]>>>,
        probes: Arc<Mutex<Vec<Vec<u8>>>>,
        pending: VecDeque<u8>
    }

    impl Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.probes.lock().unwrap().push(buf.to_vec());
            if let Some(r) = self.replies.lock().unwrap().pop_front() {
                self.pending.extend(r.iter());
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.pending.pop_front() {
                Some(b) => {
                    buf[0] = b;
                    Ok(1)
                },
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"))
            }
        }
    }

    fn gauge(replies: &[&'static [u8]], sign: TensionSign) -> (TensionGauge, ScriptedPort) {
        let port = ScriptedPort::default();
        port.replies.lock().unwrap().extend(replies.iter());

        let params = Params {
            sign,
            ..Default::default()
        };

        (TensionGauge::with_port("gauge1", "sim", Box::new(port.clone()), &params), port)
    }

    #[test]
    fn test_parse_force() {
        assert_eq!(parse_force("-1.234 N"), Some(-1.234));
        assert_eq!(parse_force("0.52 lbF"), Some(0.52));
        assert_eq!(parse_force("+12"), Some(12.0));
        assert_eq!(parse_force("  -.5N\r"), Some(-0.5));
        assert_eq!(parse_force("1.5e2 N"), Some(150.0));
        assert_eq!(parse_force("N"), None);
        assert_eq!(parse_force(""), None);
    }

    #[test]
    fn test_read_tension() {
        let (mut g, port) = gauge(
            &[&b"-1.500 N\r\n"[..], &b"\r\n"[..], &b"garbage\r\n"[..], &b"2.0 N\r\n"[..]],
            TensionSign::AsReported
        );

        assert_eq!(g.read_tension(), -1.5);
        assert!(g.read_tension().is_nan());
        assert!(g.read_tension().is_nan());
        assert_eq!(g.read_tension(), 2.0);

        // No reply at all times out
        assert!(g.read_tension().is_nan());
        assert!(g.last_force_n().is_nan());

        assert_eq!(g.stats().reads, 5);
        assert_eq!(g.stats().bad_reads, 3);

        // Every read sent exactly one probe
        let probes = port.probes.lock().unwrap();
        assert_eq!(probes.len(), 5);
        assert!(probes.iter().all(|p| p.as_slice() == b"?C\r\n"));
    }

    #[test]
    fn test_sign_and_close() {
        let (mut g, _port) = gauge(&[&b"-1.5 N\r\n"[..]; 2], TensionSign::Negated);

        assert_eq!(g.read_tension(), 1.5);

        g.close();
        assert!(!g.is_open());
        assert!(g.read_tension().is_nan());
    }

    #[test]
    fn test_acquire() {
        let (g1, _p1) = gauge(&[&b"-1.0 N\r\n"[..]; 64], TensionSign::AsReported);
        let (g2, _p2) = gauge(&[], TensionSign::AsReported);
        let mut gauges = vec![g1, g2];

        let dir = std::env::temp_dir();
        let paths: Vec<_> = (0..2).map(|i| dir.join(format!(
            "gauge_acquire_{}_{}", std::process::id(), csv_file_name(i)
        ))).collect();
        let mut archives: Vec<Archiver> = paths.iter()
            .map(|p| Archiver::create(p, &CSV_HEADER).unwrap())
            .collect();

        let report = acquire(&mut gauges, &mut archives, 50.0, Duration::from_millis(200)).unwrap();

        // Paced to about 10 ticks, every tick writes a row for both gauges
        assert!(report.rows[0] >= 8 && report.rows[0] <= 11, "{} rows", report.rows[0]);
        assert_eq!(report.rows[0], report.rows[1]);
        assert_eq!(report.bad_reads, report.rows[1] as u64);

        let text = std::fs::read_to_string(&paths[1]).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("timestamp,force"));
        assert!(lines.all(|l| l.ends_with(",NaN")));
        assert_eq!(csv_file_name(0), "tension_1.csv");
    }

    #[test]
    fn test_calibrate() {
        let (mut g, _port) = gauge(&[&b"0.0 N\r\n"[..]; 10], TensionSign::AsReported);

        let rate = g.calibrate(10).unwrap();
        assert!(rate > 0.0);
        assert_eq!(g.effective_rate_hz(), Some(rate));

        // Nothing left to reply with
        assert_eq!(g.calibrate(5), None);
    }
}
