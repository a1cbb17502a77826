//! # Force/Torque Transducer
//!
//! Six gauge voltages are sampled continuously from a DAQ. At construction a bias is taken by
//! averaging idle samples, every row after that is projected to forces and torques by
//!
//! ```text
//! f = C * (v - b)
//! ```
//!
//! where `C` is the fixed calibration matrix. Rows go into a buffer preallocated for the whole
//! acquisition, which is never grown: if it fills before the duration is up the acquisition stops
//! early with [`StopReason::BufferFull`].

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod daq;
mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, info, warn};
use nalgebra::{Matrix6, Vector6};
use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};
use util::archive::{ArchiveError, Archiver};
use util::time::unix_timestamp_s;

pub use daq::*;
pub use params::*;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of gauge channels, and of force/torque components.
pub const NUM_CHANNELS: usize = 6;

/// Column names of the F/T CSV.
pub const CSV_HEADER: [&str; 7] = ["timestamp", "Fx", "Fy", "Fz", "Mx", "My", "Mz"];

/// Name of the F/T CSV in the experiment directory.
pub const CSV_FILE_NAME: &str = "ati_data.csv";

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A source of gauge voltage samples, paced by the DAQ's own sample clock.
pub trait VoltageSource: Send {
    /// Block until the next sample of all channels is available.
    ///
    /// Units: volts
    fn read_sample(&mut self) -> Result<[f64; NUM_CHANNELS], DaqError>;

    /// Stop the acquisition task.
    fn close(&mut self) {}
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The F/T transducer.
pub struct FtSensor {
    source: Box<dyn VoltageSource>,

    calibration: Matrix6<f64>,

    bias: Vector6<f64>,

    rate_hz: f64,

    allocated_rows: usize,

    buffer: Vec<FtSample>
}

/// One calibrated row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FtSample {
    /// Unix time at which the read completed.
    ///
    /// Units: seconds
    pub timestamp: f64,

    /// Units: Newtons
    pub fx: f64,
    pub fy: f64,
    pub fz: f64,

    /// Units: Newton meters
    pub mx: f64,
    pub my: f64,
    pub mz: f64
}

/// Summary of one acquisition.
#[derive(Debug, Clone, Serialize)]
pub struct FtReport {
    pub rows: usize,

    pub allocated_rows: usize,

    /// Reads which failed and were skipped
    pub read_faults: u64,

    pub stop: StopReason,

    /// Units: volts
    pub bias: [f64; NUM_CHANNELS]
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Why an acquisition ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The full duration was acquired
    Duration,

    /// The preallocated buffer filled first
    BufferFull
}

#[derive(Debug, thiserror::Error)]
pub enum FtError {
    #[error("No rows were acquired in {0:.1} s ({1} read faults)")]
    NoSamples(f64, u64),

    #[error("Cannot archive F/T rows: {0}")]
    Archive(ArchiveError)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl FtSensor {
    /// Create the sensor on an open voltage source, taking the bias before returning.
    ///
    /// `duration_s` is the acquisition length the row buffer is sized for.
    pub fn new(source: Box<dyn VoltageSource>, params: &Params, duration_s: f64) -> Self {
        let cal = params.calibration;
        let allocated_rows = params.buffer_rows(duration_s);
        let mut sensor = Self {
            source,
            calibration: Matrix6::from_fn(|r, c| cal[r][c]),
            bias: Vector6::zeros(),
            rate_hz: params.rate_hz,
            allocated_rows,
            buffer: Vec::with_capacity(allocated_rows)
        };

        sensor.bias = sensor.measure_bias(params.bias_samples);

        info!(
            "[ati] Ready on {} at {:.0} Hz, {} rows allocated",
            params.channels, params.rate_hz, sensor.allocated_rows()
        );

        sensor
    }

    /// Bias subtracted from every sample.
    ///
    /// Units: volts
    pub fn bias(&self) -> [f64; NUM_CHANNELS] {
        let mut b = [0f64; NUM_CHANNELS];
        b.copy_from_slice(self.bias.as_slice());
        b
    }

    pub fn allocated_rows(&self) -> usize {
        self.allocated_rows
    }

    /// Rows acquired so far.
    pub fn samples(&self) -> &[FtSample] {
        &self.buffer
    }

    /// Project a raw voltage sample to forces and torques.
    pub fn project(&self, volts: &[f64; NUM_CHANNELS]) -> [f64; NUM_CHANNELS] {
        let f = self.calibration * (Vector6::from_column_slice(volts) - self.bias);

        let mut out = [0f64; NUM_CHANNELS];
        out.copy_from_slice(f.as_slice());
        out
    }

    /// Acquire for `duration`, then write every row to the archive.
    ///
    /// Read faults are skipped. The acquisition succeeds if at least one row was acquired.
    pub fn acquire(
        &mut self,
        duration: Duration,
        archive: &mut Archiver
    ) -> Result<FtReport, FtError> {
        let allocated = self.allocated_rows();
        let mut read_faults = 0u64;
        let mut stop = StopReason::Duration;

        info!("[ati] Acquiring for {:.1} s", duration.as_secs_f64());
        let start = Instant::now();

        while start.elapsed() < duration {
            if self.buffer.len() >= allocated {
                warn!(
                    "[ati] Buffer full after {} rows and {:.2} s, stopping early",
                    self.buffer.len(), start.elapsed().as_secs_f64()
                );
                stop = StopReason::BufferFull;
                break
            }

            match self.source.read_sample() {
                Ok(volts) => {
                    let timestamp = unix_timestamp_s();
                    let f = self.project(&volts);
                    self.buffer.push(FtSample {
                        timestamp,
                        fx: f[0],
                        fy: f[1],
                        fz: f[2],
                        mx: f[3],
                        my: f[4],
                        mz: f[5]
                    });
                },
                Err(e) => {
                    if read_faults == 0 {
                        warn!("[ati] Read fault, skipping: {}", e);
                    }
                    read_faults += 1;
                    thread::sleep(Duration::from_secs_f64(1.0 / self.rate_hz));
                }
            }
        }

        if read_faults > 0 {
            warn!("[ati] {} read faults during acquisition", read_faults);
        }

        if self.buffer.is_empty() {
            return Err(FtError::NoSamples(duration.as_secs_f64(), read_faults))
        }

        for row in self.buffer.iter() {
            archive.serialise(row).map_err(FtError::Archive)?;
        }

        info!(
            "[ati] Acquired {} rows ({:.1} Hz effective)",
            self.buffer.len(),
            self.buffer.len() as f64 / start.elapsed().as_secs_f64().max(1e-9)
        );

        Ok(FtReport {
            rows: self.buffer.len(),
            allocated_rows: allocated,
            read_faults,
            stop,
            bias: self.bias()
        })
    }

    /// Stop the DAQ.
    pub fn close(&mut self) {
        self.source.close();
        debug!("[ati] Closed");
    }

    // ---- PRIVATE ----

    /// Average `num_samples` idle samples, zero if none could be read.
    fn measure_bias(&mut self, num_samples: usize) -> Vector6<f64> {
        if num_samples == 0 {
            info!("[ati] Bias removal disabled");
            return Vector6::zeros()
        }

        let mut sum: Vector6<f64> = Vector6::zeros();
        let mut count = 0;

        for _ in 0..num_samples {
            match self.source.read_sample() {
                Ok(v) => {
                    sum += Vector6::from_column_slice(&v);
                    count += 1;
                },
                Err(e) => debug!("[ati] Bias sample failed: {}", e)
            }
        }

        if count == 0 {
            warn!("[ati] No bias samples could be read, using a zero bias");
            return Vector6::zeros()
        }

        let bias = sum / count as f64;
        info!(
            "[ati] Bias from {}/{} samples: {:?}",
            count, num_samples, bias.as_slice()
        );
        bias
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
