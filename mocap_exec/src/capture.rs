//! # Capture
//!
//! A capture source produces one frame of segment poses at a time, `Capture` records frames into
//! a buffer preallocated at setup.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::mocap::{self, CaptureMatrix, FramingError};
use log::{info, warn};
use std::thread;
use std::time::{Duration, Instant};
use util::time::unix_timestamp_s;

use crate::params::SimParams;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Values recorded per segment, position XYZ then rotation XYZ.
const VALUES_PER_SEGMENT: usize = 6;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A motion capture system.
pub trait CaptureSource {
    /// Units: Hertz
    fn frame_rate_hz(&self) -> f64;

    /// `(subject, segment)` pairs in the order poses are reported.
    fn segments(&self) -> Vec<(String, String)>;

    /// Called before the first frame of every capture.
    fn begin(&mut self) {}

    /// Block until the next frame. One pose per segment, `None` while occluded.
    fn next_frame(&mut self) -> Result<Vec<SegmentPose>, CaptureError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Global pose of one segment.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SegmentPose {
    /// Units: millimeters
    pub position: Option<[f64; 3]>,

    /// Euler XYZ.
    ///
    /// Units: radians
    pub rotation: Option<[f64; 3]>
}

/// A capture buffer.
pub struct Capture {
    columns: Vec<String>,

    duration: Duration,

    /// Preallocated rows
    capacity: usize,

    data: Vec<f64>,

    /// Frames with a pose missing
    occluded_frames: usize
}

/// A capture system simulating an arm tracing a slow circle.
pub struct SimCapture {
    params: SimParams,

    t0: Option<Instant>,

    frame: u64
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("The capture system reports no segments")]
    NoSegments,

    #[error("Expected a positive {0}, found {1}")]
    NotPositive(&'static str, f64),

    #[error("A capture of {0} rows does not fit in one data payload")]
    TooLarge(usize),

    #[error("Frame has {found} poses, expected {expected}")]
    FrameSize { expected: usize, found: usize },

    #[error("Cannot build the capture matrix: {0}")]
    Matrix(FramingError)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Capture {
    /// Allocate a capture of `duration_s` with `margin` times the expected number of rows.
    pub fn setup<S: CaptureSource + ?Sized>(
        source: &S,
        duration_s: f64,
        margin: f64
    ) -> Result<Self, CaptureError> {
        if !(duration_s > 0.0 && duration_s.is_finite()) {
            return Err(CaptureError::NotPositive("duration", duration_s))
        }
        let rate_hz = source.frame_rate_hz();
        if !(rate_hz > 0.0 && rate_hz.is_finite()) {
            return Err(CaptureError::NotPositive("frame rate", rate_hz))
        }

        let segments = source.segments();
        if segments.is_empty() {
            return Err(CaptureError::NoSegments)
        }
        let columns = mocap::column_names(&segments);

        let capacity = ((margin * duration_s * rate_hz) as usize).max(1);
        let bytes = capacity as u128 * columns.len() as u128 * mocap::SAMPLE_SIZE as u128;
        if bytes > mocap::MAX_DATA_SIZE as u128 {
            return Err(CaptureError::TooLarge(capacity))
        }
        info!(
            "Memory allocated: {} rows x {} columns at {:.1} Hz",
            capacity, columns.len(), rate_hz
        );

        Ok(Self {
            data: Vec::with_capacity(capacity * columns.len()),
            columns,
            duration: Duration::from_secs_f64(duration_s),
            capacity,
            occluded_frames: 0
        })
    }

    pub fn rows(&self) -> usize {
        self.data.len() / self.columns.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Record frames for the capture's duration, or until the buffer is full.
    ///
    /// Occluded values are recorded as zeros.
    pub fn acquire<S: CaptureSource + ?Sized>(&mut self, source: &mut S) -> Result<(), CaptureError> {
        let num_segments = (self.columns.len() - 1) / VALUES_PER_SEGMENT;
        let t0 = Instant::now();

        info!("Recording for {:.2} s", self.duration.as_secs_f64());
        source.begin();

        while t0.elapsed() < self.duration {
            if self.rows() >= self.capacity {
                warn!("Capture buffer full after {} rows, stopping early", self.rows());
                break
            }

            let poses = source.next_frame()?;
            if poses.len() != num_segments {
                return Err(CaptureError::FrameSize {
                    expected: num_segments,
                    found: poses.len()
                })
            }

            self.data.push(unix_timestamp_s());

            let mut occluded = false;
            for pose in poses.iter() {
                for part in [pose.position, pose.rotation].iter() {
                    match part {
                        Some(v) => self.data.extend_from_slice(v),
                        None => {
                            occluded = true;
                            self.data.extend_from_slice(&[0.0; 3]);
                        }
                    }
                }
            }

            if occluded {
                self.occluded_frames += 1;
            }
        }

        info!(
            "Collected {} frames in {:.2} s, {} with occlusions",
            self.rows(), t0.elapsed().as_secs_f64(), self.occluded_frames
        );

        Ok(())
    }

    /// The recorded rows as a matrix, the buffer is kept for repeated retrievals.
    pub fn matrix(&self) -> Result<CaptureMatrix, CaptureError> {
        CaptureMatrix::new(self.columns.clone(), self.data.clone())
            .map_err(CaptureError::Matrix)
    }
}

impl SimCapture {
    pub fn new(params: SimParams) -> Self {
        Self {
            params,
            t0: None,
            frame: 0
        }
    }
}

impl CaptureSource for SimCapture {
    fn frame_rate_hz(&self) -> f64 {
        self.params.frame_rate_hz
    }

    fn segments(&self) -> Vec<(String, String)> {
        self.params.segments()
    }

    fn begin(&mut self) {
        self.t0 = None;
        self.frame = 0;
    }

    fn next_frame(&mut self) -> Result<Vec<SegmentPose>, CaptureError> {
        let t0 = *self.t0.get_or_insert_with(Instant::now);

        // Frames are delivered on the t0 + k/rate boundaries
        let due = t0 + Duration::from_secs_f64(self.frame as f64 / self.params.frame_rate_hz);
        let now = Instant::now();
        if due > now {
            thread::sleep(due - now);
        }
        self.frame += 1;

        let t = self.frame as f64 / self.params.frame_rate_hz;
        let num_segments = self.params.segments().len();
        let occluded = self.params.occlusion_period > 0
            && self.frame % self.params.occlusion_period as u64 == 0;

        Ok((0..num_segments).map(|i| {
            if occluded && i + 1 == num_segments {
                return SegmentPose::default()
            }

            let offset = 100.0 * i as f64;
            let angle = 0.5 * t;
            SegmentPose {
                position: Some([offset + 50.0 * angle.cos(), 50.0 * angle.sin(), 1000.0]),
                rotation: Some([0.0, 0.0, angle])
            }
        }).collect())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::params::SubjectParams;

    fn sim(rate_hz: f64, occlusion_period: usize) -> SimCapture {
        SimCapture::new(SimParams {
            frame_rate_hz: rate_hz,
            subjects: vec![
                SubjectParams {
                    name: String::from("arm"),
                    segments: vec![String::from("arm"), String::from("tip")]
                }
            ],
            occlusion_period
        })
    }

    #[test]
    fn test_capture_with_occlusion() {
        let mut source = sim(200.0, 2);
        let mut capture = Capture::setup(&source, 0.1, 1.3).unwrap();

        assert_eq!(capture.capacity(), 26);
        assert_eq!(capture.columns()[0], "timestamp");
        assert_eq!(capture.columns()[1], "arm_pos_X");
        assert_eq!(capture.columns()[7], "arm_tip_pos_X");
        assert_eq!(capture.columns().len(), 13);

        capture.acquire(&mut source).unwrap();
        let rows = capture.rows();
        assert!(rows >= 15 && rows <= 23, "{} rows", rows);

        let m = capture.matrix().unwrap();
        assert_eq!(m.rows(), rows);

        // Frame 2 has the tip occluded, the arm tracked
        let row = m.row(1).unwrap();
        assert!(row[7..].iter().all(|v| *v == 0.0));
        assert_eq!(row[3], 1000.0);
        assert_eq!(m.row(0).unwrap()[9], 1000.0);
    }

    #[test]
    fn test_capture_buffer_full() {
        let mut source = sim(1000.0, 0);
        let mut capture = Capture::setup(&source, 0.2, 0.1).unwrap();
        assert_eq!(capture.capacity(), 20);

        let t0 = Instant::now();
        capture.acquire(&mut source).unwrap();
        assert_eq!(capture.rows(), 20);
        assert!(t0.elapsed() < Duration::from_millis(150));
    }

    #[test]
    fn test_setup_errors() {
        let source = sim(100.0, 0);
        assert!(matches!(
            Capture::setup(&source, 0.0, 1.3),
            Err(CaptureError::NotPositive("duration", _))
        ));

        let empty = SimCapture::new(SimParams {
            subjects: Vec::new(),
            ..SimParams::default()
        });
        assert!(matches!(Capture::setup(&empty, 1.0, 1.3), Err(CaptureError::NoSegments)));

        // A year at 100 Hz cannot be sent back in one payload
        assert!(matches!(
            Capture::setup(&source, 3.2e7, 1.3),
            Err(CaptureError::TooLarge(_))
        ));
        assert!(matches!(
            Capture::setup(&source, 1e300, 1.3),
            Err(CaptureError::TooLarge(_))
        ));
    }
}
