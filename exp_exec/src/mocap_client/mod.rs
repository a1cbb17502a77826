//! # Motion Capture Client
//!
//! Client for the motion capture server. One persistent connection carries the three requests of
//! a capture, always in the order `setup`, `start`, `get_data`. The server replies to `start`
//! before capturing, so the `get_data` reply only arrives once the whole capture is done.
//!
//! Any socket or framing error closes the connection. The capture CSV is only written once the
//! full matrix has been received, so a failed capture never leaves a partial file behind.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, info, warn};
use serde::Serialize;
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;
use comms_if::{
    eqpt::mocap::{self, CaptureMatrix, FramingError, MocapRequest, MocapStatus, WIRE_VERSION},
    net::{self, NetError, StreamOptions}
};
use util::archive::{ArchiveError, Archiver};

pub use params::*;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Name of the motion capture CSV in the experiment directory.
pub const CSV_FILE_NAME: &str = "vicon_data.csv";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A connection to the motion capture server.
pub struct MocapClient {
    params: Params,

    stream: Option<TcpStream>,

    stage: Stage,

    /// Duration given to `setup`.
    ///
    /// Units: seconds
    duration_s: f64
}

/// Summary of a capture.
#[derive(Debug, Clone, Serialize)]
pub struct MocapReport {
    pub rows: usize,

    pub cols: usize,

    /// Framing version reported by the server, if any
    pub server_version: Option<u8>
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Progress through a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connected,
    SetUp,
    Started,
    Done
}

#[derive(Debug, thiserror::Error)]
pub enum MocapClientError {
    #[error("Cannot connect to the motion capture server: {0}")]
    Connect(NetError),

    #[error("Motion capture protocol fault: {0}")]
    Protocol(FramingError),

    #[error("The server reported an error: {0}")]
    Server(String),

    #[error("Cannot send {request} while the capture is {stage:?}")]
    OutOfOrder { request: &'static str, stage: Stage },

    #[error("The connection has been closed")]
    Closed,

    #[error("Cannot write the capture CSV: {0}")]
    Archive(ArchiveError)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MocapClient {
    /// Connect to the server.
    pub fn connect(params: &Params) -> Result<Self, MocapClientError> {
        let endpoint = params.endpoint();
        let options = StreamOptions {
            connect_timeout: params.connect_timeout(),
            recv_timeout: Some(params.io_timeout()),
            send_timeout: Some(params.io_timeout()),
            ..Default::default()
        };

        let stream = net::connect(&endpoint, &options).map_err(MocapClientError::Connect)?;
        info!("[mocap] Connected to {}", endpoint);

        Ok(Self {
            params: params.clone(),
            stream: Some(stream),
            stage: Stage::Connected,
            duration_s: 0.0
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Ask the server to allocate a capture of `duration_s` seconds.
    pub fn setup(&mut self, duration_s: f64) -> Result<MocapStatus, MocapClientError> {
        self.expect_stage(Stage::Connected, "setup")?;

        let status = self.exchange(&MocapRequest::Setup { duration: duration_s })?;
        self.duration_s = duration_s;
        self.stage = Stage::SetUp;
        info!("[mocap] Set up for {:.1} s: {}", duration_s, status.status);

        Ok(status)
    }

    /// Trigger the capture. Returns as soon as the server acknowledges.
    pub fn start(&mut self) -> Result<MocapStatus, MocapClientError> {
        self.expect_stage(Stage::SetUp, "start")?;

        let status = self.exchange(&MocapRequest::Start)?;
        self.stage = Stage::Started;
        info!("[mocap] Capture started: {}", status.status);

        Ok(status)
    }

    /// Retrieve the capture matrix, waiting for the capture to finish.
    pub fn get_data(&mut self) -> Result<(MocapStatus, CaptureMatrix), MocapClientError> {
        self.expect_stage(Stage::Started, "get_data")?;

        // The reply comes once the capture is over
        let wait = Duration::from_secs_f64(self.duration_s.max(0.0)) + self.params.io_timeout();
        self.with_stream(|s| {
            s.set_read_timeout(Some(wait)).map_err(FramingError::Io)
        })?;

        let status = self.exchange(&MocapRequest::GetData)?;
        let matrix = self.with_stream(|s| mocap::read_data(s))?;
        self.stage = Stage::Done;

        info!(
            "[mocap] Received {} rows x {} columns ({}): {}",
            matrix.rows(), matrix.cols(), matrix.columns().join(", "), status.status
        );

        Ok((status, matrix))
    }

    /// Run a whole capture which was already set up: start, wait, then write the CSV to `path`.
    pub fn run_capture<P: AsRef<Path>>(&mut self, path: P) -> Result<MocapReport, MocapClientError> {
        self.start()?;
        let (status, matrix) = self.get_data()?;

        write_csv(path.as_ref(), &matrix)?;

        Ok(MocapReport {
            rows: matrix.rows(),
            cols: matrix.cols(),
            server_version: status.version
        })
    }

    /// Close the connection.
    pub fn close(&mut self) {
        if let Some(s) = self.stream.take() {
            s.shutdown(std::net::Shutdown::Both).ok();
            debug!("[mocap] Connection closed");
        }
    }

    // ---- PRIVATE ----

    fn expect_stage(&self, stage: Stage, request: &'static str) -> Result<(), MocapClientError> {
        if self.stream.is_none() {
            return Err(MocapClientError::Closed)
        }
        if self.stage != stage {
            return Err(MocapClientError::OutOfOrder { request, stage: self.stage })
        }
        Ok(())
    }

    /// Send a request and read the status which starts its reply.
    fn exchange(&mut self, request: &MocapRequest) -> Result<MocapStatus, MocapClientError> {
        let status = self.with_stream(|s| {
            mocap::write_request(s, request)?;
            mocap::read_status(s)
        })?;

        if let Some(v) = status.version {
            if v != WIRE_VERSION {
                warn!("[mocap] Server speaks framing version {}, expected {}", v, WIRE_VERSION);
            }
        }

        if status.status.to_lowercase().starts_with("error") {
            self.close();
            return Err(MocapClientError::Server(status.status))
        }

        Ok(status)
    }

    /// Run a framing operation on the stream, closing the connection if it fails.
    fn with_stream<T, F>(&mut self, op: F) -> Result<T, MocapClientError>
    where
        F: FnOnce(&mut TcpStream) -> Result<T, FramingError>
    {
        let stream = self.stream.as_mut().ok_or(MocapClientError::Closed)?;

        match op(stream) {
            Ok(t) => Ok(t),
            Err(e) => {
                warn!("[mocap] {}, closing the connection", e);
                self.close();
                Err(MocapClientError::Protocol(e))
            }
        }
    }
}

impl Drop for MocapClient {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Write a capture matrix as CSV, the column names as the header.
///
/// A file which could not be written in full is removed.
pub fn write_csv(path: &Path, matrix: &CaptureMatrix) -> Result<(), MocapClientError> {
    let header: Vec<&str> = matrix.columns().iter().map(String::as_str).collect();

    let result = Archiver::create(path, &header).and_then(|mut arch| {
        for row in matrix.iter_rows() {
            arch.serialise(row)?;
        }
        Ok(())
    });

    if let Err(e) = result {
        std::fs::remove_file(path).ok();
        return Err(MocapClientError::Archive(e))
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
