//! Serial DAQ bridge
//!
//! The bridge samples the six gauge channels on its own clock and streams each sample as six
//! little endian `f32` voltages, channel 0 first.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use byteorder::{ByteOrder, LittleEndian};
use log::info;
use std::io::{self, Read};

use super::{Params, VoltageSource, NUM_CHANNELS};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Size of one sample on the wire.
pub const SAMPLE_FRAME_LEN: usize = NUM_CHANNELS * 4;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A DAQ streaming samples over a serial link.
pub struct SerialDaq {
    port: Option<Box<dyn Read + Send>>
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DaqError {
    #[error("No DAQ port is configured for channels {0}")]
    NoPort(String),

    #[error("Cannot open the DAQ on {0}: {1}")]
    Open(String, serialport::Error),

    #[error("Timed out waiting for a sample")]
    Timeout,

    #[error("The DAQ has been closed")]
    Closed,

    #[error("DAQ I/O error: {0}")]
    Io(io::Error)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SerialDaq {
    /// Open the DAQ bridge given in the parameters.
    pub fn open(params: &Params) -> Result<Self, DaqError> {
        let path = match params.port {
            Some(ref p) => p,
            None => return Err(DaqError::NoPort(params.channels.clone()))
        };

        let port = serialport::new(path.as_str(), params.baud_rate)
            .timeout(params.timeout())
            .open()
            .map_err(|e| DaqError::Open(path.clone(), e))?;

        info!("[ati] DAQ bridge open on {} for {}", path, params.channels);

        Ok(Self::from_reader(Box::new(port)))
    }

    /// Use an already open stream of samples.
    pub fn from_reader(reader: Box<dyn Read + Send>) -> Self {
        Self {
            port: Some(reader)
        }
    }
}

impl VoltageSource for SerialDaq {
    fn read_sample(&mut self) -> Result<[f64; NUM_CHANNELS], DaqError> {
        let port = self.port.as_mut().ok_or(DaqError::Closed)?;

        let mut frame = [0u8; SAMPLE_FRAME_LEN];
        port.read_exact(&mut frame).map_err(|e| match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => DaqError::Timeout,
            _ => DaqError::Io(e)
        })?;

        let mut volts = [0f32; NUM_CHANNELS];
        LittleEndian::read_f32_into(&frame, &mut volts);

        let mut sample = [0f64; NUM_CHANNELS];
        for (s, v) in sample.iter_mut().zip(volts.iter()) {
            *s = *v as f64;
        }

        Ok(sample)
    }

    fn close(&mut self) {
        self.port = None;
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
