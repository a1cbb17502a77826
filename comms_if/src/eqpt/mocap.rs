//! # Motion Capture Interface
//!
//! Request/response protocol between the experiment executable (client) and the motion capture
//! server. Every request is a single JSON object. Every response starts with a JSON status
//! object, the `get_data` response then carries the capture matrix:
//!
//! ```text
//! u32 data_size        (big-endian)
//! u32 rows             (big-endian)
//! u32 cols             (big-endian)
//! u32 header_size      (big-endian)
//! bytes[header_size]   JSON array of column names
//! bytes[data_size]     rows x cols x f64 little-endian, row-major
//! ```

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Version of the framing described in this module.
///
/// Sent in the `version` field of every status. The binary layout itself carries no version, a
/// change to it must add a leading magic/version byte and bump this number.
pub const WIRE_VERSION: u8 = 1;

/// Size of one sample on the wire.
pub const SAMPLE_SIZE: usize = 8;

/// Size of the four length fields preceding the column names.
pub const DATA_HEADER_SIZE: usize = 16;

/// Largest column name header accepted by the client.
pub const MAX_HEADER_SIZE: u32 = 1 << 20;

/// Largest sample payload accepted by the client, and allocated by the server.
pub const MAX_DATA_SIZE: u32 = 1 << 29;

/// Name of the first column of every capture.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Status object sent at the start of every response.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MocapStatus {
    /// Human readable status
    pub status: String,

    /// Framing version of the sender, absent from servers predating versioning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u8>
}

/// The four length fields of a `get_data` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    /// Number of bytes of sample data
    pub data_size: u32,

    pub rows: u32,

    pub cols: u32,

    /// Number of bytes of the JSON column name list
    pub header_size: u32
}

/// A dense, row-major capture matrix with its column schema.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureMatrix {
    columns: Vec<String>,

    rows: usize,

    data: Vec<f64>
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Requests sent by the client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum MocapRequest {
    /// Allocate a capture buffer for the given duration.
    Setup {
        /// Units: seconds
        duration: f64
    },

    /// Capture for the duration given in setup. The server replies before capturing.
    Start,

    /// Retrieve the capture matrix.
    GetData
}

/// Violations of the framing.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("Stream closed after {received} of {expected} bytes of {what}")]
    Truncated {
        what: &'static str,
        expected: usize,
        received: usize
    },

    #[error("Declared data size {data_size} does not match {rows} rows x {cols} columns")]
    SizeMismatch { data_size: u32, rows: u32, cols: u32 },

    #[error("Header lists {names} column names but {cols} columns were declared")]
    ColumnMismatch { names: usize, cols: u32 },

    #[error("Column name header of {0} bytes exceeds the limit")]
    HeaderTooLarge(u32),

    #[error("Sample payload of {0} bytes exceeds the limit")]
    DataTooLarge(u64),

    #[error("Matrix of {len} samples cannot have {cols} columns")]
    RaggedMatrix { len: usize, cols: usize },

    #[error("Invalid JSON: {0}")]
    Json(serde_json::Error),

    #[error("Socket error: {0}")]
    Io(io::Error)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MocapStatus {
    pub fn new<S: Into<String>>(status: S) -> Self {
        Self {
            status: status.into(),
            version: Some(WIRE_VERSION)
        }
    }
}

impl DataHeader {
    /// Build the header describing a matrix with the given serialised column names.
    pub fn for_matrix(matrix: &CaptureMatrix, header_size: usize) -> Self {
        Self {
            data_size: (matrix.data.len() * SAMPLE_SIZE) as u32,
            rows: matrix.rows as u32,
            cols: matrix.cols() as u32,
            header_size: header_size as u32
        }
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, FramingError> {
        let mut buf = [0u8; DATA_HEADER_SIZE];
        read_exact(reader, &mut buf, "data header")?;

        Ok(Self {
            data_size: BigEndian::read_u32(&buf[0..4]),
            rows: BigEndian::read_u32(&buf[4..8]),
            cols: BigEndian::read_u32(&buf[8..12]),
            header_size: BigEndian::read_u32(&buf[12..16])
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), FramingError> {
        writer.write_u32::<BigEndian>(self.data_size).map_err(FramingError::Io)?;
        writer.write_u32::<BigEndian>(self.rows).map_err(FramingError::Io)?;
        writer.write_u32::<BigEndian>(self.cols).map_err(FramingError::Io)?;
        writer.write_u32::<BigEndian>(self.header_size).map_err(FramingError::Io)?;
        Ok(())
    }

    /// Check `data_size == rows * cols * 8` and the size limits.
    pub fn validate(&self) -> Result<(), FramingError> {
        let expected = self.rows as u64 * self.cols as u64 * SAMPLE_SIZE as u64;
        if self.data_size > MAX_DATA_SIZE {
            return Err(FramingError::DataTooLarge(self.data_size as u64))
        }
        if expected != self.data_size as u64 {
            return Err(FramingError::SizeMismatch {
                data_size: self.data_size,
                rows: self.rows,
                cols: self.cols
            })
        }

        if self.header_size > MAX_HEADER_SIZE {
            return Err(FramingError::HeaderTooLarge(self.header_size))
        }

        Ok(())
    }
}

impl CaptureMatrix {
    /// Create a new matrix, `data` is row-major and must hold a whole number of rows.
    pub fn new(columns: Vec<String>, data: Vec<f64>) -> Result<Self, FramingError> {
        let cols = columns.len();
        if cols == 0 || data.len() % cols != 0 {
            return Err(FramingError::RaggedMatrix { len: data.len(), cols })
        }

        Ok(Self {
            rows: data.len() / cols,
            columns,
            data
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.columns.len()
    }

    pub fn row(&self, index: usize) -> Option<&[f64]> {
        let cols = self.cols();
        self.data.get(index * cols..(index + 1) * cols)
    }

    pub fn iter_rows(&self) -> std::slice::Chunks<'_, f64> {
        self.data.chunks(self.cols())
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Build the column schema for the given `(subject, segment)` pairs.
///
/// The first column is the timestamp, then for each segment position X, Y, Z then rotation X, Y,
/// Z. Segments named after their subject are prefixed with the subject name only.
pub fn column_names(segments: &[(String, String)]) -> Vec<String> {
    let mut names = vec![String::from(TIMESTAMP_COLUMN)];

    for (subject, segment) in segments {
        let prefix = if subject == segment {
            subject.clone()
        }
        else {
            format!("{}_{}", subject, segment)
        };

        for kind in ["pos", "rot"].iter() {
            for axis in ["X", "Y", "Z"].iter() {
                names.push(format!("{}_{}_{}", prefix, kind, axis));
            }
        }
    }

    names
}

/// Send a request.
pub fn write_request<W: Write>(writer: &mut W, request: &MocapRequest) -> Result<(), FramingError> {
    write_json(writer, request)
}

/// Receive a request, reading exactly one JSON object from the stream.
pub fn read_request<R: Read>(reader: &mut R) -> Result<MocapRequest, FramingError> {
    read_json(reader)
}

/// Send a status.
pub fn write_status<W: Write>(writer: &mut W, status: &MocapStatus) -> Result<(), FramingError> {
    write_json(writer, status)
}

/// Receive a status, reading exactly one JSON object from the stream.
pub fn read_status<R: Read>(reader: &mut R) -> Result<MocapStatus, FramingError> {
    read_json(reader)
}

/// Write the binary part of a `get_data` response (everything after the status).
pub fn write_data<W: Write>(writer: &mut W, matrix: &CaptureMatrix) -> Result<(), FramingError> {
    let header_bytes = serde_json::to_vec(&matrix.columns).map_err(FramingError::Json)?;

    DataHeader::for_matrix(matrix, header_bytes.len()).write_to(writer)?;
    writer.write_all(&header_bytes).map_err(FramingError::Io)?;

    let mut data_bytes = vec![0u8; matrix.data.len() * SAMPLE_SIZE];
    LittleEndian::write_f64_into(&matrix.data, &mut data_bytes);
    writer.write_all(&data_bytes).map_err(FramingError::Io)?;

    writer.flush().map_err(FramingError::Io)
}

/// Read the binary part of a `get_data` response.
///
/// The header is validated before any sample is read, and the data is read in full, looping on
/// short reads. A stream which ends early is a `Truncated` error.
pub fn read_data<R: Read>(reader: &mut R) -> Result<CaptureMatrix, FramingError> {
    let header = DataHeader::read_from(reader)?;
    header.validate()?;

    let mut header_bytes = vec![0u8; header.header_size as usize];
    read_exact(reader, &mut header_bytes, "column names")?;
    let columns: Vec<String> = serde_json::from_slice(&header_bytes)
        .map_err(FramingError::Json)?;

    if columns.is_empty() || columns.len() != header.cols as usize {
        return Err(FramingError::ColumnMismatch {
            names: columns.len(),
            cols: header.cols
        })
    }

    let mut data_bytes = vec![0u8; header.data_size as usize];
    read_exact(reader, &mut data_bytes, "sample data")?;

    let mut data = vec![0f64; data_bytes.len() / SAMPLE_SIZE];
    let mut cursor = io::Cursor::new(data_bytes);
    cursor.read_f64_into::<LittleEndian>(&mut data).map_err(FramingError::Io)?;

    // A zero row capture still carries its schema
    Ok(CaptureMatrix {
        rows: header.rows as usize,
        columns,
        data
    })
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn write_json<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<(), FramingError> {
    serde_json::to_writer(&mut *writer, value).map_err(FramingError::Json)?;
    writer.flush().map_err(FramingError::Io)
}

fn read_json<R: Read, T: serde::de::DeserializeOwned>(reader: &mut R) -> Result<T, FramingError> {
    // Deserialising directly, rather than through a stream iterator, stops at the closing brace
    // without consuming any of the binary data which may follow.
    let mut de = serde_json::Deserializer::from_reader(reader);
    T::deserialize(&mut de).map_err(|e| match e.classify() {
        serde_json::error::Category::Eof => FramingError::Truncated {
            what: "JSON object",
            expected: 0,
            received: 0
        },
        serde_json::error::Category::Io => FramingError::Io(e.into()),
        _ => FramingError::Json(e)
    })
}

/// Fill `buf` from the reader, looping on short reads.
fn read_exact<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    what: &'static str
) -> Result<(), FramingError> {
    let mut received = 0;

    while received < buf.len() {
        match reader.read(&mut buf[received..]) {
            Ok(0) => return Err(FramingError::Truncated {
                what,
                expected: buf.len(),
                received
            }),
            Ok(n) => received += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FramingError::Io(e))
        }
    }

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
