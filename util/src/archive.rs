//! Sample archiving functionality
//!
//! Every device writes its samples through an `Archiver`, a CSV writer with a
//! fixed header row. Records are serialised with serde, so `None` fields are
//! written as empty strings and rows always have as many fields as the header.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use std::path::{Path, PathBuf};
use std::fs::File;
use csv::WriterBuilder;
pub use csv::Writer;
use serde::Serialize;
use thiserror::Error;

// Internal imports
use crate::session::Session;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// An object used to write CSV archive files.
pub struct Archiver {
    writer: Writer<File>,

    path: PathBuf,

    num_fields: usize,

    num_records: usize
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors which can occur while archiving.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Cannot create the archive file: {0}")]
    CreateError(std::io::Error),

    #[error("Cannot write to the archive: {0}")]
    WriteError(csv::Error),

    #[error("Cannot flush the archive: {0}")]
    FlushError(std::io::Error)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Archiver {
    /// Create a new archiver at the given path, truncating any existing file,
    /// and write the header row.
    pub fn create<P: AsRef<Path>>(
        path: P, header: &[&str]
    ) -> Result<Self, ArchiveError> {
        let file = File::create(path.as_ref())
            .map_err(ArchiveError::CreateError)?;

        // Headers are written explicitly, serde field names are not used so
        // that column names match the published schema exactly.
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        writer.write_record(header)
            .map_err(ArchiveError::WriteError)?;
        writer.flush()
            .map_err(ArchiveError::FlushError)?;

        Ok(Self {
            writer,
            path: path.as_ref().to_path_buf(),
            num_fields: header.len(),
            num_records: 0
        })
    }

    /// Create a new archiver from a paricular path relative to the session's
    /// root directory.
    pub fn from_path<P: AsRef<Path>>(
        session: &Session, path: P, header: &[&str]
    ) -> Result<Self, ArchiveError> {
        Self::create(session.session_root.join(path), header)
    }

    /// Serialise a record into the archive.
    pub fn serialise<T: Serialize>(
        &mut self, record: T
    ) -> Result<(), ArchiveError> {
        self.writer.serialize(record)
            .map_err(ArchiveError::WriteError)?;
        self.writer.flush()
            .map_err(ArchiveError::FlushError)?;

        self.num_records += 1;

        Ok(())
    }

    /// Number of records written, excluding the header.
    pub fn num_records(&self) -> usize {
        self.num_records
    }

    /// Number of fields in the header.
    pub fn num_fields(&self) -> usize {
        self.num_fields
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
