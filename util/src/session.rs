//! Session management
//!
//! A session is one run of an executable. It owns the experiment directory
//! into which every log, CSV archive and JSON report of the run is written.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use chrono::{DateTime, Utc};
use conquer_once::OnceCell;
use erased_serde::Serialize;
use log::{info, warn};
use std::fs;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use thiserror::Error;

// Internal imports
use crate::time;

// ---------------------------------------------------------------------------
// STATICS
// ---------------------------------------------------------------------------

static SESSION_EPOCH: OnceCell<DateTime<Utc>> = OnceCell::uninit();

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// A chrono format string which diplays a timestamp. See
/// https://docs.rs/chrono/0.4.11/chrono/format/strftime/index.html for more
/// information.
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A struct storing information about the current session
#[derive(Clone)]
pub struct Session {
    /// The root directory for this session, the experiment directory
    pub session_root: PathBuf,

    /// The path to the session's log file
    pub log_file_path: PathBuf,

    save_sender: Sender<SaveRequest>,

    save_thread: Arc<Mutex<Option<JoinHandle<()>>>>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors associated with the session module.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Cannot create the session directory: {0}")]
    CannotCreateDir(std::io::Error),

    #[error("Cannot start the save thread: {0}")]
    CannotSpawnSaveThread(std::io::Error),

    #[error("Cannot get the epoch time, did you forget to initialise the session?")]
    CannotGetEpoch,
}

/// Requests handled by the background save thread.
enum SaveRequest {
    Save(PathBuf, Box<dyn Serialize + Send>),
    Stop
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Session {
    /// Start a new session within the given directory.
    ///
    /// This will create a new session directory named `{exp_name}_{timestamp}`
    /// inside `sessions_dir`, creating `sessions_dir` if needed.
    pub fn new<P: AsRef<Path>>(
        exp_name: &str, 
        sessions_dir: P
    ) -> Result<Self, SessionError> {
        // Set the session epoch. Only the first session of a process sets it,
        // later sessions share the same log clock.
        SESSION_EPOCH.try_init_once(Utc::now).ok();
        if SESSION_EPOCH.get().is_none() {
            return Err(SessionError::CannotGetEpoch)
        }

        // Create the session path
        let mut path = sessions_dir.as_ref().to_path_buf();
        path.push(format!("{}_{}", exp_name, Utc::now().format(TIMESTAMP_FORMAT)));

        // Create the directory
        match fs::create_dir_all(path.clone()) {
            Ok(_) => (),
            Err(e) => return Err(SessionError::CannotCreateDir(e)),
        };

        // Create the log file path
        let mut log_file_path = path.clone();
        log_file_path.push(format!("{}.log", exp_name));

        // Create sender/receiver
        let (tx, rx) = channel();

        // Spawn background thread
        let session_root = path.clone();
        let handle = thread::Builder::new()
            .name(String::from("session_save"))
            .spawn(move || save_thread(session_root, rx))
            .map_err(SessionError::CannotSpawnSaveThread)?;

        // Build the session struct
        Ok(Session {
            session_root: path,
            log_file_path,
            save_sender: tx,
            save_thread: Arc::new(Mutex::new(Some(handle))),
        })
    }

    /// Exit the session, waiting for the save thread to finish any pending actions
    pub fn exit(self) {
        info!("Stopping save thread");

        if self.save_sender.send(SaveRequest::Stop).is_err() {
            warn!("Save thread already stopped");
        }

        let handle = match self.save_thread.lock() {
            Ok(mut h) => h.take(),
            Err(_) => None
        };

        if let Some(h) = handle {
            if h.join().is_err() {
                warn!("Save thread panicked");
            }
        }

        info!("Save thread exited");
    }

    /// Saves the given data to the given session-relative path in a background thread.
    pub fn save<P: AsRef<Path>, T: Serialize + Send + 'static>(&self, path: P, data: T) {
        if let Err(e) = self
            .save_sender
            .send(SaveRequest::Save(path.as_ref().to_path_buf(), Box::new(data)))
        {
            warn!(
                "Could not send data to be saved to path {:?}: {}",
                path.as_ref(),
                e
            )
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the number of seconds elapsed since the start of the session.
///
/// Returns `NaN` if no session has been created yet.
pub fn get_elapsed_seconds() -> f64 {
    match SESSION_EPOCH.get() {
        Some(e) => {
            let elapsed = Utc::now() - *e;
            match time::duration_to_seconds(elapsed) {
                Some(s) => s,
                None => std::f64::NAN,
            }
        }
        None => std::f64::NAN,
    }
}

/// Return a reference to the session's epoch.
///
/// # Panics
/// - This function will panic if the session epoch has not been
///   initialised, which is performed on creating a new Session instance.
pub fn get_epoch() -> &'static DateTime<Utc> {
    match SESSION_EPOCH.get() {
        Some(e) => e,
        None => panic!("Cannot get the session epoch!"),
    }
}

// -----------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

fn save_thread(
    session_root: PathBuf,
    receiver: Receiver<SaveRequest>,
) {
    // Ends on an explicit stop or once every session clone has been dropped
    while let Ok(SaveRequest::Save(path, data)) = receiver.recv() {
        let full_path = session_root.join(path);
        match full_path.extension().map(|s| s.to_str()).flatten() {
            Some("json") => {
                // Create the parent path if needed
                let parent = match full_path.parent() {
                    Some(p) => p,
                    None => {
                        warn!("Couldn't find parent directory for {:?}", full_path);
                        continue;
                    }
                };
                if let Err(e) = std::fs::create_dir_all(parent) {
                    warn!("Couldn't create parent directory for {:?}: {}", full_path, e);
                    continue;
                }

                let file = match OpenOptions::new()
                    .write(true)
                    .truncate(true)
                    .create(true)
                    .open(&full_path)
                {
                    Ok(f) => f,
                    Err(e) => {
                        warn!("Couldn't create file {:?}: {}", full_path, e);
                        continue;
                    }
                };

                if let Err(e) = serde_json::to_writer_pretty(&file, &data) {
                    warn!("Couldn't serialize data for file {:?}: {}", full_path, e);
                }
            }
            ext => warn!(
                "Unrecognised file path extension for {:?} (got {:?})",
                full_path, ext
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_session_save() {
        let dir = std::env::temp_dir().join(format!(
            "util_session_test_{}", std::process::id()
        ));

        let session = Session::new("unit", &dir).unwrap();
        assert!(session.session_root.starts_with(&dir));
        assert!(session.session_root.is_dir());
        assert!(get_elapsed_seconds() >= 0.0);

        let mut report = HashMap::new();
        report.insert("exit_code", 0);
        session.save("report.json", report);

        let root = session.session_root.clone();
        session.exit();

        let text = std::fs::read_to_string(root.join("report.json")).unwrap();
        assert!(text.contains("exit_code"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
