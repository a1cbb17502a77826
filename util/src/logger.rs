//! Logger set up for the executables
//!
//! Every record is prefixed with the seconds elapsed since the session epoch and, for records
//! made on a device worker thread, the worker's device. The terminal gets coloured levels, the
//! session's log file plain ones.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use log::{self, info};
use colored::{ColoredString, Colorize};
use std::thread;
use thiserror::Error;

// Internal imports
use crate::session;

// Re-exports
pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Suffix of the names of device worker threads, `<device>_worker`.
pub const WORKER_THREAD_SUFFIX: &str = "_worker";

/// Driver crates which are only interesting when they warn.
const QUIET_CRATES: [&str; 2] = ["serialport", "socketcan"];

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with initialising the logger.
#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("Log level must be INFO or more verbose, found `{0}`")]
    InvalidMinLogLevel(log::LevelFilter),

    #[error("Cannot open the session log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("A logger is already set: {0}")]
    FernInitError(log::SetLoggerError)
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
///
/// # Notes
///
/// - `min_level` must be `INFO` or more verbose, the experiment record relies on the info logs.
/// - Must only be called once per process.
pub fn logger_init(
    min_level: LevelFilter,
    session: &session::Session
) -> Result<(), LoggerInitError> {

    if min_level < log::Level::Info {
        return Err(LoggerInitError::InvalidMinLogLevel(min_level))
    }

    let log_file = fern::log_file(session.log_file_path.clone())
        .map_err(LoggerInitError::LogFileInitError)?;

    let mut dispatch = fern::Dispatch::new().level(min_level);
    for krate in QUIET_CRATES.iter() {
        dispatch = dispatch.level_for(*krate, LevelFilter::Warn);
    }

    dispatch
        .chain(
            fern::Dispatch::new()
                .format(|out, message, record| out.finish(format_args!(
                    "{}{}",
                    prefix(record, coloured_level(record.level())),
                    message
                )))
                .chain(std::io::stdout())
        )
        .chain(
            fern::Dispatch::new()
                .format(|out, message, record| out.finish(format_args!(
                    "{}{}",
                    prefix(record, plain_level(record.level())),
                    message
                )))
                .chain(log_file)
        )
        .apply()
        .map_err(LoggerInitError::FernInitError)?;

    info!("Logging initialised");
    info!("    Session epoch: {}", session::get_epoch());
    info!("    Log level: {:?}", min_level);
    info!("    Log file path: {:?}", session.log_file_path);

    Ok(())
}

/// The device a thread works for, if it is a device worker.
pub fn worker_device(thread_name: Option<&str>) -> Option<&str> {
    thread_name
        .and_then(|n| n.strip_suffix(WORKER_THREAD_SUFFIX))
        .filter(|d| !d.is_empty())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// `[elapsed LVL device] target: ` with the device and target only where they apply.
fn prefix<L: std::fmt::Display>(record: &log::Record, level: L) -> String {
    let current = thread::current();
    let device = worker_device(current.name());

    let mut s = match device {
        Some(d) => format!("[{:10.6} {} {}] ", session::get_elapsed_seconds(), level, d),
        None => format!("[{:10.6} {}] ", session::get_elapsed_seconds(), level)
    };

    if record.level() > log::Level::Info {
        s.push_str(short_target(record.target()));
        s.push_str(": ");
    }

    s
}

/// Module path without the crate, `exp_lib::gauge` becomes `gauge`.
fn short_target(target: &str) -> &str {
    match target.find("::") {
        Some(i) => &target[i + 2..],
        None => target
    }
}

fn coloured_level(level: log::Level) -> ColoredString {
    match level {
        log::Level::Trace => "TRC".dimmed().italic(),
        log::Level::Debug => "DBG".dimmed(),
        log::Level::Info  => "INF".normal(),
        log::Level::Warn  => "WRN".yellow(),
        log::Level::Error => "ERR".red().bold()
    }
}

fn plain_level(level: log::Level) -> &'static str {
    match level {
        log::Level::Trace => "TRC",
        log::Level::Debug => "DBG",
        log::Level::Info  => "INF",
        log::Level::Warn  => "WRN",
        log::Level::Error => "ERR"
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_worker_device() {
        assert_eq!(worker_device(Some("ati_worker")), Some("ati"));
        assert_eq!(worker_device(Some("motors_worker")), Some("motors"));
        assert_eq!(worker_device(Some("main")), None);
        assert_eq!(worker_device(Some("_worker")), None);
        assert_eq!(worker_device(None), None);
    }

    #[test]
    fn test_prefix() {
        assert_eq!(short_target("exp_lib::gauge"), "gauge");
        assert_eq!(short_target("exp_lib::acquisition::workers"), "acquisition::workers");
        assert_eq!(short_target("mocap_exec"), "mocap_exec");

        let prefixes = || {
            let info = log::Record::builder()
                .level(log::Level::Info)
                .target("exp_lib::gauge")
                .build();
            let debug = log::Record::builder()
                .level(log::Level::Debug)
                .target("exp_lib::gauge")
                .build();
            (prefix(&info, "INF"), prefix(&debug, "DBG"))
        };

        let (i, _) = prefixes();
        assert!(i.ends_with(" INF] "), "{}", i);

        let handle = thread::Builder::new()
            .name(String::from("gauges_worker"))
            .spawn(prefixes)
            .unwrap();
        let (i, d) = handle.join().unwrap();

        assert!(i.ends_with(" INF gauges] "), "{}", i);
        assert!(d.ends_with(" DBG gauges] gauge: "), "{}", d);
    }
}
