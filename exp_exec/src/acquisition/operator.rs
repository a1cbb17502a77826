//! The operator in the loop
//!
//! The experiment stops for the operator at three points: when some devices failed to start, when
//! the pretensioner reaches its iteration cap, and at the start barrier.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{info, warn};
use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

use crate::params::DeviceId;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Counts of the start countdown.
const COUNTDOWN: [&str; 4] = ["3", "2", "1", "GO"];

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Decisions taken by the operator.
pub trait Operator {
    /// Some devices failed to start. Return `true` to carry on without them.
    fn confirm_partial(&mut self, failed: &[DeviceId]) -> bool;

    /// The pretensioner ran `iterations` iterations without settling.
    fn on_pretension_cap(&mut self, iterations: usize) -> CapChoice;

    /// Hold the experiment until the operator starts it. Return `false` to abort.
    ///
    /// The countdown is advisory, the workers still start one after the other.
    fn barrier(&mut self) -> bool;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// An operator at the terminal.
pub struct ConsoleOperator {
    /// Delay between the counts of the countdown
    tick: Duration
}

/// An operator which confirms every prompt, for unattended runs.
pub struct AutoOperator {
    /// Number of times the pretension cap may be extended before aborting
    cap_retries: usize
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// What to do when the pretensioner reaches its iteration cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapChoice {
    /// Run another `max_iterations` iterations
    Continue,

    Abort
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ConsoleOperator {
    pub fn new() -> Self {
        Self {
            tick: Duration::from_secs(1)
        }
    }

    /// Ask a question, returning the first character of the trimmed lowercase answer.
    ///
    /// End of input reads as an empty answer.
    fn ask(&self, question: &str) -> Option<char> {
        print!("{} ", question);
        io::stdout().flush().ok();

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(_) => line.trim().to_lowercase().chars().next(),
            Err(e) => {
                warn!("Cannot read the operator's answer: {}", e);
                None
            }
        }
    }
}

impl Default for ConsoleOperator {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator for ConsoleOperator {
    fn confirm_partial(&mut self, failed: &[DeviceId]) -> bool {
        let names: Vec<String> = failed.iter().map(|d| d.to_string()).collect();
        warn!("Devices failed to start: {}", names.join(", "));

        self.ask("Continue without them? [y/N]") == Some('y')
    }

    fn on_pretension_cap(&mut self, iterations: usize) -> CapChoice {
        warn!("Pretension did not settle in {} iterations", iterations);

        match self.ask("[c]ontinue pretensioning or [A]bort?") {
            Some('c') => CapChoice::Continue,
            _ => CapChoice::Abort
        }
    }

    fn barrier(&mut self) -> bool {
        if self.ask("Press enter to start the experiment, or 'a' to abort:") == Some('a') {
            return false
        }

        for count in COUNTDOWN.iter() {
            info!("{}", count);
            if *count != "GO" {
                thread::sleep(self.tick);
            }
        }

        true
    }
}

impl AutoOperator {
    pub fn new(cap_retries: usize) -> Self {
        Self {
            cap_retries
        }
    }
}

impl Operator for AutoOperator {
    fn confirm_partial(&mut self, failed: &[DeviceId]) -> bool {
        let names: Vec<String> = failed.iter().map(|d| d.to_string()).collect();
        warn!("Continuing without: {}", names.join(", "));
        true
    }

    fn on_pretension_cap(&mut self, iterations: usize) -> CapChoice {
        if self.cap_retries == 0 {
            warn!("Pretension did not settle in {} iterations, aborting", iterations);
            return CapChoice::Abort
        }

        self.cap_retries -= 1;
        warn!("Pretension did not settle in {} iterations, continuing", iterations);
        CapChoice::Continue
    }

    fn barrier(&mut self) -> bool {
        info!("GO");
        true
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_auto_operator() {
        let mut op = AutoOperator::new(1);

        assert!(op.confirm_partial(&[DeviceId::Mocap]));
        assert!(op.barrier());

        assert_eq!(op.on_pretension_cap(200), CapChoice::Continue);
        assert_eq!(op.on_pretension_cap(400), CapChoice::Abort);
    }
}
