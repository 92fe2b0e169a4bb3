//! Per-cycle errors and how workers report them.
//!
//! Nothing here reaches the controller: a failed cycle is reported and the
//! worker moves on to the next one.

use std::fmt;

/// Something went wrong inside one worker cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleError {
    /// The source delivered fewer samples than a full block.
    ShortRead { expected: usize, got: usize },
    /// The audio device reported an error.
    Device(String),
    /// The front-end rejected a feed or failed a fetch.
    Engine(String),
}

impl CycleError {
    /// Expected during normal operation, not worth a warning.
    pub fn is_routine(&self) -> bool {
        matches!(self, CycleError::ShortRead { .. })
    }
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleError::ShortRead { expected, got } => {
                write!(f, "Short read: {} of {} samples", got, expected)
            }
            CycleError::Device(msg) => write!(f, "Device error: {}", msg),
            CycleError::Engine(msg) => write!(f, "Engine error: {}", msg),
        }
    }
}

impl std::error::Error for CycleError {}

/// Trait for reporting worker cycle errors.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from a worker.
    fn report(&self, worker: &str, error: &CycleError);
}

/// Reporter that writes to the log: routine errors at debug, the rest at warn.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, worker: &str, error: &CycleError) {
        if error.is_routine() {
            log::debug!("[{}] {}", worker, error);
        } else {
            log::warn!("[{}] {}", worker, error);
        }
    }
}
