//! Error types shared by the queue, configuration and simulation layers.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Outcomes of a queue operation other than success.
///
/// `Terminated` is not a failure: it is how a blocked or late caller learns that the
/// queue has been shut down and should leave its loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue capacity {requested} outside [{min}, {max}]")]
    CapacityOutOfRange {
        requested: usize,
        min: usize,
        max: usize,
    },
    #[error("queue terminated")]
    Terminated,
    #[error("queue invariant violated: {0}")]
    InvariantViolation(&'static str),
}

impl QueueError {
    /// Whether this is the clean shutdown signal rather than a real error.
    pub fn is_terminated(&self) -> bool {
        matches!(self, QueueError::Terminated)
    }
}

/// Runtime parameter outside the supported bounds.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("producers must be between {min} and {max} (got {got})")]
    Producers { got: usize, min: usize, max: usize },
    #[error("consumers must be between {min} and {max} (got {got})")]
    Consumers { got: usize, min: usize, max: usize },
    #[error("queue size must be between {min} and {max} (got {got})")]
    QueueSize { got: usize, min: usize, max: usize },
    #[error("timeout must be at least {min:?} (got {got:?})")]
    Timeout { got: Duration, min: Duration },
    #[error("{role} max wait must not exceed {max:?} (got {got:?})")]
    MaxWait {
        role: &'static str,
        got: Duration,
        max: Duration,
    },
    #[error("sample interval must be non-zero")]
    SampleInterval,
    #[error("{what} range {lo}..={hi} is empty or outside {min}..={max}")]
    Range {
        what: &'static str,
        lo: i64,
        hi: i64,
        min: i64,
        max: i64,
    },
}

/// Errors that abort a simulation run before or while it starts.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to install interrupt handler: {0}")]
    Signal(#[source] io::Error),
}
