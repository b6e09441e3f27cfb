//! Error types for the chime reminder engine.

use crate::resolver::ResolveError;
use crate::scheduler::recurrence::RecurrenceError;
use crate::store::StoreError;

/// Top-level error type for the reminder engine.
#[derive(Debug, thiserror::Error)]
pub enum ChimeError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Persistent reminder store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Recurrence rule could not be turned into a trigger.
    #[error("recurrence error: {0}")]
    Recurrence(#[from] RecurrenceError),

    /// The temporal resolver found no usable time in the request.
    #[error("{0}")]
    Resolve(#[from] ResolveError),

    /// Scheduler lifecycle error (start/stop, loop gone).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ChimeError>;
