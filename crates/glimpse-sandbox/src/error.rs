//! Error types for the render boundary.

use thiserror::Error;

/// Errors raised while bringing up or talking to a boundary.
///
/// These never escape [`crate::SandboxExecutor::render`]; the executor folds
/// them into a terminal [`crate::HostState`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SandboxError {
    /// The boundary worker could not be started.
    #[error("failed to spawn boundary worker '{worker}': {message}")]
    Spawn {
        /// The worker command.
        worker: String,
        /// What went wrong.
        message: String,
    },

    /// The worker binary is not safe to execute.
    #[error("insecure worker binary '{worker}': {reason}")]
    InsecureWorker {
        /// The worker command.
        worker: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The boundary did not come up before the load deadline.
    #[error("boundary did not load within {timeout_ms}ms")]
    LoadTimeout {
        /// Configured deadline in milliseconds.
        timeout_ms: u64,
    },

    /// The channel to the boundary is gone.
    #[error("boundary channel closed: {0}")]
    ChannelClosed(String),

    /// Source exceeds the configured maximum size.
    #[error("code exceeds maximum size of {max} bytes (got {actual})")]
    CodeTooLarge {
        /// Maximum allowed size.
        max: usize,
        /// Actual size.
        actual: usize,
    },

    /// Too many renders in flight.
    #[error("concurrency limit reached (max {max} concurrent renders)")]
    ConcurrencyLimit {
        /// Maximum allowed concurrent renders.
        max: usize,
    },

    /// Framing or I/O failure on the boundary pipe.
    #[error("boundary I/O error: {0}")]
    Io(#[from] std::io::Error),
}
