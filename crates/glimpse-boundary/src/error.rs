//! Errors raised inside the worker.

use thiserror::Error;

/// Why a component did not produce markup.
///
/// Reported back to the host as the `error` of an `ExecuteFailure`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BoundaryError {
    /// The source is not valid JSX.
    #[error("component does not parse: {0}")]
    Parse(String),

    /// JSX lowering failed.
    #[error("JSX transform failed: {0}")]
    Transform(String),

    /// The component (or its data) threw while rendering.
    #[error("component threw: {0}")]
    Component(String),

    /// The compiled script failed outside the component.
    #[error("script error: {0}")]
    Script(String),

    /// The render ran past its CPU budget.
    #[error("render exceeded {timeout_ms}ms")]
    Timeout {
        /// Budget in milliseconds.
        timeout_ms: u64,
    },

    /// The isolate approached its heap limit.
    #[error("render exceeded the heap limit")]
    HeapLimitExceeded,

    /// The markup is larger than allowed.
    #[error("render output exceeds {max} bytes")]
    OutputTooLarge {
        /// Limit in bytes.
        max: usize,
    },

    /// The script finished without reporting a result.
    #[error("component produced no result")]
    NoResult,

    /// The render thread could not be started or died.
    #[error("render thread failed: {0}")]
    Thread(String),

    /// JSON encoding of data or result failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
