//! Typed error taxonomy for the Glimpse generation pipeline.
//!
//! Provides [`PipelineError`], the canonical error type for every stage that
//! can fail (data fetch, generation, validation, sandbox, cache backend).
//! Each stage returns it as a local `Result`; only the orchestrator folds it
//! into a user-facing outcome.

use thiserror::Error;

/// Canonical error type for pipeline stages.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// The sample-data fetch did not finish in time.
    #[error("data fetch timed out after {timeout_ms}ms for '{url}'")]
    FetchTimeout {
        /// The endpoint being fetched.
        url: String,
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// The data API answered with a non-success status.
    #[error("data API '{url}' returned HTTP {status}")]
    FetchHttpError {
        /// The endpoint being fetched.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The fetch failed before a status was available, or the body was unusable.
    #[error("data fetch from '{url}' failed: {message}")]
    FetchFailed {
        /// The endpoint being fetched.
        url: String,
        /// What went wrong.
        message: String,
    },

    /// The endpoint supplied by the caller is not an acceptable URL.
    #[error("invalid API endpoint: {0}")]
    InvalidEndpoint(String),

    /// The code generator did not answer in time.
    #[error("code generation timed out after {timeout_ms}ms")]
    GenerationTimeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// The code generator returned an error.
    #[error("code generation failed at '{provider}': {message}")]
    GenerationUpstreamError {
        /// The generator provider name.
        provider: String,
        /// The upstream error message.
        message: String,
    },

    /// The circuit breaker in front of the generator is open.
    #[error("circuit breaker open for generator: {0}")]
    CircuitOpen(String),

    /// Generated code broke one or more validation rules.
    #[error("generated code failed validation ({} violation(s)): {}", violations.len(), violations.join("; "))]
    ValidationFailure {
        /// Every rule that was broken, in rule-table order.
        violations: Vec<String>,
    },

    /// The execution boundary could not be brought up.
    #[error("sandbox failed to load: {message}")]
    SandboxLoadFailure {
        /// What went wrong.
        message: String,
    },

    /// The code inside the boundary failed, or the render wait expired.
    #[error("sandbox execution failed: {message}")]
    SandboxExecutionFailure {
        /// The failure reported by (or synthesised for) the boundary.
        message: String,
    },

    /// The cache backing store failed. Callers downgrade this to a miss or no-op.
    #[error("cache backend error: {message}")]
    CacheBackendError {
        /// What went wrong.
        message: String,
    },

    /// An internal error (catch-all for unexpected failures).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    /// Returns a static error code string for programmatic matching.
    pub fn code(&self) -> &'static str {
        match self {
            Self::FetchTimeout { .. } => "FETCH_TIMEOUT",
            Self::FetchHttpError { .. } => "FETCH_HTTP_ERROR",
            Self::FetchFailed { .. } => "FETCH_FAILED",
            Self::InvalidEndpoint(_) => "INVALID_ENDPOINT",
            Self::GenerationTimeout { .. } => "GENERATION_TIMEOUT",
            Self::GenerationUpstreamError { .. } => "GENERATION_UPSTREAM_ERROR",
            Self::CircuitOpen(_) => "CIRCUIT_OPEN",
            Self::ValidationFailure { .. } => "VALIDATION_FAILURE",
            Self::SandboxLoadFailure { .. } => "SANDBOX_LOAD_FAILURE",
            Self::SandboxExecutionFailure { .. } => "SANDBOX_EXECUTION_FAILURE",
            Self::CacheBackendError { .. } => "CACHE_BACKEND_ERROR",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Returns whether the operation that produced this error may succeed if retried.
    pub fn retryable(&self) -> bool {
        match self {
            Self::FetchTimeout { .. } => true,
            Self::GenerationTimeout { .. } => true,
            Self::GenerationUpstreamError { .. } => true,
            Self::CircuitOpen(_) => true,
            Self::CacheBackendError { .. } => true,
            // A regeneration can produce different code.
            Self::ValidationFailure { .. } => true,
            Self::FetchHttpError { status, .. } => *status >= 500 || *status == 429,
            Self::FetchFailed { .. } => false,
            Self::InvalidEndpoint(_) => false,
            Self::SandboxLoadFailure { .. } => false,
            Self::SandboxExecutionFailure { .. } => false,
            Self::Internal(_) => false,
        }
    }

    /// Returns whether this error is one of the timeout kinds.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::FetchTimeout { .. } | Self::GenerationTimeout { .. }
        )
    }

    /// Convert to a structured JSON error body.
    ///
    /// Returns a JSON object with `error`, `code`, `message`, `retryable`,
    /// `violations` for validation failures, and an optional `suggested_fix`.
    pub fn to_structured_error(&self) -> serde_json::Value {
        let suggested_fix = match self {
            Self::FetchTimeout { .. } => Some("Check that the data API is reachable and responsive"),
            Self::FetchHttpError { status, .. } if *status == 401 || *status == 403 => {
                Some("The data API requires credentials Glimpse does not send")
            }
            Self::GenerationTimeout { .. } | Self::CircuitOpen(_) => Some("Retry after a delay"),
            Self::ValidationFailure { .. } => Some("Regenerate the component"),
            Self::InvalidEndpoint(_) => Some("Use an absolute http:// or https:// URL"),
            _ => None,
        };

        let mut obj = serde_json::json!({
            "error": true,
            "code": self.code(),
            "message": self.to_string(),
            "retryable": self.retryable(),
        });

        if let Self::ValidationFailure { violations } = self {
            obj["violations"] = serde_json::json!(violations);
        }
        if let Some(fix) = suggested_fix {
            obj["suggested_fix"] = serde_json::Value::String(fix.to_string());
        }

        obj
    }
}

// Compile-time assertion: PipelineError must be Send + Sync + 'static
const _: fn() = || {
    fn assert_bounds<T: Send + Sync + 'static>() {}
    assert_bounds::<PipelineError>();
};
