//! Circuit breaker around a code generator.
//!
//! After `failure_threshold` consecutive failures every call is rejected with
//! [`PipelineError::CircuitOpen`] until `recovery_timeout` has passed. The
//! next call is a trial: success closes the circuit, failure re-opens it.

use std::sync::Arc;
use std::time::Duration;

use glimpse_error::PipelineError;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::generator::{CodeGenerator, GenerationRequest};

/// Breaker thresholds.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit waits before probing.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// A [`CodeGenerator`] that stops calling a failing upstream.
pub struct CircuitBreakerGenerator {
    inner: Arc<dyn CodeGenerator>,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreakerGenerator {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn CodeGenerator>, config: CircuitBreakerConfig) -> Self {
        Self {
            inner,
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
            }),
        }
    }

    async fn admit(&self) -> Result<(), PipelineError> {
        let mut st = self.state.lock().await;
        if st.state != CircuitState::Open {
            return Ok(());
        }
        let Some(last) = st.last_failure else {
            return Ok(());
        };
        let elapsed = last.elapsed();
        if elapsed >= self.config.recovery_timeout {
            st.state = CircuitState::HalfOpen;
            tracing::info!(generator = %self.inner.name(), "circuit breaker half-open, allowing a trial call");
            return Ok(());
        }
        Err(PipelineError::CircuitOpen(format!(
            "'{}': {} consecutive failures, recovery in {}s",
            self.inner.name(),
            st.consecutive_failures,
            (self.config.recovery_timeout - elapsed).as_secs()
        )))
    }

    async fn record(&self, ok: bool) {
        let mut st = self.state.lock().await;
        if ok {
            if st.state == CircuitState::HalfOpen {
                tracing::info!(generator = %self.inner.name(), "circuit breaker closed after a successful trial call");
            }
            st.state = CircuitState::Closed;
            st.consecutive_failures = 0;
            st.last_failure = None;
            return;
        }

        st.consecutive_failures += 1;
        st.last_failure = Some(Instant::now());
        if st.state == CircuitState::HalfOpen {
            st.state = CircuitState::Open;
            tracing::warn!(generator = %self.inner.name(), "circuit breaker re-opened after a failed trial call");
        } else if st.consecutive_failures >= self.config.failure_threshold {
            st.state = CircuitState::Open;
            tracing::warn!(
                generator = %self.inner.name(),
                failures = st.consecutive_failures,
                "circuit breaker opened"
            );
        }
    }
}

#[async_trait::async_trait]
impl CodeGenerator for CircuitBreakerGenerator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, PipelineError> {
        self.admit().await?;
        let result = self.inner.generate(request).await;
        self.record(result.is_ok()).await;
        result
    }
}
