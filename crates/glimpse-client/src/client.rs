//! Timeout-bounded generation with fallback substitution.

use std::sync::Arc;
use std::time::Duration;

use glimpse_error::PipelineError;
use glimpse_sandbox::{GenerationArtifact, Validator};

use crate::generator::{CodeGenerator, GenerationRequest};

/// Result of one generation attempt.
///
/// `artifact` is always renderable: either freshly generated and validated,
/// or the fallback. When it is the fallback, `error` says why.
#[derive(Debug)]
pub struct Generation {
    /// What to render.
    pub artifact: GenerationArtifact,
    /// The failure that forced a fallback, if any.
    pub error: Option<PipelineError>,
}

impl Generation {
    /// Whether a fallback was substituted.
    pub fn degraded(&self) -> bool {
        self.error.is_some()
    }

    /// Violations when validation caused the fallback.
    pub fn violations(&self) -> &[String] {
        match &self.error {
            Some(PipelineError::ValidationFailure { violations }) => violations,
            _ => &[],
        }
    }

    fn fallback(error: PipelineError) -> Self {
        Self {
            artifact: GenerationArtifact::fallback(error.to_string()),
            error: Some(error),
        }
    }
}

/// Front door to the model.
pub struct GeneratorClient {
    generator: Arc<dyn CodeGenerator>,
    validator: Validator,
    timeout: Duration,
}

impl GeneratorClient {
    /// A client over `generator`, giving up after `timeout`.
    pub fn new(generator: Arc<dyn CodeGenerator>, validator: Validator, timeout: Duration) -> Self {
        Self {
            generator,
            validator,
            timeout,
        }
    }

    /// The validator applied to generated source.
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Raw model output, bounded by the timeout.
    pub async fn generate_source(&self, request: &GenerationRequest) -> Result<String, PipelineError> {
        match tokio::time::timeout(self.timeout, self.generator.generate(request)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(PipelineError::GenerationTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    /// Generate, validate, and fall back on any failure.
    pub async fn generate(&self, request: &GenerationRequest) -> Generation {
        let started = std::time::Instant::now();
        tracing::info!(
            endpoint = %request.endpoint,
            generator = %self.generator.name(),
            "generation started"
        );

        let source = match self.generate_source(request).await {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(endpoint = %request.endpoint, code = e.code(), error = %e, "generation failed, using fallback");
                return Generation::fallback(e);
            }
        };

        match self.validator.gate(&source) {
            Ok(validated) => {
                tracing::info!(
                    endpoint = %request.endpoint,
                    bytes = validated.len(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "generation finished"
                );
                Generation {
                    artifact: GenerationArtifact::fresh(validated),
                    error: None,
                }
            }
            Err(result) => {
                tracing::warn!(
                    endpoint = %request.endpoint,
                    violations = result.violations.len(),
                    "generated code failed validation, using fallback"
                );
                Generation::fallback(PipelineError::ValidationFailure {
                    violations: result.violations,
                })
            }
        }
    }
}
