//! The code-generation seam.

use glimpse_error::PipelineError;
use serde_json::Value;

/// What the model is asked to render.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The data-API endpoint the component is for.
    pub endpoint: String,
    /// A sample response from that endpoint.
    pub sample_data: Value,
    /// Extra guidance for a regeneration, if any.
    pub instructions: Option<String>,
}

impl GenerationRequest {
    /// A first-time request with no extra guidance.
    pub fn new(endpoint: impl Into<String>, sample_data: Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            sample_data,
            instructions: None,
        }
    }

    /// Attach regeneration instructions.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

/// A black-box source of component code.
///
/// Implementations return the model's raw text. Packaging such as code
/// fences is left in place for the validator to strip.
#[async_trait::async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Provider name used in errors and logs.
    fn name(&self) -> &str;

    /// Produce component source for `request`.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, PipelineError>;
}
