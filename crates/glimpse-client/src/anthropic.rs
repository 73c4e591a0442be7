//! Messages-API generator.

use std::time::Duration;

use glimpse_error::PipelineError;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::generator::{CodeGenerator, GenerationRequest};
use crate::prompt;

const PROVIDER: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";

/// Connection settings for [`AnthropicGenerator`].
#[derive(Clone)]
pub struct AnthropicConfig {
    /// API root, without the `/v1/messages` suffix.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// API key sent as `x-api-key`.
    pub api_key: String,
    /// Output token cap.
    pub max_tokens: u32,
    /// Transport-level timeout. The pipeline applies its own deadline too.
    pub request_timeout: Duration,
}

impl std::fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// A [`CodeGenerator`] calling an Anthropic-compatible messages endpoint.
pub struct AnthropicGenerator {
    client: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicGenerator {
    /// Build a generator with its own HTTP client.
    pub fn new(config: AnthropicConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| upstream(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }
}

impl std::fmt::Debug for AnthropicGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicGenerator")
            .field("config", &self.config)
            .finish()
    }
}

fn upstream(message: String) -> PipelineError {
    PipelineError::GenerationUpstreamError {
        provider: PROVIDER.to_string(),
        message,
    }
}

#[async_trait::async_trait]
impl CodeGenerator for AnthropicGenerator {
    fn name(&self) -> &str {
        PROVIDER
    }

    #[tracing::instrument(skip(self, request), fields(endpoint = %request.endpoint, model = %self.config.model))]
    async fn generate(&self, request: &GenerationRequest) -> Result<String, PipelineError> {
        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system: prompt::system_prompt(),
            messages: vec![Message {
                role: "user",
                content: prompt::build_prompt(request),
            }],
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    upstream("request timed out".into())
                } else {
                    upstream(format!("HTTP request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|body| body.error.message)
                .unwrap_or(text);
            let message = match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    format!("invalid API key (HTTP {})", status.as_u16())
                }
                StatusCode::TOO_MANY_REQUESTS => "rate limited (HTTP 429)".to_string(),
                _ => format!("HTTP {}: {}", status.as_u16(), detail),
            };
            tracing::warn!(status = status.as_u16(), "generator request rejected");
            return Err(upstream(message));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| upstream(format!("failed to parse response: {e}")))?;

        parsed
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::Text { text } if !text.trim().is_empty() => Some(text),
                _ => None,
            })
            .ok_or_else(|| upstream("response contained no text".into()))
    }
}
