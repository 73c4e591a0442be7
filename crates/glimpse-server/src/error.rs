use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use glimpse_error::PipelineError;
use serde_json::json;

/// Error type for HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A pipeline error that escaped the orchestrator.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Malformed request.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Submitted code broke validation rules.
    #[error("code failed validation")]
    Validation {
        /// Broken rules.
        violations: Vec<String>,
    },

    /// A newer render from the same session replaced this one.
    #[error("render superseded by a newer one")]
    Superseded,

    /// Something unexpected on our side.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Handler result alias.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Pipeline(err) => {
                let status = match err {
                    PipelineError::InvalidEndpoint(_) => StatusCode::BAD_REQUEST,
                    PipelineError::ValidationFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    PipelineError::FetchTimeout { .. } | PipelineError::GenerationTimeout { .. } => {
                        StatusCode::GATEWAY_TIMEOUT
                    }
                    PipelineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    _ => StatusCode::BAD_GATEWAY,
                };
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!(error = %err, "internal pipeline error");
                    (status, err.code(), "An internal error occurred".to_string())
                } else {
                    (status, err.code(), err.to_string())
                }
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Validation { violations } => {
                let body = json!({
                    "error": self.to_string(),
                    "code": "VALIDATION_FAILURE",
                    "violations": violations,
                });
                return (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(body)).into_response();
            }
            AppError::Superseded => (StatusCode::CONFLICT, "RENDER_SUPERSEDED", self.to_string()),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
