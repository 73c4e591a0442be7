//! Audit logging for sandbox renders.
//!
//! Every render emits a [`RenderAuditEntry`] containing:
//! - Render ID (UUID)
//! - SHA-256 hash of the source (never raw source in logs)
//! - A redacted preview of the first 500 bytes of source
//! - Boundary instance id, readiness confirmation, discarded message count
//! - Duration and outcome
//!
//! The [`AuditLogger`] trait allows pluggable backends.
//! [`JsonLinesAuditLogger`] writes newline-delimited JSON to any `AsyncWrite`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Instant;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::machine::{HostState, RenderFailure};

/// Maximum length of the source preview in audit entries.
const CODE_PREVIEW_MAX: usize = 500;

/// A complete audit record for a single render.
#[derive(Debug, Clone, Serialize)]
pub struct RenderAuditEntry {
    /// Unique render identifier.
    pub render_id: String,
    /// When the render started.
    pub timestamp: DateTime<Utc>,
    /// SHA-256 hash of the rendered source.
    pub code_hash: String,
    /// Redacted first N bytes of the source.
    pub code_preview: String,
    /// Boundary instance used, if one was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boundary_id: Option<String>,
    /// Whether the boundary signalled `Ready` before the request was sent.
    pub ready_confirmed: bool,
    /// Inputs the host discarded during the handshake.
    #[serde(skip_serializing_if = "is_zero")]
    pub discarded_messages: usize,
    /// Total render duration in milliseconds.
    pub duration_ms: u64,
    /// Final outcome.
    pub outcome: AuditOutcome,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// The outcome of a render.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum AuditOutcome {
    /// The component rendered.
    Success,
    /// The render failed.
    Error {
        /// The failure message.
        message: String,
    },
    /// The render wait expired.
    Timeout,
}

/// Trait for audit log backends.
#[async_trait::async_trait]
pub trait AuditLogger: Send + Sync {
    /// Write an audit entry.
    async fn log(&self, entry: &RenderAuditEntry);
}

/// A no-op audit logger for when auditing is not needed.
pub struct NoopAuditLogger;

#[async_trait::async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _entry: &RenderAuditEntry) {}
}

/// An audit logger that emits structured events via [`tracing`].
///
/// Entries are logged at `INFO` with `audit = true` for easy filtering.
pub struct TracingAuditLogger;

#[async_trait::async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, entry: &RenderAuditEntry) {
        let outcome = match &entry.outcome {
            AuditOutcome::Success => "success",
            AuditOutcome::Error { .. } => "error",
            AuditOutcome::Timeout => "timeout",
        };
        tracing::info!(
            audit = true,
            render_id = %entry.render_id,
            code_hash = %entry.code_hash,
            boundary = entry.boundary_id.as_deref().unwrap_or("-"),
            ready_confirmed = entry.ready_confirmed,
            discarded = entry.discarded_messages,
            duration_ms = entry.duration_ms,
            outcome,
            "render audit"
        );
    }
}

/// Writes audit entries as newline-delimited JSON to an `AsyncWrite` sink.
pub struct JsonLinesAuditLogger<W: AsyncWrite + Unpin + Send> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesAuditLogger<W> {
    /// Create a logger writing to the given sink.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait::async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> AuditLogger for JsonLinesAuditLogger<W> {
    async fn log(&self, entry: &RenderAuditEntry) {
        let mut line = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize audit entry");
                return;
            }
        };
        line.push('\n');

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::warn!(error = %e, "failed to write audit entry");
        }
        let _ = writer.flush().await;
    }
}

/// SHA-256 of a string, hex encoded.
pub fn sha256_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// First N bytes of the source, with an ellipsis if truncated.
///
/// Truncates at a char boundary.
pub fn code_preview(code: &str) -> String {
    if code.len() <= CODE_PREVIEW_MAX {
        return code.to_string();
    }
    let mut end = CODE_PREVIEW_MAX;
    while !code.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &code[..end])
}

/// Collects audit data while a render runs.
pub struct RenderAuditBuilder {
    render_id: String,
    timestamp: DateTime<Utc>,
    code_hash: String,
    code_preview: String,
    start: Instant,
}

impl RenderAuditBuilder {
    /// Start an entry for rendering `code`.
    pub fn new(code: &str) -> Self {
        Self {
            render_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            code_hash: sha256_hex(code),
            code_preview: crate::redact::redact_error_message(&code_preview(code)),
            start: Instant::now(),
        }
    }

    /// Finalize with the terminal state reached.
    pub fn finish(
        self,
        state: &HostState,
        boundary_id: Option<String>,
        ready_confirmed: bool,
        discarded_messages: usize,
    ) -> RenderAuditEntry {
        let outcome = match state {
            HostState::RenderedOk { .. } => AuditOutcome::Success,
            HostState::RenderedError {
                failure: RenderFailure::RenderTimeout { .. },
            } => AuditOutcome::Timeout,
            HostState::RenderedError { failure } => AuditOutcome::Error {
                message: failure.message(),
            },
            other => AuditOutcome::Error {
                message: format!("render ended in non-terminal state {other:?}"),
            },
        };

        RenderAuditEntry {
            render_id: self.render_id,
            timestamp: self.timestamp,
            code_hash: self.code_hash,
            code_preview: self.code_preview,
            boundary_id,
            ready_confirmed,
            discarded_messages,
            duration_ms: self.start.elapsed().as_millis() as u64,
            outcome,
        }
    }
}
