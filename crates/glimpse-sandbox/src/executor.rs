//! Sandbox executor: drives one render through a fresh boundary instance.
//!
//! Each render gets a new boundary with a new id. The executor feeds the
//! [`HostMachine`] from the boundary and from two deadlines (readiness and
//! render), and always returns a terminal [`HostState`]. Boundary crashes,
//! refusals and timeouts become [`HostState::RenderedError`]; nothing is
//! propagated as an error.

use std::sync::Arc;
use std::time::Duration;

use glimpse_error::PipelineError;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::audit::{AuditLogger, NoopAuditLogger, RenderAuditBuilder};
use crate::boundary::{Boundary, BoundaryFactory, Inbound};
use crate::error::SandboxError;
use crate::machine::{HostMachine, HostState, RenderFailure, Step};
use crate::protocol::{BoundaryId, Envelope, SandboxMessage};
use crate::validator::{ValidatedSource, DEFAULT_MAX_CODE_SIZE};

/// Configuration for the sandbox executor.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// How long to wait for `Ready` before sending the request anyway.
    /// Also bounds boundary creation.
    pub ready_timeout: Duration,
    /// How long to wait for the render outcome after the request is sent.
    pub render_timeout: Duration,
    /// Maximum concurrent renders.
    pub max_concurrent: usize,
    /// Maximum source size in bytes.
    pub max_code_size: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_millis(1500),
            render_timeout: Duration::from_secs(5),
            max_concurrent: 8,
            max_code_size: DEFAULT_MAX_CODE_SIZE,
        }
    }
}

/// Outcome of one render.
#[derive(Debug, Clone, Serialize)]
pub struct RenderReport {
    /// Boundary instance used, if one was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boundary_id: Option<BoundaryId>,
    /// Terminal state reached.
    pub outcome: HostState,
    /// Whether `Ready` arrived before the request was first sent.
    pub ready_confirmed: bool,
    /// Inputs discarded during the handshake.
    pub discarded_messages: usize,
    /// Wall time spent, in milliseconds.
    pub duration_ms: u64,
}

impl RenderReport {
    /// Whether the component rendered.
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, HostState::RenderedOk { .. })
    }

    /// Output reported by the boundary on success.
    pub fn output(&self) -> Option<&Value> {
        match &self.outcome {
            HostState::RenderedOk { output } => output.as_ref(),
            _ => None,
        }
    }

    /// Failure detail on error.
    pub fn failure(&self) -> Option<&RenderFailure> {
        match &self.outcome {
            HostState::RenderedError { failure } => Some(failure),
            _ => None,
        }
    }

    /// The failure as a pipeline error.
    pub fn error(&self) -> Option<PipelineError> {
        self.failure().map(RenderFailure::to_pipeline_error)
    }
}

/// Runs renders through boundaries produced by a [`BoundaryFactory`].
///
/// `Send + Sync`; share it behind an `Arc`. A semaphore caps the number of
/// boundaries alive at once.
pub struct SandboxExecutor {
    config: SandboxConfig,
    factory: Arc<dyn BoundaryFactory>,
    semaphore: Arc<Semaphore>,
    audit_logger: Arc<dyn AuditLogger>,
}

impl SandboxExecutor {
    /// Create an executor without auditing.
    pub fn new(config: SandboxConfig, factory: Arc<dyn BoundaryFactory>) -> Self {
        Self::with_audit_logger(config, factory, Arc::new(NoopAuditLogger))
    }

    /// Create an executor with an audit logger.
    pub fn with_audit_logger(
        config: SandboxConfig,
        factory: Arc<dyn BoundaryFactory>,
        logger: Arc<dyn AuditLogger>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            config,
            factory,
            semaphore,
            audit_logger: logger,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Render `source` against `data` in a fresh boundary.
    pub async fn render(&self, source: &ValidatedSource, data: &Value) -> RenderReport {
        let started = Instant::now();
        let audit = RenderAuditBuilder::new(source.as_str());
        let mut machine = HostMachine::new();

        if source.len() > self.config.max_code_size {
            machine.reject(
                SandboxError::CodeTooLarge {
                    max: self.config.max_code_size,
                    actual: source.len(),
                }
                .to_string(),
            );
        } else {
            match self.semaphore.clone().try_acquire_owned() {
                Ok(_permit) => self.run(&mut machine, source, data).await,
                Err(_) => {
                    machine.reject(
                        SandboxError::ConcurrencyLimit {
                            max: self.config.max_concurrent,
                        }
                        .to_string(),
                    );
                }
            }
        }

        let boundary_id = machine.boundary().cloned();
        let ready_confirmed = machine.ready_confirmed();
        let discarded_messages = machine.discarded();
        let outcome = machine.into_state();

        let entry = audit.finish(
            &outcome,
            boundary_id.as_ref().map(ToString::to_string),
            ready_confirmed,
            discarded_messages,
        );
        self.audit_logger.log(&entry).await;

        let report = RenderReport {
            boundary_id,
            outcome,
            ready_confirmed,
            discarded_messages,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        match report.failure() {
            None => tracing::info!(duration_ms = report.duration_ms, "render succeeded"),
            Some(failure) => tracing::warn!(
                duration_ms = report.duration_ms,
                error = %failure.message(),
                "render failed"
            ),
        }
        report
    }

    async fn run(&self, machine: &mut HostMachine, source: &ValidatedSource, data: &Value) {
        let id = BoundaryId::generate();
        machine.begin_load(id.clone());

        let loaded =
            tokio::time::timeout(self.config.ready_timeout, self.factory.instantiate(id.clone()))
                .await;
        let mut boundary = match loaded {
            Ok(Ok(boundary)) => boundary,
            Ok(Err(e)) => {
                machine.load_failed(e.to_string());
                return;
            }
            Err(_) => {
                machine.load_failed(
                    SandboxError::LoadTimeout {
                        timeout_ms: self.config.ready_timeout.as_millis() as u64,
                    }
                    .to_string(),
                );
                return;
            }
        };
        machine.boundary_loaded();

        let request = Envelope::new(
            id,
            SandboxMessage::ExecuteRequest {
                code: source.as_str().to_string(),
                data: data.clone(),
            },
        );
        self.handshake(machine, boundary.as_mut(), &request).await;
        boundary.teardown().await;
    }

    async fn handshake(
        &self,
        machine: &mut HostMachine,
        boundary: &mut dyn Boundary,
        request: &Envelope,
    ) {
        let ready_deadline = Instant::now() + self.config.ready_timeout;
        while matches!(machine.state(), HostState::AwaitingReady) {
            let step = match tokio::time::timeout_at(ready_deadline, boundary.recv()).await {
                Ok(inbound) => apply(machine, inbound),
                Err(_) => machine.on_ready_timeout(),
            };
            if step == Step::SendExecute {
                send_request(machine, boundary, request).await;
            }
        }

        let render_deadline = Instant::now() + self.config.render_timeout;
        while matches!(machine.state(), HostState::Rendering) {
            let step = match tokio::time::timeout_at(render_deadline, boundary.recv()).await {
                Ok(inbound) => apply(machine, inbound),
                Err(_) => machine.on_render_timeout(self.config.render_timeout),
            };
            if step == Step::SendExecute {
                send_request(machine, boundary, request).await;
            }
        }
    }
}

fn apply(machine: &mut HostMachine, inbound: Inbound) -> Step {
    match inbound {
        Inbound::Message(envelope) => machine.on_envelope(&envelope),
        Inbound::Malformed => machine.on_malformed(),
        Inbound::Closed { reason } => machine.on_boundary_closed(reason),
    }
}

async fn send_request(machine: &mut HostMachine, boundary: &mut dyn Boundary, request: &Envelope) {
    if let Err(e) = boundary.send(request).await {
        machine.on_boundary_closed(e.to_string());
    }
}
