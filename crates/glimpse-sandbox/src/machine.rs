//! Host side of the render handshake, as a pure state machine.
//!
//! ```text
//! Idle -> BoundaryLoading -> AwaitingReady -> Rendering -> RenderedOk
//!                                                      \-> RenderedError
//! ```
//!
//! The machine performs no I/O. The executor feeds it events (envelopes,
//! timeouts, channel closure) and acts on the returned [`Step`]. Input that
//! does not fit the current state, or that names another boundary instance,
//! is counted and discarded without a transition.

use std::time::Duration;

use glimpse_error::PipelineError;
use serde::Serialize;
use serde_json::Value;

use crate::protocol::{BoundaryId, Envelope, SandboxMessage};

/// Why a render ended in [`HostState::RenderedError`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderFailure {
    /// The boundary never came up, or went away before it was asked to render.
    LoadFailure {
        /// What went wrong.
        message: String,
    },
    /// The boundary's own error handler reported a failure.
    Reported {
        /// Error text from the boundary.
        message: String,
    },
    /// No terminal message arrived within the render wait.
    RenderTimeout {
        /// Configured wait in milliseconds.
        timeout_ms: u64,
    },
    /// The boundary went away while rendering.
    BoundaryClosed {
        /// What went wrong.
        message: String,
    },
    /// The executor refused to start the render.
    Rejected {
        /// Why.
        message: String,
    },
}

impl RenderFailure {
    /// Stable snake_case name of the variant, matching its serialized tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LoadFailure { .. } => "load_failure",
            Self::Reported { .. } => "reported",
            Self::RenderTimeout { .. } => "render_timeout",
            Self::BoundaryClosed { .. } => "boundary_closed",
            Self::Rejected { .. } => "rejected",
        }
    }

    /// Display text for the failure.
    pub fn message(&self) -> String {
        match self {
            Self::LoadFailure { message } => format!("boundary failed to load: {message}"),
            Self::Reported { message } => message.clone(),
            Self::RenderTimeout { timeout_ms } => {
                format!("render did not finish within {timeout_ms}ms")
            }
            Self::BoundaryClosed { message } => format!("boundary closed while rendering: {message}"),
            Self::Rejected { message } => format!("render rejected: {message}"),
        }
    }

    /// Map onto the pipeline taxonomy.
    pub fn to_pipeline_error(&self) -> PipelineError {
        match self {
            Self::LoadFailure { .. } | Self::Rejected { .. } => PipelineError::SandboxLoadFailure {
                message: self.message(),
            },
            _ => PipelineError::SandboxExecutionFailure {
                message: self.message(),
            },
        }
    }
}

/// Host-side handshake state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HostState {
    /// Nothing loaded.
    Idle,
    /// A boundary instance is being created.
    BoundaryLoading,
    /// Waiting for `Ready`.
    AwaitingReady,
    /// `ExecuteRequest` sent; waiting for the outcome.
    Rendering,
    /// Terminal: the component rendered.
    RenderedOk {
        /// Output reported by the boundary, if any.
        output: Option<Value>,
    },
    /// Terminal: the render failed.
    RenderedError {
        /// Why.
        failure: RenderFailure,
    },
}

impl HostState {
    /// Whether this state ends a render.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RenderedOk { .. } | Self::RenderedError { .. })
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::BoundaryLoading => "boundary_loading",
            Self::AwaitingReady => "awaiting_ready",
            Self::Rendering => "rendering",
            Self::RenderedOk { .. } => "rendered_ok",
            Self::RenderedError { .. } => "rendered_error",
        }
    }
}

/// What the executor must do after feeding an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Input discarded; nothing changed.
    Ignored,
    /// State changed; keep waiting.
    Advanced,
    /// Send (or resend) the `ExecuteRequest`.
    SendExecute,
    /// A terminal state was reached.
    Finished,
}

/// Host handshake state machine.
#[derive(Debug)]
pub struct HostMachine {
    state: HostState,
    boundary: Option<BoundaryId>,
    ready_confirmed: bool,
    resent: bool,
    discarded: usize,
}

impl Default for HostMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMachine {
    /// A machine in [`HostState::Idle`].
    pub fn new() -> Self {
        Self {
            state: HostState::Idle,
            boundary: None,
            ready_confirmed: false,
            resent: false,
            discarded: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> &HostState {
        &self.state
    }

    /// Instance the machine is currently bound to.
    pub fn boundary(&self) -> Option<&BoundaryId> {
        self.boundary.as_ref()
    }

    /// Whether a `Ready` from the live instance was seen.
    pub fn ready_confirmed(&self) -> bool {
        self.ready_confirmed
    }

    /// Number of inputs discarded so far.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Consume the machine, returning its state.
    pub fn into_state(self) -> HostState {
        self.state
    }

    /// Start a new boundary instance. Valid from any state: whatever was
    /// in flight is forgotten and input tagged with the old id is discarded
    /// from now on.
    pub fn begin_load(&mut self, boundary: BoundaryId) {
        self.boundary = Some(boundary);
        self.ready_confirmed = false;
        self.resent = false;
        self.transition(HostState::BoundaryLoading);
    }

    /// The boundary instance exists; start the readiness wait.
    pub fn boundary_loaded(&mut self) -> Step {
        if self.state != HostState::BoundaryLoading {
            return Step::Ignored;
        }
        self.transition(HostState::AwaitingReady);
        Step::Advanced
    }

    /// The boundary instance could not be created.
    pub fn load_failed(&mut self, message: impl Into<String>) -> Step {
        if self.state != HostState::BoundaryLoading {
            return Step::Ignored;
        }
        self.fail(RenderFailure::LoadFailure {
            message: message.into(),
        })
    }

    /// The executor refused to start.
    pub fn reject(&mut self, message: impl Into<String>) -> Step {
        if self.state.is_terminal() {
            return Step::Ignored;
        }
        self.fail(RenderFailure::Rejected {
            message: message.into(),
        })
    }

    /// Feed one decoded envelope.
    pub fn on_envelope(&mut self, envelope: &Envelope) -> Step {
        if self.boundary.as_ref() != Some(&envelope.boundary) {
            return self.discard("envelope from another boundary instance");
        }

        match (&self.state, &envelope.message) {
            (HostState::AwaitingReady, SandboxMessage::Ready) => {
                self.ready_confirmed = true;
                self.transition(HostState::Rendering);
                Step::SendExecute
            }
            // Ready after the readiness fallback already sent the request:
            // the first request may have been lost, so send it once more.
            (HostState::Rendering, SandboxMessage::Ready)
                if !self.ready_confirmed && !self.resent =>
            {
                self.ready_confirmed = true;
                self.resent = true;
                tracing::debug!(boundary = ?self.boundary, "late Ready, resending request");
                Step::SendExecute
            }
            (HostState::Rendering, SandboxMessage::ExecuteSuccess { data }) => {
                self.transition(HostState::RenderedOk {
                    output: data.clone(),
                });
                Step::Finished
            }
            (HostState::Rendering, SandboxMessage::ExecuteFailure { error }) => {
                self.fail(RenderFailure::Reported {
                    message: crate::redact::redact_error_message(error),
                })
            }
            _ => self.discard("message does not fit current state"),
        }
    }

    /// Feed input that failed to decode.
    pub fn on_malformed(&mut self) -> Step {
        self.discard("malformed envelope")
    }

    /// The readiness wait expired: proceed to render without confirmation.
    pub fn on_ready_timeout(&mut self) -> Step {
        if self.state != HostState::AwaitingReady {
            return Step::Ignored;
        }
        tracing::debug!(boundary = ?self.boundary, "no Ready before deadline, proceeding");
        self.transition(HostState::Rendering);
        Step::SendExecute
    }

    /// The render wait expired.
    pub fn on_render_timeout(&mut self, timeout: Duration) -> Step {
        if self.state != HostState::Rendering {
            return Step::Ignored;
        }
        self.fail(RenderFailure::RenderTimeout {
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    /// The channel to the boundary closed.
    pub fn on_boundary_closed(&mut self, message: impl Into<String>) -> Step {
        let message = message.into();
        match self.state {
            HostState::AwaitingReady => self.fail(RenderFailure::LoadFailure { message }),
            HostState::Rendering => self.fail(RenderFailure::BoundaryClosed { message }),
            _ => Step::Ignored,
        }
    }

    /// Tear down: back to [`HostState::Idle`] with no bound instance.
    pub fn reset(&mut self) {
        self.boundary = None;
        self.ready_confirmed = false;
        self.resent = false;
        self.transition(HostState::Idle);
    }

    fn fail(&mut self, failure: RenderFailure) -> Step {
        self.transition(HostState::RenderedError { failure });
        Step::Finished
    }

    fn discard(&mut self, reason: &'static str) -> Step {
        self.discarded += 1;
        tracing::debug!(state = self.state.name(), reason, "discarded sandbox input");
        Step::Ignored
    }

    fn transition(&mut self, next: HostState) {
        tracing::debug!(
            boundary = ?self.boundary,
            from = self.state.name(),
            to = next.name(),
            "sandbox transition"
        );
        self.state = next;
    }
}
