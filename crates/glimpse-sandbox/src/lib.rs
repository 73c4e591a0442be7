#![warn(missing_docs)]

//! # glimpse-sandbox
//!
//! Everything that stands between model-written component source and a
//! rendered result.
//!
//! ## Security model
//!
//! - **Static gate**: every source passes [`validator::Validator`] before it
//!   can be cached or rendered. The only way to obtain a
//!   [`ValidatedSource`] is a passing validation or the built-in fallback.
//! - **Isolated boundary**: rendering happens behind a [`boundary::Boundary`],
//!   either an external worker process with a cleared environment
//!   ([`host::ProcessBoundaryFactory`]) or an in-memory channel peer.
//! - **Bounded waits**: the [`machine::HostMachine`] handshake never waits
//!   without a deadline; a missing readiness signal and a silent boundary
//!   both resolve.
//! - **Tagged envelopes**: each boundary instance carries a fresh id, and
//!   envelopes from any other instance are discarded.

pub mod artifact;
pub mod audit;
pub mod boundary;
pub mod error;
pub mod executor;
pub mod fallback;
pub mod host;
pub mod machine;
pub mod protocol;
pub mod redact;
pub mod slot;
pub mod validator;

pub use artifact::{ArtifactOrigin, GenerationArtifact, COMPONENT_NAME};
pub use error::SandboxError;
pub use executor::{RenderReport, SandboxConfig, SandboxExecutor};
pub use machine::{HostMachine, HostState, RenderFailure};
pub use protocol::{BoundaryId, Envelope, SandboxMessage};
pub use slot::{PendingRender, RenderSlot};
pub use validator::{ValidatedSource, ValidationResult, Validator};
