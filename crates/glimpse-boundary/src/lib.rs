#![warn(missing_docs)]

//! # glimpse-boundary
//!
//! The worker end of the sandbox handshake. The host spawns one
//! `glimpse-boundary` process per render with a cleared environment. The
//! process announces `Ready` and answers a single `ExecuteRequest` before
//! exiting.
//!
//! Rendering runs in a fresh V8 isolate ([`runtime`]) after the JSX source
//! is lowered to plain `React.createElement` calls ([`transpile`]). The
//! isolate carries a minimal React-compatible shim that renders the element
//! tree to static markup. The isolate has no DOM and no network access.

pub mod error;
mod ops;
pub mod runtime;
pub mod transpile;

pub use error::BoundaryError;
pub use runtime::{render, RenderLimits};
pub use transpile::transpile;
