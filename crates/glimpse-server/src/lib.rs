#![warn(missing_docs)]

//! # glimpse-server
//!
//! The pipeline orchestrator and its HTTP surface.
//!
//! [`Pipeline`] runs one generation request end to end. [`build_router`]
//! mounts it, the sandbox executor and the introspection endpoints behind
//! the shared middleware stack.

pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod routes;
pub mod state;
pub mod token;

use std::time::Duration;

use axum::http::StatusCode;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

pub use error::{AppError, AppResult};
pub use metrics::GlimpseMetrics;
pub use orchestrator::{
    CacheOutcome, CacheScope, Pipeline, PipelineConfig, PipelineRequest, PipelineResponse,
};
pub use state::{AppState, RenderSlots};
pub use token::{CookieSettings, SessionCookies};

/// Build the application router with its middleware stack.
///
/// Layers, outermost last: panic recovery, request timeout, request tracing.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    routes::routes()
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
