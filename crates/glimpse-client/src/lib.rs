#![warn(missing_docs)]

//! # glimpse-client
//!
//! Outbound calls made by the pipeline: the sample-data fetch and the
//! code-generation model.
//!
//! [`HttpDataFetcher`] performs the GET against the caller's endpoint.
//! [`CodeGenerator`] is the seam to the model; [`AnthropicGenerator`] is the
//! HTTP implementation and [`CircuitBreakerGenerator`] wraps any generator to
//! stop hammering a failing upstream. [`GeneratorClient`] bounds the call with
//! a timeout, validates what comes back, and substitutes the fallback
//! artifact on any failure.

pub mod anthropic;
pub mod circuit_breaker;
pub mod client;
pub mod fetch;
pub mod generator;
pub mod prompt;

pub use anthropic::{AnthropicConfig, AnthropicGenerator};
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerGenerator};
pub use client::{Generation, GeneratorClient};
pub use fetch::{DataFetcher, FetchConfig, FetchedData, HttpDataFetcher};
pub use generator::{CodeGenerator, GenerationRequest};
