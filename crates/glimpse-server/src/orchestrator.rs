//! The generation pipeline.
//!
//! resolve session → derive key → cache lookup → fetch → generate →
//! validate → store. Stages run strictly in order. Only an unusable
//! endpoint escapes as an error. Every later failure folds into a fallback
//! artifact with `degraded` set and a readable `error`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use glimpse_client::fetch::parse_endpoint;
use glimpse_client::{DataFetcher, GenerationRequest, GeneratorClient};
use glimpse_error::PipelineError;
use glimpse_sandbox::GenerationArtifact;
use glimpse_store::{CacheStore, CompositeKey, SessionRegistry};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metrics::GlimpseMetrics;

/// Cache key used when the caller does not name one.
pub const DEFAULT_CACHE_KEY: &str = "default";

/// Pipeline-wide settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Master switch; when false no request reads or writes the cache.
    pub cache_enabled: bool,
    /// TTL applied when a request does not give one. `None` keeps entries
    /// until evicted.
    pub default_ttl: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            default_ttl: Some(Duration::from_secs(24 * 3600)),
        }
    }
}

/// Which cache scope a request reads and writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheScope {
    /// One entry per (endpoint, key), shared by every visitor.
    #[default]
    Shared,
    /// One entry per (endpoint, key, session).
    Session,
}

/// One pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    /// Data-API endpoint.
    pub endpoint: String,
    /// Logical cache key; [`DEFAULT_CACHE_KEY`] when absent.
    pub cache_key: Option<String>,
    /// Opt in to caching for this request.
    pub use_cache: bool,
    /// Cache scope.
    pub scope: CacheScope,
    /// TTL for a write; falls back to the configured default.
    pub ttl: Option<Duration>,
    /// Regeneration guidance passed to the model.
    pub instructions: Option<String>,
}

impl PipelineRequest {
    /// A cached, shared-scope request for `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            cache_key: None,
            use_cache: true,
            scope: CacheScope::Shared,
            ttl: None,
            instructions: None,
        }
    }
}

/// How the cache took part in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    /// Served from the cache.
    Hit,
    /// Looked up, not found, generated.
    Miss,
    /// The request or the service had caching off.
    Bypassed,
}

/// What the pipeline hands back.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResponse {
    /// The resolved session.
    pub session_id: String,
    /// True when the session was minted for this request.
    #[serde(skip)]
    pub session_minted: bool,
    /// Logical cache key in effect.
    pub cache_key: String,
    /// Renderable artifact.
    pub artifact: GenerationArtifact,
    /// Sample data fetched on a miss.
    pub data: Option<Value>,
    /// True when a fallback replaced the generation.
    pub degraded: bool,
    /// Human-readable reason for degradation.
    pub error: Option<String>,
    /// Stable code for `error`.
    pub error_code: Option<&'static str>,
    /// Validation violations behind a fallback.
    pub violations: Vec<String>,
    /// Cache participation.
    pub cache: CacheOutcome,
    /// True when the artifact was written to the cache.
    pub stored: bool,
}

/// The orchestrator.
pub struct Pipeline {
    sessions: Arc<SessionRegistry>,
    cache: Arc<CacheStore>,
    fetcher: Arc<dyn DataFetcher>,
    generator: GeneratorClient,
    metrics: Arc<GlimpseMetrics>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Wire the pipeline from its services.
    pub fn new(
        sessions: Arc<SessionRegistry>,
        cache: Arc<CacheStore>,
        fetcher: Arc<dyn DataFetcher>,
        generator: GeneratorClient,
        metrics: Arc<GlimpseMetrics>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            sessions,
            cache,
            fetcher,
            generator,
            metrics,
            config,
        }
    }

    /// Session registry.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Cache store.
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Metrics sink.
    pub fn metrics(&self) -> &Arc<GlimpseMetrics> {
        &self.metrics
    }

    /// Run one request. `token` is the verified session id the visitor
    /// presented, if any.
    #[tracing::instrument(skip(self, token, request), fields(endpoint = %request.endpoint))]
    pub async fn run(
        &self,
        token: Option<&str>,
        request: PipelineRequest,
    ) -> Result<PipelineResponse, PipelineError> {
        let started = Instant::now();
        let endpoint = parse_endpoint(&request.endpoint)?.to_string();

        let resolved = self.sessions.resolve(token);
        let cache_key = request
            .cache_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CACHE_KEY.to_string());
        self.sessions
            .bind(&resolved.session_id, &endpoint, &cache_key);

        let key = match request.scope {
            CacheScope::Shared => CompositeKey::shared(&endpoint, &cache_key),
            CacheScope::Session => CompositeKey::scoped(&endpoint, &cache_key, &resolved.session_id),
        };
        let caching = self.config.cache_enabled && request.use_cache;

        let session_id = resolved.session_id;
        let respond = |artifact: GenerationArtifact, cache: CacheOutcome| PipelineResponse {
            session_id: session_id.clone(),
            session_minted: resolved.minted,
            cache_key: cache_key.clone(),
            artifact,
            data: None,
            degraded: false,
            error: None,
            error_code: None,
            violations: Vec::new(),
            cache,
            stored: false,
        };

        let mut cache_outcome = CacheOutcome::Bypassed;
        if caching {
            let hit = self.cache.lookup(&key).await;
            self.metrics.record_lookup(hit.is_some());
            if let Some(entry) = hit {
                tracing::info!(access_count = entry.access_count, "serving cached artifact");
                let response = respond(entry.artifact.as_cache_hit(), CacheOutcome::Hit);
                return Ok(self.finish(response, started));
            }
            cache_outcome = CacheOutcome::Miss;
        }

        let sample = match self.fetcher.fetch(&endpoint).await {
            Ok(fetched) => fetched.json,
            Err(e) => {
                tracing::warn!(code = e.code(), error = %e, "sample fetch failed, using fallback");
                let mut response = respond(GenerationArtifact::fallback(e.to_string()), cache_outcome);
                degrade(&mut response, &e);
                return Ok(self.finish(response, started));
            }
        };

        let mut generation_request = GenerationRequest::new(&endpoint, sample.clone());
        generation_request.instructions = request.instructions.clone();
        let generation = self.generator.generate(&generation_request).await;

        let mut response = respond(generation.artifact.clone(), cache_outcome);
        response.data = Some(sample);
        if let Some(e) = &generation.error {
            if matches!(e, PipelineError::ValidationFailure { .. }) {
                self.metrics.record_validation_failure();
            }
            degrade(&mut response, e);
            response.violations = generation.violations().to_vec();
        } else if caching {
            let ttl = request.ttl.or(self.config.default_ttl);
            response.stored = self
                .cache
                .store(key, generation.artifact, ttl)
                .await;
        }

        Ok(self.finish(response, started))
    }

    fn finish(&self, response: PipelineResponse, started: Instant) -> PipelineResponse {
        let elapsed = started.elapsed();
        self.metrics
            .record_artifact(response.artifact.origin(), elapsed.as_secs_f64());
        tracing::info!(
            origin = ?response.artifact.origin(),
            cache = ?response.cache,
            degraded = response.degraded,
            stored = response.stored,
            duration_ms = elapsed.as_millis() as u64,
            "pipeline finished"
        );
        response
    }
}

fn degrade(response: &mut PipelineResponse, error: &PipelineError) {
    response.degraded = true;
    response.error = Some(error.to_string());
    response.error_code = Some(error.code());
}
