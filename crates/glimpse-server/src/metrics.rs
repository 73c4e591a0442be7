//! Prometheus metrics for the pipeline and the sandbox.

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

use glimpse_sandbox::{ArtifactOrigin, HostState};

/// Cache lookup labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct LookupLabels {
    /// "hit" or "miss".
    pub result: String,
}

/// Generation labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OriginLabels {
    /// "fresh", "fallback" or "cache_hit".
    pub origin: String,
}

/// Render labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RenderLabels {
    /// Terminal host state, or the failure kind.
    pub outcome: String,
}

/// All metrics exported at `/metrics`.
pub struct GlimpseMetrics {
    registry: Registry,
    /// Cache lookups by result.
    pub cache_lookups_total: Family<LookupLabels, Counter>,
    /// Pipeline responses by artifact origin.
    pub artifacts_total: Family<OriginLabels, Counter>,
    /// Generations rejected by the validator.
    pub validation_failures_total: Counter,
    /// Sandbox renders by outcome.
    pub renders_total: Family<RenderLabels, Counter>,
    /// End-to-end pipeline latency in seconds.
    pub pipeline_duration_seconds: Histogram,
}

impl GlimpseMetrics {
    /// Build and register every metric in a fresh registry.
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("glimpse");

        let cache_lookups_total = Family::<LookupLabels, Counter>::default();
        registry.register(
            "cache_lookups",
            "Cache lookups by result",
            cache_lookups_total.clone(),
        );

        let artifacts_total = Family::<OriginLabels, Counter>::default();
        registry.register(
            "artifacts",
            "Artifacts returned by origin",
            artifacts_total.clone(),
        );

        let validation_failures_total = Counter::default();
        registry.register(
            "validation_failures",
            "Generated sources rejected by the validator",
            validation_failures_total.clone(),
        );

        let renders_total = Family::<RenderLabels, Counter>::default();
        registry.register(
            "renders",
            "Sandbox renders by outcome",
            renders_total.clone(),
        );

        let pipeline_duration_seconds =
            Histogram::new([0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0].into_iter());
        registry.register(
            "pipeline_duration_seconds",
            "End-to-end pipeline duration",
            pipeline_duration_seconds.clone(),
        );

        Self {
            registry,
            cache_lookups_total,
            artifacts_total,
            validation_failures_total,
            renders_total,
            pipeline_duration_seconds,
        }
    }

    /// Count a cache lookup.
    pub fn record_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups_total
            .get_or_create(&LookupLabels {
                result: result.into(),
            })
            .inc();
    }

    /// Count a pipeline response.
    pub fn record_artifact(&self, origin: ArtifactOrigin, duration_secs: f64) {
        let origin = match origin {
            ArtifactOrigin::Fresh => "fresh",
            ArtifactOrigin::Fallback => "fallback",
            ArtifactOrigin::CacheHit => "cache_hit",
        };
        self.artifacts_total
            .get_or_create(&OriginLabels {
                origin: origin.into(),
            })
            .inc();
        self.pipeline_duration_seconds.observe(duration_secs);
    }

    /// Count a validator rejection.
    pub fn record_validation_failure(&self) {
        self.validation_failures_total.inc();
    }

    /// Count a render by terminal state.
    pub fn record_render(&self, outcome: &HostState) {
        let outcome = match outcome {
            HostState::RenderedOk { .. } => "ok".to_string(),
            HostState::RenderedError { failure } => failure.kind().to_string(),
            _ => "incomplete".to_string(),
        };
        self.renders_total
            .get_or_create(&RenderLabels { outcome })
            .inc();
    }

    /// Text exposition of every metric.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut out = String::new();
        encode(&mut out, &self.registry)?;
        Ok(out)
    }
}

impl Default for GlimpseMetrics {
    fn default() -> Self {
        Self::new()
    }
}
