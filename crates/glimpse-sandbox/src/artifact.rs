//! The unit of value the pipeline produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fallback;
use crate::validator::ValidatedSource;

/// Name every generated component must declare.
pub const COMPONENT_NAME: &str = "GeneratedComponent";

/// Where an artifact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactOrigin {
    /// Generated and validated for this request.
    Fresh,
    /// Substituted after a fetch, generation or validation failure.
    Fallback,
    /// Served from the cache without generating.
    CacheHit,
}

/// Generated component source plus its provenance.
///
/// Immutable once built. A cache hit produces a new artifact through
/// [`GenerationArtifact::as_cache_hit`] rather than editing the stored one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationArtifact {
    source_text: String,
    component_name: String,
    succeeded: bool,
    failure_reason: Option<String>,
    origin: ArtifactOrigin,
    generated_at: DateTime<Utc>,
}

impl GenerationArtifact {
    /// Wrap source that has passed validation.
    pub fn fresh(source: ValidatedSource) -> Self {
        Self {
            source_text: source.into_string(),
            component_name: COMPONENT_NAME.to_string(),
            succeeded: true,
            failure_reason: None,
            origin: ArtifactOrigin::Fresh,
            generated_at: Utc::now(),
        }
    }

    /// The static known-good artifact, tagged with why it was needed.
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            source_text: fallback::FALLBACK_SOURCE.to_string(),
            component_name: COMPONENT_NAME.to_string(),
            succeeded: false,
            failure_reason: Some(reason.into()),
            origin: ArtifactOrigin::Fallback,
            generated_at: Utc::now(),
        }
    }

    /// A copy of this artifact marked as served from the cache.
    ///
    /// `generated_at` is preserved so callers can tell how old the
    /// generation is.
    pub fn as_cache_hit(&self) -> Self {
        Self {
            origin: ArtifactOrigin::CacheHit,
            ..self.clone()
        }
    }

    /// Component source text.
    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    /// Declared component name.
    pub fn component_name(&self) -> &str {
        &self.component_name
    }

    /// Whether generation produced this source (false for fallbacks).
    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    /// Why a fallback was substituted.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Provenance of this artifact.
    pub fn origin(&self) -> ArtifactOrigin {
        self.origin
    }

    /// When the underlying source was produced.
    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    /// Whether two artifacts would render the same component.
    pub fn validation_equal(&self, other: &Self) -> bool {
        self.source_text == other.source_text && self.component_name == other.component_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::Validator;

    #[test]
    fn fresh_artifact_carries_sanitized_source() {
        let validated = Validator::default()
            .gate("```jsx\nfunction GeneratedComponent({ data }) {\n  return <div>{data.name}</div>;\n}\n```")
            .unwrap();
        let artifact = GenerationArtifact::fresh(validated);
        assert!(artifact.succeeded());
        assert_eq!(artifact.origin(), ArtifactOrigin::Fresh);
        assert!(artifact.source_text().starts_with("function GeneratedComponent"));
        assert!(artifact.failure_reason().is_none());
    }

    #[test]
    fn fallback_artifact_has_source_and_reason() {
        let artifact = GenerationArtifact::fallback("generation timed out");
        assert!(!artifact.succeeded());
        assert_eq!(artifact.origin(), ArtifactOrigin::Fallback);
        assert_eq!(artifact.failure_reason(), Some("generation timed out"));
        assert!(!artifact.source_text().is_empty());
        assert_eq!(artifact.component_name(), COMPONENT_NAME);
    }

    #[test]
    fn cache_hit_copy_keeps_source_and_timestamp() {
        let original = GenerationArtifact::fallback("x");
        let hit = original.as_cache_hit();
        assert_eq!(hit.origin(), ArtifactOrigin::CacheHit);
        assert_eq!(hit.generated_at(), original.generated_at());
        assert!(hit.validation_equal(&original));
        assert_eq!(original.origin(), ArtifactOrigin::Fallback);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(GenerationArtifact::fallback("boom")).unwrap();
        assert_eq!(json["componentName"], COMPONENT_NAME);
        assert_eq!(json["origin"], "fallback");
        assert_eq!(json["failureReason"], "boom");
        assert!(json["generatedAt"].is_string());
    }
}
