//! Orchestrator behaviour with stubbed fetch and generation.

mod common;

use std::time::Duration;

use common::{harness, harness_with, CountingGenerator, StaticFetcher, EVIL_SOURCE, GOOD_SOURCE};
use glimpse_sandbox::{validator, ArtifactOrigin};
use glimpse_server::{CacheOutcome, CacheScope, PipelineConfig, PipelineRequest};
use glimpse_store::CompositeKey;

const ENDPOINT: &str = "https://api.example.com/users";

#[tokio::test]
async fn miss_generates_once_then_hits() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(GOOD_SOURCE));

    let first = h.pipeline.run(None, PipelineRequest::new(ENDPOINT)).await.unwrap();
    assert_eq!(first.cache, CacheOutcome::Miss);
    assert_eq!(first.artifact.origin(), ArtifactOrigin::Fresh);
    assert!(first.stored);
    assert!(!first.degraded);
    assert_eq!(h.generator.calls(), 1);

    let second = h.pipeline.run(None, PipelineRequest::new(ENDPOINT)).await.unwrap();
    assert_eq!(second.cache, CacheOutcome::Hit);
    assert_eq!(second.artifact.origin(), ArtifactOrigin::CacheHit);
    assert_eq!(second.artifact.source_text(), first.artifact.source_text());
    assert_eq!(h.generator.calls(), 1, "a hit must not generate");
    assert_eq!(h.fetcher.calls(), 1, "a hit must not fetch");

    let key = CompositeKey::shared(normalized(), "default");
    let entry = h.pipeline.cache().lookup(&key).await.unwrap();
    assert_eq!(entry.access_count, 2);
}

/// Endpoints are keyed in normalized URL form.
fn normalized() -> String {
    glimpse_client::fetch::parse_endpoint(ENDPOINT).unwrap().to_string()
}

#[tokio::test]
async fn stored_artifact_is_sanitized() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(GOOD_SOURCE));
    let response = h.pipeline.run(None, PipelineRequest::new(ENDPOINT)).await.unwrap();
    let source = response.artifact.source_text();
    assert!(source.starts_with("function GeneratedComponent"));
    assert!(!source.contains("```"));
    assert!(!source.contains("import React"));
    assert_eq!(response.data.unwrap()[0]["name"], "Ada");
}

#[tokio::test]
async fn denylisted_generation_degrades_to_fallback() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(EVIL_SOURCE));
    let response = h.pipeline.run(None, PipelineRequest::new(ENDPOINT)).await.unwrap();

    assert!(response.degraded);
    assert_eq!(response.artifact.origin(), ArtifactOrigin::Fallback);
    assert_eq!(response.error_code, Some("VALIDATION_FAILURE"));
    assert!(response.violations.iter().any(|v| v.starts_with("cookie-access")));
    assert!(response.violations.iter().any(|v| v.starts_with("network-access")));
    assert!(validator::validate(response.artifact.source_text()).is_valid);
    assert!(!response.stored, "fallbacks are never cached");
    assert_eq!(h.pipeline.cache().stats().await.entry_count, 0);
}

#[tokio::test]
async fn fetch_failure_skips_generation() {
    let h = harness(StaticFetcher::failing(503), CountingGenerator::new(GOOD_SOURCE));
    let response = h.pipeline.run(None, PipelineRequest::new(ENDPOINT)).await.unwrap();

    assert!(response.degraded);
    assert_eq!(response.error_code, Some("FETCH_HTTP_ERROR"));
    assert!(response.error.unwrap().contains("503"));
    assert_eq!(response.artifact.origin(), ArtifactOrigin::Fallback);
    assert!(response.data.is_none());
    assert_eq!(h.generator.calls(), 0);
}

#[tokio::test]
async fn invalid_endpoint_is_an_error() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(GOOD_SOURCE));
    let err = h
        .pipeline
        .run(None, PipelineRequest::new("ftp://files.example.com"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_ENDPOINT");
    assert_eq!(h.fetcher.calls(), 0);
}

#[tokio::test]
async fn opt_out_never_touches_the_cache() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(GOOD_SOURCE));
    let mut request = PipelineRequest::new(ENDPOINT);
    request.use_cache = false;

    let a = h.pipeline.run(None, request.clone()).await.unwrap();
    let b = h.pipeline.run(None, request).await.unwrap();
    assert_eq!(a.cache, CacheOutcome::Bypassed);
    assert_eq!(b.cache, CacheOutcome::Bypassed);
    assert!(!a.stored);
    assert_eq!(h.generator.calls(), 2);
    assert_eq!(h.pipeline.cache().stats().await.entry_count, 0);
}

#[tokio::test]
async fn disabled_cache_overrides_the_request() {
    let config = PipelineConfig {
        cache_enabled: false,
        ..PipelineConfig::default()
    };
    let h = harness_with(StaticFetcher::ok(), CountingGenerator::new(GOOD_SOURCE), config);
    h.pipeline.run(None, PipelineRequest::new(ENDPOINT)).await.unwrap();
    h.pipeline.run(None, PipelineRequest::new(ENDPOINT)).await.unwrap();
    assert_eq!(h.generator.calls(), 2);
}

#[tokio::test]
async fn ttl_expiry_forces_regeneration() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(GOOD_SOURCE));
    let mut request = PipelineRequest::new(ENDPOINT);
    request.ttl = Some(Duration::from_secs(60));

    h.pipeline.run(None, request.clone()).await.unwrap();
    h.clock.advance(Duration::from_secs(61));
    let again = h.pipeline.run(None, request).await.unwrap();

    assert_eq!(again.cache, CacheOutcome::Miss);
    assert_eq!(h.generator.calls(), 2);
    assert_eq!(h.pipeline.cache().stats().await.entry_count, 1);
}

#[tokio::test]
async fn session_scope_is_private() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(GOOD_SOURCE));
    let mut request = PipelineRequest::new(ENDPOINT);
    request.scope = CacheScope::Session;

    let alice = h.pipeline.run(None, request.clone()).await.unwrap();
    assert!(alice.session_minted);
    let alice_again = h
        .pipeline
        .run(Some(&alice.session_id), request.clone())
        .await
        .unwrap();
    assert_eq!(alice_again.session_id, alice.session_id);
    assert!(!alice_again.session_minted);
    assert_eq!(alice_again.cache, CacheOutcome::Hit);

    let bob = h.pipeline.run(None, request).await.unwrap();
    assert_ne!(bob.session_id, alice.session_id);
    assert_eq!(bob.cache, CacheOutcome::Miss);
    assert_eq!(h.generator.calls(), 2);
}

#[tokio::test]
async fn cache_keys_partition_entries() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(GOOD_SOURCE));
    let mut a = PipelineRequest::new(ENDPOINT);
    a.cache_key = Some("table".into());
    let mut b = PipelineRequest::new(ENDPOINT);
    b.cache_key = Some("cards".into());

    h.pipeline.run(None, a.clone()).await.unwrap();
    h.pipeline.run(None, b).await.unwrap();
    let hit = h.pipeline.run(None, a).await.unwrap();

    assert_eq!(hit.cache_key, "table");
    assert_eq!(hit.cache, CacheOutcome::Hit);
    assert_eq!(h.generator.calls(), 2);
}

#[tokio::test]
async fn sessions_record_endpoint_bindings() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(GOOD_SOURCE));
    let mut request = PipelineRequest::new(ENDPOINT);
    request.cache_key = Some("table".into());
    let response = h.pipeline.run(None, request).await.unwrap();

    assert_eq!(
        h.pipeline.sessions().binding(&response.session_id, &normalized()).as_deref(),
        Some("table")
    );
}

#[tokio::test]
async fn instructions_reach_the_generator() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(GOOD_SOURCE));
    let mut request = PipelineRequest::new(ENDPOINT);
    request.use_cache = false;
    request.instructions = Some("use a table".into());
    h.pipeline.run(None, request).await.unwrap();
    assert_eq!(
        h.generator.last_instructions.lock().unwrap().as_deref(),
        Some("use a table")
    );
}
