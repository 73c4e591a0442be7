//! HTTP surface through the full middleware stack.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{
    body_json, body_text, cookie_pair, get, harness, post_json, send, CountingGenerator,
    StaticFetcher, EVIL_SOURCE, GOOD_SOURCE,
};
use serde_json::json;

const ENDPOINT: &str = "https://api.example.com/users";

#[tokio::test]
async fn health_reports_version() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(GOOD_SOURCE));
    let response = get(h.app(), "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn generate_mints_a_session_cookie_once() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(GOOD_SOURCE));

    let first = post_json(h.app(), "/api/generate", json!({"apiEndpoint": ENDPOINT}), None).await;
    assert_eq!(first.status(), StatusCode::OK);
    let cookie = cookie_pair(&first).expect("session cookie issued");
    assert!(cookie.starts_with("glimpse_session="));
    let body = body_json(first).await;
    assert_eq!(body["artifact"]["origin"], "fresh");
    assert_eq!(body["cache"], "miss");
    assert_eq!(body["degraded"], false);

    let second = post_json(
        h.app(),
        "/api/generate",
        json!({"apiEndpoint": ENDPOINT}),
        Some(&cookie),
    )
    .await;
    assert!(cookie_pair(&second).is_none(), "known session is not re-issued");
    let body2 = body_json(second).await;
    assert_eq!(body2["artifact"]["origin"], "cache_hit");
    assert_eq!(body2["sessionId"], body["sessionId"]);
    assert_eq!(h.generator.calls(), 1);
}

#[tokio::test]
async fn forged_cookie_gets_a_new_session() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(GOOD_SOURCE));
    let response = post_json(
        h.app(),
        "/api/generate",
        json!({"apiEndpoint": ENDPOINT}),
        Some("glimpse_session=abc.0000"),
    )
    .await;
    assert!(cookie_pair(&response).is_some());
    let body = body_json(response).await;
    assert_ne!(body["sessionId"], "abc");
}

#[tokio::test]
async fn invalid_endpoint_is_400() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(GOOD_SOURCE));
    let response = post_json(
        h.app(),
        "/api/generate",
        json!({"apiEndpoint": "javascript:alert(1)"}),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "INVALID_ENDPOINT");
}

#[tokio::test]
async fn zero_ttl_is_rejected() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(GOOD_SOURCE));
    let response = post_json(
        h.app(),
        "/api/generate",
        json!({"apiEndpoint": ENDPOINT, "ttlSecs": 0}),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn degraded_generation_is_still_200() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(EVIL_SOURCE));
    let response = post_json(h.app(), "/api/generate", json!({"apiEndpoint": ENDPOINT}), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["degraded"], true);
    assert_eq!(body["errorCode"], "VALIDATION_FAILURE");
    assert!(!body["violations"].as_array().unwrap().is_empty());
    assert_eq!(body["artifact"]["origin"], "fallback");
    assert_eq!(body["artifact"]["succeeded"], false);
}

#[tokio::test]
async fn regenerate_bypasses_the_cache() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(GOOD_SOURCE));
    post_json(h.app(), "/api/generate", json!({"apiEndpoint": ENDPOINT}), None).await;

    let response = post_json(
        h.app(),
        "/api/regenerate",
        json!({"apiEndpoint": ENDPOINT, "instructions": "make it a table"}),
        None,
    )
    .await;
    let body = body_json(response).await;
    assert_eq!(body["cache"], "bypassed");
    assert_eq!(body["stored"], false);
    assert_eq!(h.generator.calls(), 2);
    assert_eq!(
        h.generator.last_instructions.lock().unwrap().as_deref(),
        Some("make it a table")
    );
}

#[tokio::test]
async fn render_runs_validated_code() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(GOOD_SOURCE));
    let response = post_json(
        h.app(),
        "/api/render",
        json!({"code": GOOD_SOURCE, "data": [{"id": 1, "name": "Ada"}]}),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["outcome"]["state"], "rendered_ok");
    assert_eq!(report["outcome"]["output"]["echo"][0]["name"], "Ada");
    assert_eq!(report["ready_confirmed"], true);
}

#[tokio::test]
async fn render_with_a_session_goes_through_its_slot() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(GOOD_SOURCE));
    let minted = post_json(h.app(), "/api/generate", json!({"apiEndpoint": ENDPOINT}), None).await;
    let cookie = cookie_pair(&minted).unwrap();

    let response = post_json(
        h.app(),
        "/api/render",
        json!({"code": GOOD_SOURCE, "data": {"n": 7}}),
        Some(&cookie),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["outcome"]["output"]["echo"]["n"], 7);
    assert_eq!(h.state.renders.in_flight(), 0);
}

#[tokio::test]
async fn render_rejects_invalid_code() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(GOOD_SOURCE));
    let response = post_json(
        h.app(),
        "/api/render",
        json!({"code": EVIL_SOURCE, "data": {}}),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["code"], "VALIDATION_FAILURE");
    assert!(body["violations"]
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v.as_str().unwrap().starts_with("cookie-access")));
}

#[tokio::test]
async fn stats_and_session_clear() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(GOOD_SOURCE));
    let first = post_json(
        h.app(),
        "/api/generate",
        json!({"apiEndpoint": ENDPOINT, "scope": "session"}),
        None,
    )
    .await;
    let cookie = cookie_pair(&first).unwrap();

    let stats = body_json(get(h.app(), "/api/stats").await).await;
    assert_eq!(stats["cache"]["entryCount"], 1);
    assert_eq!(stats["sessions"]["sessionCount"], 1);
    assert_eq!(stats["sessions"]["bindingCount"], 1);

    let request = Request::delete("/api/session")
        .header("cookie", &cookie)
        .body(Body::empty())
        .unwrap();
    let cleared = send(h.app(), request).await;
    assert_eq!(cleared.status(), StatusCode::OK);
    let set_cookie = cleared
        .headers()
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(set_cookie.contains("Max-Age=0"));
    let body = body_json(cleared).await;
    assert_eq!(body["cleared"], true);
    assert_eq!(body["evictedEntries"], 1);

    let stats = body_json(get(h.app(), "/api/stats").await).await;
    assert_eq!(stats["cache"]["entryCount"], 0);
    assert_eq!(stats["sessions"]["sessionCount"], 0);
}

#[tokio::test]
async fn metrics_are_exposed() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(GOOD_SOURCE));
    post_json(h.app(), "/api/generate", json!({"apiEndpoint": ENDPOINT}), None).await;
    post_json(h.app(), "/api/generate", json!({"apiEndpoint": ENDPOINT}), None).await;

    let response = get(h.app(), "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;
    assert!(text.contains("glimpse_cache_lookups_total{result=\"hit\"} 1"), "{text}");
    assert!(text.contains("glimpse_cache_lookups_total{result=\"miss\"} 1"), "{text}");
    assert!(text.contains("glimpse_artifacts_total{origin=\"cache_hit\"} 1"), "{text}");
}

#[tokio::test]
async fn unknown_route_is_404() {
    let h = harness(StaticFetcher::ok(), CountingGenerator::new(GOOD_SOURCE));
    assert_eq!(get(h.app(), "/nope").await.status(), StatusCode::NOT_FOUND);
}
