//! HTTP handlers.

use std::time::Duration;

use axum::extract::State;
use axum::http::header::{CONTENT_TYPE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use glimpse_sandbox::RenderReport;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::orchestrator::{CacheScope, PipelineRequest, PipelineResponse};
use crate::state::AppState;

/// Every route, before middleware and state.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/generate", post(generate))
        .route("/api/regenerate", post(regenerate))
        .route("/api/render", post(render))
        .route("/api/stats", get(stats))
        .route("/api/session", delete(clear_session))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics(State(state): State<AppState>) -> AppResult<Response> {
    let body = state
        .metrics()
        .encode()
        .map_err(|e| AppError::Internal(format!("metrics encoding failed: {e}")))?;
    Ok((
        [(
            CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        body,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody {
    api_endpoint: String,
    cache_key: Option<String>,
    #[serde(default = "default_true")]
    use_cache: bool,
    #[serde(default)]
    scope: CacheScope,
    ttl_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegenerateBody {
    api_endpoint: String,
    cache_key: Option<String>,
    instructions: String,
}

#[derive(Debug, Deserialize)]
struct RenderBody {
    code: String,
    #[serde(default)]
    data: Value,
}

async fn generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<GenerateBody>,
) -> AppResult<Response> {
    if body.ttl_secs == Some(0) {
        return Err(AppError::BadRequest("ttlSecs must be positive".into()));
    }
    let request = PipelineRequest {
        endpoint: body.api_endpoint,
        cache_key: body.cache_key,
        use_cache: body.use_cache,
        scope: body.scope,
        ttl: body.ttl_secs.map(Duration::from_secs),
        instructions: None,
    };
    run_pipeline(&state, &headers, request).await
}

async fn regenerate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegenerateBody>,
) -> AppResult<Response> {
    let request = PipelineRequest {
        endpoint: body.api_endpoint,
        cache_key: body.cache_key,
        use_cache: false,
        scope: CacheScope::Shared,
        ttl: None,
        instructions: Some(body.instructions),
    };
    run_pipeline(&state, &headers, request).await
}

async fn run_pipeline(
    state: &AppState,
    headers: &HeaderMap,
    request: PipelineRequest,
) -> AppResult<Response> {
    let token = state.cookies.session_from(headers);
    let response = state.pipeline.run(token.as_deref(), request).await?;
    with_session_cookie(state, response)
}

fn with_session_cookie(state: &AppState, response: PipelineResponse) -> AppResult<Response> {
    let cookie = response
        .session_minted
        .then(|| state.cookies.issue(&response.session_id));
    let mut http = Json(response).into_response();
    if let Some(cookie) = cookie {
        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| AppError::Internal(format!("invalid cookie header: {e}")))?;
        http.headers_mut().insert(SET_COOKIE, value);
    }
    Ok(http)
}

async fn render(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RenderBody>,
) -> AppResult<Json<RenderReport>> {
    let validator = glimpse_sandbox::Validator::new(state.executor.config().max_code_size);
    let source = validator.gate(&body.code).map_err(|result| {
        state.metrics().record_validation_failure();
        AppError::Validation {
            violations: result.violations,
        }
    })?;

    let owner = state.cookies.session_from(&headers);
    let report = state
        .renders
        .render(owner.as_deref(), source, body.data)
        .await
        .ok_or(AppError::Superseded)?;
    state.metrics().record_render(&report.outcome);
    Ok(Json(report))
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    let cache = state.pipeline.cache().stats().await;
    let sessions = state.pipeline.sessions().stats();
    Json(json!({
        "cache": cache,
        "sessions": sessions,
    }))
}

async fn clear_session(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    let (cleared, evicted) = match state.cookies.session_from(&headers) {
        Some(id) => {
            let cleared = state.pipeline.sessions().clear(&id);
            state.renders.forget(&id);
            let evicted = state.pipeline.cache().evict_session(&id).await;
            tracing::info!(session_id = %id, evicted, "session cleared");
            (cleared, evicted)
        }
        None => (false, 0),
    };

    let mut response = (
        StatusCode::OK,
        Json(json!({ "cleared": cleared, "evictedEntries": evicted })),
    )
        .into_response();
    let expire = HeaderValue::from_str(&state.cookies.expire())
        .map_err(|e| AppError::Internal(format!("invalid cookie header: {e}")))?;
    response.headers_mut().insert(SET_COOKIE, expire);
    Ok(response)
}
