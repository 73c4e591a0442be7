#![warn(missing_docs)]

//! Glimpse: generated UI components for any data API, rendered in a sandbox.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use glimpse_client::{
    AnthropicConfig, AnthropicGenerator, CircuitBreakerConfig, CircuitBreakerGenerator,
    CodeGenerator, FetchConfig, GeneratorClient, HttpDataFetcher,
};
use glimpse_config::GlimpseConfig;
use glimpse_sandbox::audit::{AuditLogger, JsonLinesAuditLogger, TracingAuditLogger};
use glimpse_sandbox::boundary::{Boundary, BoundaryFactory};
use glimpse_sandbox::host::{ProcessBoundaryFactory, WorkerCommand};
use glimpse_sandbox::protocol::DEFAULT_MAX_MESSAGE_SIZE;
use glimpse_sandbox::{BoundaryId, SandboxConfig, SandboxError, SandboxExecutor, Validator};
use glimpse_server::{
    build_router, AppState, CookieSettings, GlimpseMetrics, Pipeline, PipelineConfig,
    SessionCookies,
};
use glimpse_store::{spawn_sweeper, CacheStore, SessionConfig, SessionRegistry, SweepConfig};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const DEFAULT_BIND: &str = "127.0.0.1:8080";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_COOKIE_NAME: &str = "glimpse_session";
const DEFAULT_GENERATOR_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_CACHE_SWEEP: Duration = Duration::from_secs(60);
const BOUNDARY_BIN: &str = "glimpse-boundary";

fn build_sandbox_config(overrides: &glimpse_config::SandboxOverrides) -> SandboxConfig {
    let mut config = SandboxConfig::default();
    if let Some(ms) = overrides.ready_timeout_ms {
        config.ready_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = overrides.render_timeout_ms {
        config.render_timeout = Duration::from_millis(ms);
    }
    if let Some(concurrent) = overrides.max_concurrent {
        config.max_concurrent = concurrent;
    }
    if let Some(kb) = overrides.max_code_kb {
        config.max_code_size = kb * 1024;
    }
    config
}

fn build_session_config(overrides: &glimpse_config::SessionOverrides) -> SessionConfig {
    let mut config = SessionConfig::default();
    if let Some(secs) = overrides.ttl_secs {
        config.ttl = Duration::from_secs(secs);
    }
    if let Some(secs) = overrides.sweep_interval_secs {
        config.sweep_interval = Duration::from_secs(secs);
    }
    config
}

fn build_pipeline_config(overrides: &glimpse_config::CacheOverrides) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    if let Some(enabled) = overrides.enabled {
        config.cache_enabled = enabled;
    }
    if let Some(secs) = overrides.ttl_secs {
        config.default_ttl = Some(Duration::from_secs(secs));
    }
    config
}

fn build_fetch_config(overrides: &glimpse_config::FetchOverrides) -> FetchConfig {
    let mut config = FetchConfig::default();
    if let Some(secs) = overrides.timeout_secs {
        config.timeout = Duration::from_secs(secs);
    }
    if let Some(kb) = overrides.max_body_kb {
        config.max_body_bytes = kb * 1024;
    }
    config
}

fn build_generator_config(overrides: &glimpse_config::GeneratorOverrides) -> AnthropicConfig {
    AnthropicConfig {
        base_url: overrides
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_GENERATOR_URL.to_string()),
        model: overrides
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        api_key: overrides.api_key.clone().unwrap_or_default(),
        max_tokens: overrides.max_tokens.unwrap_or(4096),
        request_timeout: generator_timeout(overrides) + Duration::from_secs(5),
    }
}

fn generator_timeout(overrides: &glimpse_config::GeneratorOverrides) -> Duration {
    Duration::from_secs(overrides.timeout_secs.unwrap_or(60))
}

fn build_breaker_config(overrides: &glimpse_config::GeneratorOverrides) -> CircuitBreakerConfig {
    let mut config = CircuitBreakerConfig::default();
    if let Some(threshold) = overrides.failure_threshold {
        config.failure_threshold = threshold;
    }
    if let Some(secs) = overrides.recovery_timeout_secs {
        config.recovery_timeout = Duration::from_secs(secs);
    }
    config
}

fn build_cookie_settings(
    overrides: &glimpse_config::SessionOverrides,
    session: &SessionConfig,
) -> CookieSettings {
    let secret = match &overrides.cookie_secret {
        Some(secret) => secret.as_bytes().to_vec(),
        None => {
            tracing::warn!("no session.cookie_secret configured, using an ephemeral secret");
            let mut secret = [0u8; 32];
            rand::rng().fill(&mut secret);
            secret.to_vec()
        }
    };
    CookieSettings {
        name: overrides
            .cookie_name
            .clone()
            .unwrap_or_else(|| DEFAULT_COOKIE_NAME.to_string()),
        secret,
        max_age: overrides
            .cookie_max_age_secs
            .map(Duration::from_secs)
            .unwrap_or(session.ttl),
        secure: overrides.secure_cookie.unwrap_or(false),
    }
}

/// Stands in when no worker is configured. Every render ends in a load failure.
struct NoWorkerFactory;

#[async_trait::async_trait]
impl BoundaryFactory for NoWorkerFactory {
    async fn instantiate(&self, _id: BoundaryId) -> Result<Box<dyn Boundary>, SandboxError> {
        Err(SandboxError::Spawn {
            worker: "<none>".into(),
            message: "no sandbox.worker_command configured".into(),
        })
    }
}

/// The boundary worker installed next to this binary, if any.
fn sibling_worker() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let candidate = exe
        .parent()?
        .join(format!("{BOUNDARY_BIN}{}", std::env::consts::EXE_SUFFIX));
    candidate.is_file().then_some(candidate)
}

fn build_boundary_factory(
    overrides: &glimpse_config::SandboxOverrides,
    default_worker: Option<PathBuf>,
) -> Result<Arc<dyn BoundaryFactory>> {
    let program = match (&overrides.worker_command, default_worker) {
        (Some(program), _) => PathBuf::from(program),
        (None, Some(found)) => {
            tracing::info!(worker = %found.display(), "using bundled boundary worker");
            found
        }
        (None, None) => {
            tracing::warn!(
                "no sandbox.worker_command configured and no {BOUNDARY_BIN} found, /api/render will fail every render"
            );
            return Ok(Arc::new(NoWorkerFactory));
        }
    };
    let command = WorkerCommand {
        program: program.clone(),
        args: overrides.worker_args.clone(),
        max_message_size: overrides
            .max_message_kb
            .map(|kb| kb * 1024)
            .unwrap_or(DEFAULT_MAX_MESSAGE_SIZE),
    };
    let factory = ProcessBoundaryFactory::new(command)
        .with_context(|| format!("invalid sandbox worker '{}'", program.display()))?;
    Ok(Arc::new(factory))
}

async fn build_audit_logger(
    overrides: &glimpse_config::SandboxOverrides,
) -> Result<Arc<dyn AuditLogger>> {
    let Some(path) = &overrides.audit_log else {
        return Ok(Arc::new(TracingAuditLogger));
    };
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("failed to open audit log {path}"))?;
    tracing::info!(path = %path, "writing render audit to file");
    Ok(Arc::new(JsonLinesAuditLogger::new(file)))
}

/// Locate the config file.
///
/// Search order:
/// 1. `GLIMPSE_CONFIG` environment variable
/// 2. `./glimpse.toml` in the current directory
/// 3. None (run on defaults)
fn find_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("GLIMPSE_CONFIG") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }

    let cwd = PathBuf::from("glimpse.toml");
    if cwd.exists() {
        return Some(cwd);
    }

    None
}

fn load_config() -> Result<GlimpseConfig> {
    match find_config_file() {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading config");
            GlimpseConfig::from_file_with_env(&path)
                .with_context(|| format!("failed to load config from {}", path.display()))
        }
        None => {
            tracing::info!("no config file found, using defaults");
            Ok(GlimpseConfig::from_toml("")?)
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate => {}
    }
    tracing::info!("received shutdown signal, stopping gracefully");
    cancel.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("glimpse {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config()?;

    let session_config = build_session_config(&config.session);
    let sessions = Arc::new(SessionRegistry::new(session_config.clone()));
    let cache = Arc::new(CacheStore::in_memory());
    let metrics = Arc::new(GlimpseMetrics::new());

    let sandbox_config = build_sandbox_config(&config.sandbox);
    let validator = Validator::new(sandbox_config.max_code_size);

    if config.generator.api_key.as_deref().map_or(true, str::is_empty) {
        tracing::warn!("no generator.api_key configured, every generation will fall back");
    }
    let generator: Arc<dyn CodeGenerator> =
        Arc::new(AnthropicGenerator::new(build_generator_config(&config.generator))?);
    let generator: Arc<dyn CodeGenerator> = Arc::new(CircuitBreakerGenerator::new(
        generator,
        build_breaker_config(&config.generator),
    ));
    let client = GeneratorClient::new(generator, validator, generator_timeout(&config.generator));

    let fetcher = Arc::new(HttpDataFetcher::new(build_fetch_config(&config.fetch)));
    let pipeline = Arc::new(Pipeline::new(
        sessions.clone(),
        cache.clone(),
        fetcher,
        client,
        metrics,
        build_pipeline_config(&config.cache),
    ));

    let executor = Arc::new(SandboxExecutor::with_audit_logger(
        sandbox_config,
        build_boundary_factory(&config.sandbox, sibling_worker())?,
        build_audit_logger(&config.sandbox).await?,
    ));

    let cookies = Arc::new(SessionCookies::new(build_cookie_settings(
        &config.session,
        &session_config,
    )));

    let state = AppState::new(pipeline, executor, cookies);
    let request_timeout = config
        .server
        .request_timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
    let app = build_router(state, request_timeout);

    let cancel = CancellationToken::new();
    let sweeper = spawn_sweeper(
        cache,
        sessions,
        SweepConfig {
            cache_interval: config
                .cache
                .sweep_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CACHE_SWEEP),
            session_interval: session_config.sweep_interval,
        },
        cancel.clone(),
    );

    let bind = config.server.bind.as_deref().unwrap_or(DEFAULT_BIND);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(addr = %listener.local_addr()?, "Glimpse listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .context("server error")?;

    cancel.cancel();
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "sweeper task ended abnormally");
    }
    tracing::info!("Glimpse stopped");
    Ok(())
}
