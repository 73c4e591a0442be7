#![warn(missing_docs)]

//! # glimpse-config
//!
//! Configuration loading for the Glimpse generation service.
//!
//! Supports TOML configuration files with environment variable expansion.
//! Every field is optional; the binary applies whatever is present on top of
//! the typed defaults of each component.
//!
//! ## Example
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8080"
//!
//! [session]
//! ttl_secs = 86400
//! cookie_secret = "${GLIMPSE_COOKIE_SECRET}"
//!
//! [cache]
//! enabled = true
//! ttl_secs = 3600
//!
//! [generator]
//! model = "claude-sonnet-4-5"
//! api_key = "${ANTHROPIC_API_KEY}"
//! timeout_secs = 60
//!
//! [sandbox]
//! worker_command = "/usr/local/bin/glimpse-render-worker"
//! ready_timeout_ms = 1500
//! render_timeout_ms = 5000
//! ```

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Minimum accepted length of the session cookie signing secret.
pub const MIN_COOKIE_SECRET_LEN: usize = 16;

/// Errors from config parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid configuration value.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level Glimpse configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GlimpseConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerOverrides,

    /// Session registry and cookie settings.
    #[serde(default)]
    pub session: SessionOverrides,

    /// Cache store settings.
    #[serde(default)]
    pub cache: CacheOverrides,

    /// Code generator settings.
    #[serde(default)]
    pub generator: GeneratorOverrides,

    /// Sample-data fetch settings.
    #[serde(default)]
    pub fetch: FetchOverrides,

    /// Sandbox execution settings.
    #[serde(default)]
    pub sandbox: SandboxOverrides,
}

/// HTTP listener overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerOverrides {
    /// Socket address to bind, e.g. `127.0.0.1:8080`.
    #[serde(default)]
    pub bind: Option<String>,

    /// Whole-request timeout in seconds.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

/// Session registry overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionOverrides {
    /// Idle time after which a session expires.
    #[serde(default)]
    pub ttl_secs: Option<u64>,

    /// Interval between passive sweeps.
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,

    /// Name of the session cookie.
    #[serde(default)]
    pub cookie_name: Option<String>,

    /// HMAC secret used to sign session tokens.
    #[serde(default)]
    pub cookie_secret: Option<String>,

    /// `Max-Age` attribute of the session cookie.
    #[serde(default)]
    pub cookie_max_age_secs: Option<u64>,

    /// Whether to add the `Secure` attribute to the cookie.
    #[serde(default)]
    pub secure_cookie: Option<bool>,
}

/// Cache store overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheOverrides {
    /// Whether requests use the cache when they do not say otherwise.
    #[serde(default)]
    pub enabled: Option<bool>,

    /// Default TTL for ordinary generations. Absent means entries are durable.
    #[serde(default)]
    pub ttl_secs: Option<u64>,

    /// Interval between expiry sweeps.
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
}

/// Code generator overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeneratorOverrides {
    /// Base URL of the messages API.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Model identifier.
    #[serde(default)]
    pub model: Option<String>,

    /// API key. Usually supplied as `${ENV_VAR}`.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Generation timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Upper bound on generated tokens.
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Consecutive failures before the circuit opens.
    #[serde(default)]
    pub failure_threshold: Option<u32>,

    /// Seconds to wait before probing an open circuit.
    #[serde(default)]
    pub recovery_timeout_secs: Option<u64>,
}

/// Sample-data fetch overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FetchOverrides {
    /// Fetch timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Largest accepted response body in kilobytes.
    #[serde(default)]
    pub max_body_kb: Option<usize>,
}

/// Sandbox configuration overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SandboxOverrides {
    /// Worker program that hosts the execution boundary.
    #[serde(default)]
    pub worker_command: Option<String>,

    /// Fixed arguments passed to the worker.
    #[serde(default)]
    pub worker_args: Vec<String>,

    /// Wait for the `Ready` signal before proceeding anyway.
    #[serde(default)]
    pub ready_timeout_ms: Option<u64>,

    /// Wait for the execution result.
    #[serde(default)]
    pub render_timeout_ms: Option<u64>,

    /// Maximum concurrent renders.
    #[serde(default)]
    pub max_concurrent: Option<usize>,

    /// Maximum size of code handed to a boundary, in kilobytes.
    #[serde(default)]
    pub max_code_kb: Option<usize>,

    /// Maximum size of a single protocol frame, in kilobytes.
    #[serde(default)]
    pub max_message_kb: Option<usize>,

    /// Append render audit events to this file as JSON lines instead of
    /// logging them.
    #[serde(default)]
    pub audit_log: Option<String>,
}

impl GlimpseConfig {
    /// Parse a config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: GlimpseConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string, expanding `${ENV_VAR}` references.
    pub fn from_toml_with_env(toml_str: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(toml_str);
        Self::from_toml(&expanded)
    }

    /// Load config from a file path, expanding environment variables.
    pub fn from_file_with_env(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_with_env(&content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(secret) = &self.session.cookie_secret {
            if secret.len() < MIN_COOKIE_SECRET_LEN {
                return Err(ConfigError::Invalid(format!(
                    "session.cookie_secret must be at least {} bytes",
                    MIN_COOKIE_SECRET_LEN
                )));
            }
        }

        let timeouts = [
            ("session.ttl_secs", self.session.ttl_secs),
            ("session.sweep_interval_secs", self.session.sweep_interval_secs),
            ("cache.ttl_secs", self.cache.ttl_secs),
            ("cache.sweep_interval_secs", self.cache.sweep_interval_secs),
            ("generator.timeout_secs", self.generator.timeout_secs),
            ("fetch.timeout_secs", self.fetch.timeout_secs),
            ("sandbox.ready_timeout_ms", self.sandbox.ready_timeout_ms),
            ("sandbox.render_timeout_ms", self.sandbox.render_timeout_ms),
            ("server.request_timeout_secs", self.server.request_timeout_secs),
        ];
        for (name, value) in timeouts {
            if value == Some(0) {
                return Err(ConfigError::Invalid(format!("{} must be greater than 0", name)));
            }
        }

        if self.sandbox.max_concurrent == Some(0) {
            return Err(ConfigError::Invalid(
                "sandbox.max_concurrent must be greater than 0".into(),
            ));
        }

        if let Some(command) = &self.sandbox.worker_command {
            if !Path::new(command).is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "sandbox.worker_command must be an absolute path, got '{}'",
                    command
                )));
            }
        }

        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string using environment variables.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(value) => result.push_str(&value),
                Err(_) => {
                    // Leave the placeholder if env var not found
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}
