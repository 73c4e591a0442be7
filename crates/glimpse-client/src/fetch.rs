//! Sample-data fetch from the caller's endpoint.

use std::time::Duration;

use glimpse_error::PipelineError;
use reqwest::Url;
use serde_json::Value;

/// Fetch limits.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Whole-request deadline, connect to last body byte.
    pub timeout: Duration,
    /// Largest body accepted.
    pub max_body_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// A successful fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedData {
    /// HTTP status of the response.
    pub status: u16,
    /// Decoded JSON body.
    pub json: Value,
}

/// GET a JSON document from a URL.
#[async_trait::async_trait]
pub trait DataFetcher: Send + Sync {
    /// Fetch `url`.
    async fn fetch(&self, url: &str) -> Result<FetchedData, PipelineError>;
}

/// Parse `endpoint` and require an absolute http(s) URL.
pub fn parse_endpoint(endpoint: &str) -> Result<Url, PipelineError> {
    let url = Url::parse(endpoint.trim())
        .map_err(|e| PipelineError::InvalidEndpoint(format!("'{endpoint}': {e}")))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        scheme => Err(PipelineError::InvalidEndpoint(format!(
            "'{endpoint}': unsupported scheme '{scheme}'"
        ))),
    }
}

/// [`DataFetcher`] over reqwest.
#[derive(Debug, Clone)]
pub struct HttpDataFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl HttpDataFetcher {
    /// A fetcher with its own connection pool.
    pub fn new(config: FetchConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// A fetcher sharing `client`.
    pub fn with_client(client: reqwest::Client, config: FetchConfig) -> Self {
        Self { client, config }
    }

    async fn fetch_inner(&self, url: Url) -> Result<FetchedData, PipelineError> {
        let endpoint = url.to_string();
        let failed = |message: String| PipelineError::FetchFailed {
            url: endpoint.clone(),
            message,
        };

        let mut response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::FetchHttpError {
                url: endpoint.clone(),
                status: status.as_u16(),
            });
        }

        let limit = self.config.max_body_bytes;
        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(failed(format!("response body exceeds {limit} bytes")));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| failed(e.to_string()))? {
            if body.len() + chunk.len() > limit {
                return Err(failed(format!("response body exceeds {limit} bytes")));
            }
            body.extend_from_slice(&chunk);
        }

        let json = serde_json::from_slice(&body)
            .map_err(|e| failed(format!("response is not JSON: {e}")))?;
        Ok(FetchedData {
            status: status.as_u16(),
            json,
        })
    }
}

#[async_trait::async_trait]
impl DataFetcher for HttpDataFetcher {
    #[tracing::instrument(skip(self), fields(timeout_ms = self.config.timeout.as_millis() as u64))]
    async fn fetch(&self, url: &str) -> Result<FetchedData, PipelineError> {
        let parsed = parse_endpoint(url)?;
        match tokio::time::timeout(self.config.timeout, self.fetch_inner(parsed)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(PipelineError::FetchTimeout {
                url: url.to_string(),
                timeout_ms: self.config.timeout.as_millis() as u64,
            }),
        }
    }
}
