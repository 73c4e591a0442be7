//! Artifact cache with per-write TTL and access accounting.
//!
//! Entries are identified by a [`CompositeKey`]. A key without a session id
//! is shared by every visitor; a key with one is private to that session.
//! Writes are upserts by key, so at most one entry exists per key and
//! concurrent writers converge to last-write-wins.
//!
//! The store never fails its callers. Backend errors on lookup read as a
//! miss; on write, as `false`; on eviction, as zero removed. All are logged.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use glimpse_error::PipelineError;
use glimpse_sandbox::GenerationArtifact;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::clock::{offset, Clock, SystemClock};

/// Identity of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeKey {
    /// Data-API endpoint the artifact renders.
    pub endpoint: String,
    /// Logical cache key chosen by the caller.
    pub cache_key: String,
    /// Owning session; `None` for shared entries.
    pub session_id: Option<String>,
}

impl CompositeKey {
    /// A key shared across sessions.
    pub fn shared(endpoint: impl Into<String>, cache_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            cache_key: cache_key.into(),
            session_id: None,
        }
    }

    /// A key private to `session_id`.
    pub fn scoped(
        endpoint: impl Into<String>,
        cache_key: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            cache_key: cache_key.into(),
            session_id: Some(session_id.into()),
        }
    }
}

/// A persisted artifact plus bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Entry identity.
    pub key: CompositeKey,
    /// The cached artifact, as originally stored.
    pub artifact: GenerationArtifact,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
    /// Last write or hit.
    pub last_accessed_at: DateTime<Utc>,
    /// Number of hits.
    pub access_count: u64,
    /// When the entry stops being served; `None` means never by time.
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Whether the entry has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Bulk-delete filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteFilter {
    /// Entries whose expiry is at or before this instant.
    ExpiredAt(DateTime<Utc>),
    /// Entries scoped to this session.
    Session(String),
    /// The entry with exactly this key.
    Key(CompositeKey),
}

impl DeleteFilter {
    /// Whether `entry` matches.
    pub fn matches(&self, entry: &CacheEntry) -> bool {
        match self {
            Self::ExpiredAt(now) => entry.is_expired_at(*now),
            Self::Session(id) => entry.key.session_id.as_deref() == Some(id.as_str()),
            Self::Key(key) => &entry.key == key,
        }
    }
}

/// Errors from a backing store.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The store cannot be reached.
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    /// The store rejected the operation.
    #[error("cache backend operation failed: {0}")]
    Operation(String),
}

impl From<BackendError> for PipelineError {
    fn from(err: BackendError) -> Self {
        PipelineError::CacheBackendError {
            message: err.to_string(),
        }
    }
}

/// The access pattern the cache needs from a document store.
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    /// Find the entry for `key` that is not expired at `now`. On a hit,
    /// increment its access count and set `last_accessed_at = now`, then
    /// return the updated entry.
    async fn find_and_touch(
        &self,
        key: &CompositeKey,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, BackendError>;

    /// Insert or replace the entry with the same key.
    async fn upsert(&self, entry: CacheEntry) -> Result<(), BackendError>;

    /// Delete every entry matching `filter`, returning how many went.
    async fn delete_many(&self, filter: &DeleteFilter) -> Result<usize, BackendError>;

    /// Number of stored entries, expired or not.
    async fn count(&self) -> Result<usize, BackendError>;
}

/// In-process backend. The uniqueness constraint is the map key.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<CompositeKey, CacheEntry>>,
}

impl MemoryBackend {
    /// An empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CacheBackend for MemoryBackend {
    async fn find_and_touch(
        &self,
        key: &CompositeKey,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, BackendError> {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired_at(now) => {
                entry.access_count += 1;
                entry.last_accessed_at = now;
                Ok(Some(entry.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn upsert(&self, entry: CacheEntry) -> Result<(), BackendError> {
        self.entries.lock().await.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete_many(&self, filter: &DeleteFilter) -> Result<usize, BackendError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| !filter.matches(entry));
        Ok(before - entries.len())
    }

    async fn count(&self) -> Result<usize, BackendError> {
        Ok(self.entries.lock().await.len())
    }
}

/// Cache introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Stored entries, including expired ones not yet swept.
    pub entry_count: usize,
}

/// The cache service.
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    /// A store over `backend`, timed by `clock`.
    pub fn new(backend: Arc<dyn CacheBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    /// A store over a fresh [`MemoryBackend`] on the system clock.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), Arc::new(SystemClock))
    }

    /// Freshest non-expired entry for `key`, counting the access.
    ///
    /// Backend errors read as a miss.
    pub async fn lookup(&self, key: &CompositeKey) -> Option<CacheEntry> {
        match self.backend.find_and_touch(key, self.clock.now()).await {
            Ok(Some(entry)) => {
                tracing::debug!(
                    endpoint = %key.endpoint,
                    cache_key = %key.cache_key,
                    access_count = entry.access_count,
                    "cache hit"
                );
                Some(entry)
            }
            Ok(None) => {
                tracing::debug!(endpoint = %key.endpoint, cache_key = %key.cache_key, "cache miss");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, endpoint = %key.endpoint, "cache lookup failed, treating as miss");
                None
            }
        }
    }

    /// Upsert `artifact` under `key`. With a `ttl`, the entry expires at
    /// `now + ttl`; without one it lives until evicted.
    ///
    /// Only artifacts whose generation succeeded are stored. Returns whether
    /// the write happened.
    pub async fn store(
        &self,
        key: CompositeKey,
        artifact: GenerationArtifact,
        ttl: Option<Duration>,
    ) -> bool {
        if !artifact.succeeded() {
            tracing::debug!(endpoint = %key.endpoint, "not caching a failed generation");
            return false;
        }

        let now = self.clock.now();
        let entry = CacheEntry {
            key,
            artifact,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            expires_at: ttl.and_then(|ttl| offset(now, ttl)),
        };
        let endpoint = entry.key.endpoint.clone();
        match self.backend.upsert(entry).await {
            Ok(()) => {
                tracing::debug!(endpoint = %endpoint, ttl_secs = ttl.map(|t| t.as_secs()), "cached artifact");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, endpoint = %endpoint, "cache write failed");
                false
            }
        }
    }

    /// Remove every entry expired at the current time.
    pub async fn evict_expired(&self) -> usize {
        self.delete(DeleteFilter::ExpiredAt(self.clock.now())).await
    }

    /// Remove every entry scoped to `session_id`.
    pub async fn evict_session(&self, session_id: &str) -> usize {
        self.delete(DeleteFilter::Session(session_id.to_string()))
            .await
    }

    /// Remove the entry for `key`.
    pub async fn evict(&self, key: &CompositeKey) -> bool {
        self.delete(DeleteFilter::Key(key.clone())).await > 0
    }

    /// Entry count.
    pub async fn stats(&self) -> CacheStats {
        let entry_count = match self.backend.count().await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, "cache count failed");
                0
            }
        };
        CacheStats { entry_count }
    }

    async fn delete(&self, filter: DeleteFilter) -> usize {
        match self.backend.delete_many(&filter).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(error = %e, filter = ?filter, "cache eviction failed");
                0
            }
        }
    }
}
