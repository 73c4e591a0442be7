//! Visitor sessions.
//!
//! A session is an opaque server-minted id plus the endpoint bindings made
//! under it. Sessions idle beyond the TTL are dead: they never satisfy
//! [`SessionRegistry::resolve`], and [`SessionRegistry::sweep`] removes them.
//! The registry knows nothing about cookies or tokens.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::{offset, Clock, SystemClock};

/// Session lifetime settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle time after which a session is dead.
    pub ttl: Duration,
    /// How often the background sweep runs.
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    endpoint_bindings: HashMap<String, String>,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
}

impl Session {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            endpoint_bindings: HashMap::new(),
            created_at: now,
            last_accessed_at: now,
        }
    }

    fn is_expired_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        offset(self.last_accessed_at, ttl).is_some_and(|deadline| deadline <= now)
    }
}

/// Outcome of [`SessionRegistry::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// The live session id.
    pub session_id: String,
    /// True when the id was minted by this call, so the caller must hand
    /// it back to the visitor.
    pub minted: bool,
}

/// Registry counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    /// Live and not-yet-swept sessions.
    pub session_count: usize,
    /// Endpoint bindings across those sessions.
    pub binding_count: usize,
}

/// In-process session table.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
}

impl SessionRegistry {
    /// A registry on the system clock.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// A registry timed by `clock`.
    pub fn with_clock(config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            config,
            clock,
        }
    }

    /// Settings this registry was built with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The live session named by `token`, touched; otherwise a new one.
    ///
    /// A dead session is left in the table for [`Self::sweep`], which is
    /// what reports it so its session-scoped cache entries go too.
    pub fn resolve(&self, token: Option<&str>) -> Resolved {
        let now = self.clock.now();
        let mut sessions = self.lock();

        if let Some(id) = token {
            match sessions.get_mut(id) {
                Some(session) if !session.is_expired_at(now, self.config.ttl) => {
                    session.last_accessed_at = now;
                    return Resolved {
                        session_id: id.to_string(),
                        minted: false,
                    };
                }
                Some(_) => {
                    tracing::debug!(session_id = %id, "session expired, minting a new one");
                }
                None => {}
            }
        }

        let session_id = uuid::Uuid::new_v4().simple().to_string();
        sessions.insert(session_id.clone(), Session::new(now));
        tracing::debug!(session_id = %session_id, "minted session");
        Resolved {
            session_id,
            minted: true,
        }
    }

    /// Record that `session_id` uses `cache_key` for `endpoint`.
    ///
    /// Returns `false` if the session is unknown or dead.
    pub fn bind(&self, session_id: &str, endpoint: &str, cache_key: &str) -> bool {
        let now = self.clock.now();
        let mut sessions = self.lock();
        match sessions.get_mut(session_id) {
            Some(session) if !session.is_expired_at(now, self.config.ttl) => {
                session
                    .endpoint_bindings
                    .insert(endpoint.to_string(), cache_key.to_string());
                session.last_accessed_at = now;
                true
            }
            _ => false,
        }
    }

    /// The cache key bound for `endpoint`, without touching the session.
    pub fn binding(&self, session_id: &str, endpoint: &str) -> Option<String> {
        let now = self.clock.now();
        let sessions = self.lock();
        sessions
            .get(session_id)
            .filter(|session| !session.is_expired_at(now, self.config.ttl))
            .and_then(|session| session.endpoint_bindings.get(endpoint).cloned())
    }

    /// When `session_id` was minted, if it is alive.
    pub fn created_at(&self, session_id: &str) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        self.lock()
            .get(session_id)
            .filter(|session| !session.is_expired_at(now, self.config.ttl))
            .map(|session| session.created_at)
    }

    /// Counters over the table.
    pub fn stats(&self) -> SessionStats {
        let sessions = self.lock();
        SessionStats {
            session_count: sessions.len(),
            binding_count: sessions.values().map(|s| s.endpoint_bindings.len()).sum(),
        }
    }

    /// Remove `session_id` now. Returns whether it existed.
    pub fn clear(&self, session_id: &str) -> bool {
        self.lock().remove(session_id).is_some()
    }

    /// Remove every dead session and return their ids.
    pub fn sweep(&self) -> Vec<String> {
        let now = self.clock.now();
        let ttl = self.config.ttl;
        let mut sessions = self.lock();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, session)| session.is_expired_at(now, ttl))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        expired
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}
