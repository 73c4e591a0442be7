//! Background expiry for the cache and the session table.
//!
//! One task, two intervals. Runs until the token is cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheStore;
use crate::session::SessionRegistry;

/// Sweep cadence.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// How often expired cache entries are deleted.
    pub cache_interval: Duration,
    /// How often idle sessions are removed.
    pub session_interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            cache_interval: Duration::from_secs(60),
            session_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Spawn the sweep loop.
///
/// Sessions removed by a sweep also lose their session-scoped cache entries.
pub fn spawn_sweeper(
    cache: Arc<CacheStore>,
    sessions: Arc<SessionRegistry>,
    config: SweepConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            cache_interval_secs = config.cache_interval.as_secs(),
            session_interval_secs = config.session_interval.as_secs(),
            "sweeper started"
        );

        let mut cache_tick = tokio::time::interval(config.cache_interval);
        let mut session_tick = tokio::time::interval(config.session_interval);
        cache_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        session_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("sweeper stopping");
                    break;
                }
                _ = cache_tick.tick() => {
                    let removed = cache.evict_expired().await;
                    if removed > 0 {
                        tracing::info!(removed, "cache sweep: purged expired entries");
                    } else {
                        tracing::debug!("cache sweep: nothing expired");
                    }
                }
                _ = session_tick.tick() => {
                    sweep_sessions(&cache, &sessions).await;
                }
            }
        }
    })
}

async fn sweep_sessions(cache: &CacheStore, sessions: &SessionRegistry) {
    let expired = sessions.sweep();
    if expired.is_empty() {
        tracing::debug!("session sweep: nothing idle");
        return;
    }

    let mut entries = 0;
    for id in &expired {
        entries += cache.evict_session(id).await;
    }
    tracing::info!(
        sessions = expired.len(),
        cache_entries = entries,
        "session sweep: removed idle sessions"
    );
}
