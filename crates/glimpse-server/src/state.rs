use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use glimpse_sandbox::{RenderReport, RenderSlot, SandboxExecutor, ValidatedSource};
use serde_json::Value;

use crate::metrics::GlimpseMetrics;
use crate::orchestrator::Pipeline;
use crate::token::SessionCookies;

/// Shared state available to every handler via `State<AppState>`.
///
/// Cheap to clone; everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The generation pipeline, which also owns the cache and session registry.
    pub pipeline: Arc<Pipeline>,
    /// Sandbox executor for `/api/render`.
    pub executor: Arc<SandboxExecutor>,
    /// One render slot per visitor session.
    pub renders: Arc<RenderSlots>,
    /// Session cookie codec.
    pub cookies: Arc<SessionCookies>,
}

impl AppState {
    /// Assemble the state; render slots share `executor`.
    pub fn new(
        pipeline: Arc<Pipeline>,
        executor: Arc<SandboxExecutor>,
        cookies: Arc<SessionCookies>,
    ) -> Self {
        Self {
            renders: Arc::new(RenderSlots::new(executor.clone())),
            pipeline,
            executor,
            cookies,
        }
    }

    /// Metrics shared with the pipeline.
    pub fn metrics(&self) -> &Arc<GlimpseMetrics> {
        self.pipeline.metrics()
    }
}

/// Per-session render slots. A session's new render tears down the one it
/// still has in flight; renders without a session run unslotted.
pub struct RenderSlots {
    executor: Arc<SandboxExecutor>,
    slots: Mutex<HashMap<String, RenderSlot>>,
}

impl RenderSlots {
    /// Slots rendering through `executor`.
    pub fn new(executor: Arc<SandboxExecutor>) -> Self {
        Self {
            executor,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RenderSlot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Render `source` for `owner`. `None` when a later render from the same
    /// owner superseded this one.
    pub async fn render(
        &self,
        owner: Option<&str>,
        source: ValidatedSource,
        data: Value,
    ) -> Option<RenderReport> {
        let Some(owner) = owner else {
            return Some(self.executor.render(&source, &data).await);
        };

        let pending = {
            let mut slots = self.lock();
            slots.retain(|_, slot| slot.is_active());
            slots
                .entry(owner.to_string())
                .or_insert_with(|| RenderSlot::new(self.executor.clone()))
                .swap(source, data)
        };
        let report = pending.wait().await;
        if report.is_none() {
            tracing::debug!(session_id = %owner, "render superseded");
        }
        report
    }

    /// Abort and drop the slot of `owner`.
    pub fn forget(&self, owner: &str) -> bool {
        self.lock().remove(owner).is_some()
    }

    /// Slots with a render in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().values().filter(|slot| slot.is_active()).count()
    }
}
