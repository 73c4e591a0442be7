//! Single-occupancy render slot.
//!
//! Swapping in a new artifact aborts the render in progress (dropping its
//! boundary, which kills a worker process) and starts over from `Idle`.
//! There is no partial update path.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::{AbortHandle, JoinHandle};

use crate::executor::{RenderReport, SandboxExecutor};
use crate::validator::ValidatedSource;

/// Holds at most one in-flight render.
pub struct RenderSlot {
    executor: Arc<SandboxExecutor>,
    current: Option<AbortHandle>,
    generation: u64,
}

/// A render started by [`RenderSlot::swap`]. Await it with [`Self::wait`].
#[derive(Debug)]
pub struct PendingRender {
    generation: u64,
    handle: JoinHandle<RenderReport>,
}

impl PendingRender {
    /// Slot generation this render was started under.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The report, or `None` if a later swap aborted this render.
    pub async fn wait(self) -> Option<RenderReport> {
        self.handle.await.ok()
    }
}

impl RenderSlot {
    /// An empty slot rendering through `executor`.
    pub fn new(executor: Arc<SandboxExecutor>) -> Self {
        Self {
            executor,
            current: None,
            generation: 0,
        }
    }

    /// Abort whatever is rendering and start rendering `source`.
    pub fn swap(&mut self, source: ValidatedSource, data: Value) -> PendingRender {
        self.cancel();
        self.generation += 1;
        let executor = Arc::clone(&self.executor);
        let handle = tokio::spawn(async move { executor.render(&source, &data).await });
        self.current = Some(handle.abort_handle());
        tracing::debug!(generation = self.generation, "render slot swapped");
        PendingRender {
            generation: self.generation,
            handle,
        }
    }

    /// Abort the in-flight render, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.current.take() {
            handle.abort();
        }
    }

    /// Whether a render is in flight.
    pub fn is_active(&self) -> bool {
        self.current.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Number of renders started in this slot.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for RenderSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
