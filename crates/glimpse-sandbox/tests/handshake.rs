//! Scripted handshake sequences driven through the full executor.
//!
//! Each test plays the boundary side with a small async script on an
//! in-process channel. Time is paused, so the readiness and render waits
//! elapse instantly once every task is idle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use glimpse_error::PipelineError;
use glimpse_sandbox::boundary::{Boundary, BoundaryFactory, BoundaryPeer, ChannelBoundaryFactory};
use glimpse_sandbox::fallback::fallback_source;
use glimpse_sandbox::{
    BoundaryId, Envelope, HostState, RenderFailure, RenderReport, SandboxConfig, SandboxError,
    SandboxExecutor, SandboxMessage,
};
use serde_json::json;

fn scripted<F, Fut>(script: F) -> Arc<dyn BoundaryFactory>
where
    F: Fn(BoundaryPeer) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(ChannelBoundaryFactory::new(move |peer| {
        tokio::spawn(script(peer));
    }))
}

fn config() -> SandboxConfig {
    SandboxConfig {
        ready_timeout: Duration::from_millis(1500),
        render_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

async fn render_with(factory: Arc<dyn BoundaryFactory>) -> RenderReport {
    SandboxExecutor::new(config(), factory)
        .render(&fallback_source(), &json!({"rows": [1, 2, 3]}))
        .await
}

fn ready(peer: &BoundaryPeer) {
    peer.send(&Envelope::new(peer.id().clone(), SandboxMessage::Ready));
}

fn succeed(peer: &BoundaryPeer) {
    peer.send(&Envelope::new(
        peer.id().clone(),
        SandboxMessage::ExecuteSuccess {
            data: Some(json!({"rendered": true})),
        },
    ));
}

/// Holds the peer open without answering until the host goes away.
async fn drain(mut peer: BoundaryPeer) {
    while peer.recv().await.is_some() {}
}

#[tokio::test(start_paused = true)]
async fn ready_then_success_renders_ok() {
    let report = render_with(scripted(|mut peer| async move {
        ready(&peer);
        let request = peer.recv().await;
        assert!(matches!(
            request.map(|e| e.message),
            Some(SandboxMessage::ExecuteRequest { .. })
        ));
        succeed(&peer);
        drain(peer).await;
    }))
    .await;

    assert!(report.is_ok(), "{report:?}");
    assert!(report.ready_confirmed);
    assert_eq!(report.discarded_messages, 0);
    assert_eq!(report.output(), Some(&json!({"rendered": true})));
}

#[tokio::test(start_paused = true)]
async fn request_carries_source_and_data() {
    let report = render_with(scripted(|mut peer| async move {
        ready(&peer);
        if let Some(Envelope {
            message: SandboxMessage::ExecuteRequest { code, data },
            boundary,
        }) = peer.recv().await
        {
            assert_eq!(&boundary, peer.id());
            assert!(code.contains("function GeneratedComponent"));
            assert_eq!(data, json!({"rows": [1, 2, 3]}));
            succeed(&peer);
        }
        drain(peer).await;
    }))
    .await;
    assert!(report.is_ok());
}

#[tokio::test(start_paused = true)]
async fn failure_before_ready_is_discarded() {
    let report = render_with(scripted(|mut peer| async move {
        peer.send(&Envelope::new(
            peer.id().clone(),
            SandboxMessage::ExecuteFailure {
                error: "too early".into(),
            },
        ));
        ready(&peer);
        let _ = peer.recv().await;
        succeed(&peer);
        drain(peer).await;
    }))
    .await;

    assert!(report.is_ok(), "{report:?}");
    assert_eq!(report.discarded_messages, 1);
}

#[tokio::test(start_paused = true)]
async fn reported_failure_ends_in_error() {
    let report = render_with(scripted(|mut peer| async move {
        ready(&peer);
        let _ = peer.recv().await;
        peer.send(&Envelope::new(
            peer.id().clone(),
            SandboxMessage::ExecuteFailure {
                error: "TypeError: data.rows.map is not a function".into(),
            },
        ));
        drain(peer).await;
    }))
    .await;

    match report.failure() {
        Some(RenderFailure::Reported { message }) => {
            assert!(message.contains("is not a function"))
        }
        other => panic!("unexpected failure {other:?}"),
    }
    assert!(matches!(
        report.error(),
        Some(PipelineError::SandboxExecutionFailure { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn silence_ends_in_render_timeout() {
    let report = render_with(scripted(drain)).await;

    assert!(!report.ready_confirmed);
    assert_eq!(
        report.outcome,
        HostState::RenderedError {
            failure: RenderFailure::RenderTimeout { timeout_ms: 5000 }
        }
    );
}

#[tokio::test(start_paused = true)]
async fn missing_ready_still_renders_after_fallback_delay() {
    let report = render_with(scripted(|mut peer| async move {
        // Never signals Ready, but answers the request.
        let _ = peer.recv().await;
        succeed(&peer);
        drain(peer).await;
    }))
    .await;

    assert!(report.is_ok(), "{report:?}");
    assert!(!report.ready_confirmed);
}

#[tokio::test(start_paused = true)]
async fn late_ready_gets_one_resend() {
    let report = render_with(scripted(|mut peer| async move {
        // The first request arrives before the boundary listens and is lost.
        let first = peer.recv().await;
        assert!(first.is_some());
        ready(&peer);
        let second = peer.recv().await;
        assert!(matches!(
            second.map(|e| e.message),
            Some(SandboxMessage::ExecuteRequest { .. })
        ));
        succeed(&peer);
        drain(peer).await;
    }))
    .await;

    assert!(report.is_ok(), "{report:?}");
    assert!(report.ready_confirmed);
}

#[tokio::test(start_paused = true)]
async fn stale_instance_ready_cannot_confirm() {
    let report = render_with(scripted(|mut peer| async move {
        peer.send(&Envelope::new(
            BoundaryId::from("previous-instance"),
            SandboxMessage::Ready,
        ));
        let _ = peer.recv().await;
        succeed(&peer);
        drain(peer).await;
    }))
    .await;

    assert!(report.is_ok());
    assert!(!report.ready_confirmed);
    assert_eq!(report.discarded_messages, 1);
}

#[tokio::test(start_paused = true)]
async fn junk_messages_are_discarded() {
    let report = render_with(scripted(|mut peer| async move {
        peer.send_raw(json!({"type": "navigate", "to": "https://evil.example"}));
        peer.send_raw(json!({"boundary": peer.id().as_str(), "kind": "Ready", "payload": {"x": 1}}));
        ready(&peer);
        let _ = peer.recv().await;
        succeed(&peer);
        drain(peer).await;
    }))
    .await;

    assert!(report.is_ok());
    assert_eq!(report.discarded_messages, 2);
}

#[tokio::test(start_paused = true)]
async fn boundary_gone_before_ready_is_load_failure() {
    let report = render_with(scripted(|peer| async move { drop(peer) })).await;
    assert!(matches!(
        report.failure(),
        Some(RenderFailure::LoadFailure { .. })
    ));
    assert!(matches!(
        report.error(),
        Some(PipelineError::SandboxLoadFailure { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn boundary_crash_while_rendering_is_execution_failure() {
    let report = render_with(scripted(|mut peer| async move {
        ready(&peer);
        let _ = peer.recv().await;
        drop(peer);
    }))
    .await;
    assert!(matches!(
        report.failure(),
        Some(RenderFailure::BoundaryClosed { .. })
    ));
}

struct FailingFactory;

#[async_trait::async_trait]
impl BoundaryFactory for FailingFactory {
    async fn instantiate(&self, _id: BoundaryId) -> Result<Box<dyn Boundary>, SandboxError> {
        Err(SandboxError::Spawn {
            worker: "test".into(),
            message: "no runtime available".into(),
        })
    }
}

struct HangingFactory;

#[async_trait::async_trait]
impl BoundaryFactory for HangingFactory {
    async fn instantiate(&self, _id: BoundaryId) -> Result<Box<dyn Boundary>, SandboxError> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn factory_error_is_load_failure() {
    let report = render_with(Arc::new(FailingFactory)).await;
    let failure = report.failure().unwrap();
    assert!(matches!(failure, RenderFailure::LoadFailure { .. }));
    assert!(failure.message().contains("no runtime available"));
}

#[tokio::test(start_paused = true)]
async fn hanging_factory_is_bounded() {
    let report = render_with(Arc::new(HangingFactory)).await;
    let failure = report.failure().unwrap();
    assert!(failure.message().contains("did not load"), "{}", failure.message());
}

#[tokio::test(start_paused = true)]
async fn each_render_uses_a_fresh_boundary() {
    let executor = SandboxExecutor::new(
        config(),
        scripted(|mut peer| async move {
            ready(&peer);
            let _ = peer.recv().await;
            succeed(&peer);
            drain(peer).await;
        }),
    );
    let a = executor.render(&fallback_source(), &json!(1)).await;
    let b = executor.render(&fallback_source(), &json!(2)).await;
    assert!(a.is_ok() && b.is_ok());
    assert_ne!(a.boundary_id, b.boundary_id);
}
