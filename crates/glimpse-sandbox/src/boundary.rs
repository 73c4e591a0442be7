//! The isolation boundary seam.
//!
//! A [`Boundary`] is one disposable execution context. The executor never
//! touches its internals: it sends envelopes, receives [`Inbound`] events,
//! and tears it down. [`BoundaryFactory`] creates one per render.
//!
//! [`ChannelBoundary`] carries raw JSON over in-process channels. It is the
//! adapter for isolation primitives living in the same process (a WASM
//! runtime, a dedicated thread) and the scripted peer used in tests.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::SandboxError;
use crate::protocol::{BoundaryId, Envelope};

/// One event read from a boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A well-formed envelope.
    Message(Envelope),
    /// Something arrived that is not a valid envelope.
    Malformed,
    /// The channel is gone; every later read returns this again.
    Closed {
        /// Why.
        reason: String,
    },
}

/// One live boundary instance.
///
/// `recv` must be cancel-safe: the executor races it against deadlines.
#[async_trait::async_trait]
pub trait Boundary: Send {
    /// Instance id, included in every envelope.
    fn id(&self) -> &BoundaryId;

    /// Send an envelope to the boundary.
    async fn send(&mut self, envelope: &Envelope) -> Result<(), SandboxError>;

    /// Wait for the next inbound event.
    async fn recv(&mut self) -> Inbound;

    /// Dispose of the instance. Idempotent.
    async fn teardown(&mut self);
}

/// Creates boundary instances, one per render.
#[async_trait::async_trait]
pub trait BoundaryFactory: Send + Sync {
    /// Bring up a fresh instance seeded only with its id.
    async fn instantiate(&self, id: BoundaryId) -> Result<Box<dyn Boundary>, SandboxError>;
}

/// Host end of an in-process boundary.
pub struct ChannelBoundary {
    id: BoundaryId,
    to_peer: Option<mpsc::UnboundedSender<Value>>,
    from_peer: mpsc::UnboundedReceiver<Value>,
}

/// Boundary end of an in-process boundary.
pub struct BoundaryPeer {
    id: BoundaryId,
    to_host: mpsc::UnboundedSender<Value>,
    from_host: mpsc::UnboundedReceiver<Value>,
}

/// Create a connected host/peer pair for `id`.
pub fn channel_boundary(id: BoundaryId) -> (ChannelBoundary, BoundaryPeer) {
    let (to_peer, from_host) = mpsc::unbounded_channel();
    let (to_host, from_peer) = mpsc::unbounded_channel();
    (
        ChannelBoundary {
            id: id.clone(),
            to_peer: Some(to_peer),
            from_peer,
        },
        BoundaryPeer {
            id,
            to_host,
            from_host,
        },
    )
}

#[async_trait::async_trait]
impl Boundary for ChannelBoundary {
    fn id(&self) -> &BoundaryId {
        &self.id
    }

    async fn send(&mut self, envelope: &Envelope) -> Result<(), SandboxError> {
        let sender = self
            .to_peer
            .as_ref()
            .ok_or_else(|| SandboxError::ChannelClosed("boundary torn down".into()))?;
        sender
            .send(envelope.to_value())
            .map_err(|_| SandboxError::ChannelClosed("peer dropped".into()))
    }

    async fn recv(&mut self) -> Inbound {
        match self.from_peer.recv().await {
            Some(value) => match Envelope::from_value(value) {
                Some(envelope) => Inbound::Message(envelope),
                None => Inbound::Malformed,
            },
            None => Inbound::Closed {
                reason: "peer dropped".into(),
            },
        }
    }

    async fn teardown(&mut self) {
        self.to_peer = None;
        self.from_peer.close();
    }
}

impl BoundaryPeer {
    /// Id of the instance this peer plays.
    pub fn id(&self) -> &BoundaryId {
        &self.id
    }

    /// Send an envelope to the host. Returns false once the host is gone.
    pub fn send(&self, envelope: &Envelope) -> bool {
        self.send_raw(envelope.to_value())
    }

    /// Send arbitrary JSON, bypassing envelope encoding.
    pub fn send_raw(&self, value: Value) -> bool {
        self.to_host.send(value).is_ok()
    }

    /// Wait for the next envelope from the host. `None` once the host is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            let value = self.from_host.recv().await?;
            if let Some(envelope) = Envelope::from_value(value) {
                return Some(envelope);
            }
        }
    }
}

/// Factory handing each new peer to a callback, which is expected to run
/// the boundary side (usually on a spawned task).
pub struct ChannelBoundaryFactory {
    on_peer: Arc<dyn Fn(BoundaryPeer) + Send + Sync>,
}

impl ChannelBoundaryFactory {
    /// Build a factory around the peer callback.
    pub fn new(on_peer: impl Fn(BoundaryPeer) + Send + Sync + 'static) -> Self {
        Self {
            on_peer: Arc::new(on_peer),
        }
    }
}

#[async_trait::async_trait]
impl BoundaryFactory for ChannelBoundaryFactory {
    async fn instantiate(&self, id: BoundaryId) -> Result<Box<dyn Boundary>, SandboxError> {
        let (host, peer) = channel_boundary(id);
        (self.on_peer)(peer);
        Ok(Box::new(host))
    }
}
