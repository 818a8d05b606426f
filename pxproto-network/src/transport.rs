//! Transport collaborator (§6: "Transport (consumed)").
//!
//! The exchange core never opens a socket itself; it calls `send` on
//! whatever `Transport` the surrounding node wires up. Production
//! deployments would back this with the node's real messaging stack
//! (TCP/mTLS); for tests and the demo CLI, `InMemoryTransport` below
//! routes messages between in-process peers over `tokio::sync::mpsc`
//! channels.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use pxproto_core::{ExchangeError, NodeId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::messages::ExchangeWireMessage;

/// Which connection pool a message should travel over. The source
/// system distinguishes `SYSTEM` (exchange/consensus traffic) from
/// public pools so user workload never starves coordination messages;
/// we keep the distinction even though `InMemoryTransport` doesn't act
/// on it, so a real implementation has somewhere to hang priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagePool {
    System,
    Public,
}

/// Transport collaborator: send one exchange message to one peer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        to: NodeId,
        msg: ExchangeWireMessage,
        pool: MessagePool,
    ) -> Result<(), ExchangeError>;
}

/// In-process transport for tests and the demo CLI: every registered
/// node gets an unbounded channel, and `send` just pushes onto it.
///
/// Dropping a node's receiver (simulating it leaving the cluster) makes
/// subsequent `send`s to it return `ExchangeError::PeerGone`, exactly
/// the "peer gone while sending" case in §7 — callers are expected to
/// treat that as benign and rely on the discovery layer's leave event
/// to notice independently.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    inboxes: Arc<DashMap<NodeId, mpsc::UnboundedSender<ExchangeWireMessage>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `node` and return the receiving half of its inbox.
    pub fn register(&self, node: NodeId) -> mpsc::UnboundedReceiver<ExchangeWireMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.insert(node, tx);
        rx
    }

    /// Simulate `node` leaving: further sends to it fail as peer-gone.
    pub fn unregister(&self, node: NodeId) {
        self.inboxes.remove(&node);
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(
        &self,
        to: NodeId,
        msg: ExchangeWireMessage,
        pool: MessagePool,
    ) -> Result<(), ExchangeError> {
        match self.inboxes.get(&to) {
            Some(tx) => {
                debug!(node = %to, ?pool, "sending exchange message");
                tx.send(msg).map_err(|_| ExchangeError::PeerGone(to))
            }
            None => {
                warn!(node = %to, "send to peer failed: peer gone");
                Err(ExchangeError::PeerGone(to))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pxproto_core::{EventKind, ExchangeId, TopologyVersion};

    fn dummy_single(sender: NodeId) -> ExchangeWireMessage {
        ExchangeWireMessage::Single(crate::messages::SingleMessage::trivial(
            ExchangeId::new(TopologyVersion::new(1, 0), sender, EventKind::ServerLeft),
            sender,
            false,
        ))
    }

    #[tokio::test]
    async fn delivers_to_registered_node() {
        let transport = InMemoryTransport::new();
        let a = NodeId::new();
        let mut rx = transport.register(a);

        transport.send(a, dummy_single(a), MessagePool::System).await.unwrap();
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn send_to_unknown_node_is_peer_gone() {
        let transport = InMemoryTransport::new();
        let ghost = NodeId::new();
        let err = transport.send(ghost, dummy_single(ghost), MessagePool::System).await.unwrap_err();
        assert!(err.is_benign());
    }

    #[tokio::test]
    async fn send_after_unregister_is_peer_gone() {
        let transport = InMemoryTransport::new();
        let a = NodeId::new();
        let _rx = transport.register(a);
        transport.unregister(a);
        let err = transport.send(a, dummy_single(a), MessagePool::System).await.unwrap_err();
        assert!(err.is_benign());
    }
}
