//! Structured error taxonomy for the exchange protocol (§7).
//!
//! Most internal plumbing propagates errors with plain `anyhow::Result`.
//! `ExchangeError` is reserved for the handful of call sites that must
//! *branch* on error kind per §7's taxonomy (peer-gone vs.
//! quiesce-timeout vs. fatal), using a layered `#[error(...)]` enum.

use thiserror::Error;

use crate::ids::NodeId;

/// Errors the exchange core must distinguish from one another.
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Sending a message to `node` failed because the peer is already
    /// gone. Per §7, this is logged and silently accepted: the
    /// coordinator will observe the corresponding node-leave event
    /// independently through the discovery layer.
    #[error("peer {0} is gone")]
    PeerGone(NodeId),

    /// Local activation/deactivation failed. Collected into
    /// `changeGlobalStateExceptions` on the coordinator and propagated
    /// via the full-message's `errorsMap` (§7).
    #[error("global state change failed on {node}: {message}")]
    GlobalStateChangeFailed { node: NodeId, message: String },

    /// Affinity reconciliation or WAL-history reservation failed for a
    /// partition; per §7 this completes the exchange with an error and
    /// the node must reconnect.
    #[error("history reservation failed for group {group}, partition {partition}")]
    HistoryReservationFailed { group: u32, partition: u32 },

    /// An IO failure (or explicit client-disconnect signal) that the
    /// transport layer says is recoverable by reconnecting. Wrapped so
    /// the exchange driver can translate it into a need-reconnect
    /// completion rather than a fatal one (§7).
    #[error("node needs to reconnect: {0}")]
    NeedReconnect(String),

    /// Anything else: propagated as-is via the pervasive `anyhow::Error`
    /// path used for unstructured/unexpected failures.
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl ExchangeError {
    /// Whether this error should trigger the node's reconnect flow per
    /// §7's "Reconnect-triggering causes" bullet.
    pub fn requires_reconnect(&self) -> bool {
        matches!(self, ExchangeError::NeedReconnect(_) | ExchangeError::HistoryReservationFailed { .. })
    }

    /// Whether this error is safe to swallow and continue (peer-gone is
    /// the only such case per §7).
    pub fn is_benign(&self) -> bool {
        matches!(self, ExchangeError::PeerGone(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_gone_is_benign_not_reconnect() {
        let err = ExchangeError::PeerGone(NodeId::new());
        assert!(err.is_benign());
        assert!(!err.requires_reconnect());
    }

    #[test]
    fn history_reservation_failure_requires_reconnect() {
        let err = ExchangeError::HistoryReservationFailed { group: 1, partition: 2 };
        assert!(err.requires_reconnect());
        assert!(!err.is_benign());
    }
}
