//! Identifiers and ordering primitives for the partition exchange protocol.
//!
//! These types carry no behavior beyond comparison and display; the state
//! machine in `pxproto-exchange` is built entirely on top of them.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a cluster node (server or client).
///
/// Wraps a UUID so the type system distinguishes node identifiers from
/// other UUID-keyed values (proposal ids, exchange ids, etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for NodeId {
    fn from(uuid: Uuid) -> Self {
        NodeId(uuid)
    }
}

/// A node's position in the discovery layer's total join order.
///
/// Lower order means the node joined earlier. The coordinator is always
/// the lowest-ordered *surviving* server; this is the only notion of
/// "election" the protocol needs, since the discovery layer already
/// provides a total order on membership changes.
pub type NodeOrder = u64;

/// A server or client node as known to the exchange at a point in time.
///
/// This is the minimal view the exchange core needs of cluster
/// membership; the discovery layer (external collaborator, see §6) is
/// the source of truth and may carry richer metadata that the protocol
/// never inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub id: NodeId,
    pub order: NodeOrder,
    pub is_client: bool,
}

impl ClusterNode {
    pub fn new_server(id: NodeId, order: NodeOrder) -> Self {
        Self { id, order, is_client: false }
    }

    pub fn new_client(id: NodeId, order: NodeOrder) -> Self {
        Self { id, order, is_client: true }
    }
}

impl PartialOrd for ClusterNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ClusterNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order.cmp(&other.order)
    }
}

/// `(major, minor)` pair identifying a topology version.
///
/// `major` increments on every discovery event (join/leave/fail, or any
/// custom message that forces a full exchange); `minor` increments for
/// intra-version custom messages that don't change membership (e.g. a
/// dynamic cache start that piggybacks on the current major version).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TopologyVersion {
    pub major: u64,
    pub minor: u64,
}

impl TopologyVersion {
    pub const ZERO: TopologyVersion = TopologyVersion { major: 0, minor: 0 };

    pub fn new(major: u64, minor: u64) -> Self {
        Self { major, minor }
    }

    /// Next major version, minor reset to zero.
    pub fn next_major(self) -> Self {
        Self { major: self.major + 1, minor: 0 }
    }

    /// Next minor version within the same major.
    pub fn next_minor(self) -> Self {
        Self { major: self.major, minor: self.minor + 1 }
    }
}

impl PartialOrd for TopologyVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TopologyVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor).cmp(&(other.major, other.minor))
    }
}

impl fmt::Display for TopologyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The discovery event that triggered an exchange, and the resulting
/// exchange type it implies (see §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    ServerJoined { local: bool },
    ServerLeft,
    ServerFailed,
    ClientJoined { local: bool },
    ClientLeft { local: bool },
    Custom(CustomMessageKind),
}

/// Custom (non-membership) messages that can still force an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomMessageKind {
    ClusterActivate,
    ClusterDeactivate,
    DynamicCacheChange,
    Snapshot,
    AffinityChange,
}

/// Exchange type decided by the event classifier (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeType {
    /// Full two-phase round between the coordinator and every server.
    All,
    /// Client-only: the client tells the coordinator, nothing more.
    Client,
    /// No messaging needed at all.
    None,
}

/// Totally-ordered identifier for one exchange instance.
///
/// Ordering derives *only* from `topology_version`, matching the source
/// system's `GridCacheVersion`-style comparator: two exchanges for the
/// same topology version necessarily have the same `initiator_node` and
/// `event_kind` under the discovery contract, so the triple is only
/// needed for equality/identity, not ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeId {
    pub topology_version: TopologyVersion,
    pub initiator_node: NodeId,
    pub event_kind: EventKind,
}

impl ExchangeId {
    pub fn new(topology_version: TopologyVersion, initiator_node: NodeId, event_kind: EventKind) -> Self {
        Self { topology_version, initiator_node, event_kind }
    }

    /// Re-stamp this exchange id for a late requester, keeping the
    /// resulting topology version but substituting the requester's own
    /// identity — used when replaying a cached `finishState` (§3, §4.4).
    pub fn restamped_for(&self, requester: NodeId) -> Self {
        Self { initiator_node: requester, ..*self }
    }
}

impl PartialOrd for ExchangeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ExchangeId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.topology_version.cmp(&other.topology_version)
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exch[{} by {}]", self.topology_version, self.initiator_node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_version_orders_by_pair() {
        assert!(TopologyVersion::new(1, 5) < TopologyVersion::new(2, 0));
        assert!(TopologyVersion::new(2, 0) < TopologyVersion::new(2, 1));
        assert_eq!(TopologyVersion::new(1, 1), TopologyVersion::new(1, 1));
    }

    #[test]
    fn next_major_resets_minor() {
        let v = TopologyVersion::new(3, 7);
        assert_eq!(v.next_major(), TopologyVersion::new(4, 0));
        assert_eq!(v.next_minor(), TopologyVersion::new(3, 8));
    }

    #[test]
    fn exchange_id_orders_by_topology_version_only() {
        let a = NodeId::new();
        let b = NodeId::new();
        let e1 = ExchangeId::new(TopologyVersion::new(1, 0), a, EventKind::ServerJoined { local: false });
        let e2 = ExchangeId::new(TopologyVersion::new(2, 0), b, EventKind::ServerLeft);
        assert!(e1 < e2);
    }

    #[test]
    fn restamp_preserves_topology_version() {
        let initiator = NodeId::new();
        let late = NodeId::new();
        let id = ExchangeId::new(TopologyVersion::new(5, 0), initiator, EventKind::ServerLeft);
        let restamped = id.restamped_for(late);
        assert_eq!(restamped.topology_version, id.topology_version);
        assert_eq!(restamped.initiator_node, late);
    }

    #[test]
    fn cluster_node_orders_by_join_order() {
        let a = ClusterNode::new_server(NodeId::new(), 1);
        let b = ClusterNode::new_server(NodeId::new(), 2);
        assert!(a < b);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn next_major_is_always_strictly_greater(major in 0..u64::MAX / 2, minor in 0..u64::MAX / 2) {
            let v = TopologyVersion::new(major, minor);
            prop_assert!(v.next_major() > v);
            prop_assert_eq!(v.next_major().minor, 0);
        }

        #[test]
        fn next_minor_preserves_major(major in 0..u64::MAX / 2, minor in 0..u64::MAX / 2) {
            let v = TopologyVersion::new(major, minor);
            prop_assert_eq!(v.next_minor().major, v.major);
            prop_assert!(v.next_minor() > v);
        }

        #[test]
        fn restamp_never_changes_topology_version(
            major in 0..u64::MAX / 2,
            minor in 0..u64::MAX / 2,
        ) {
            let initiator = NodeId::new();
            let requester = NodeId::new();
            let id = ExchangeId::new(TopologyVersion::new(major, minor), initiator, EventKind::ServerLeft);
            let restamped = id.restamped_for(requester);
            prop_assert_eq!(restamped.topology_version, id.topology_version);
        }
    }
}
