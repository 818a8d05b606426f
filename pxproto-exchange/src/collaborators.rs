//! External collaborators the exchange core calls into (§6). The core
//! never touches a socket, the WAL, or the affinity function directly;
//! it's driven entirely through these traits, same separation as the
//! teacher's consensus engine taking `Arc<SecurityFramework>` and
//! `Arc<StorageHierarchy>` rather than owning them.
//!
//! `memory` provides simple in-process implementations shared by the
//! integration tests and the demo CLI.

use std::collections::HashMap;

use async_trait::async_trait;
use pxproto_core::{ClusterNode, ExchangeError, GroupId, NodeId, PartitionId};

/// Discovery layer (§6: "Discovery layer (consumed)").
pub trait Discovery: Send + Sync {
    fn alive(&self, node: NodeId) -> bool;
    /// Ordered server list, discovery's total join order.
    fn server_nodes(&self) -> Vec<ClusterNode>;
}

/// Affinity function (§6: "Affinity function (consumed)").
pub trait Affinity: Send + Sync {
    /// Whether the leave of `node` requires centralized (ring-based)
    /// distribution of the resulting full-message, because the leaver
    /// held unique affinity for some partition (§4.1).
    fn on_server_left(&self, group: GroupId, node: NodeId) -> bool;

    /// The affinity function's ideal assignment for a group given the
    /// current server set, used to compute `idealAffinityDiff` on merge
    /// (§4.5.6, §11.4).
    fn ideal_assignment(
        &self,
        group: GroupId,
        partitions: &[PartitionId],
        servers: &[ClusterNode],
    ) -> HashMap<PartitionId, Vec<NodeId>>;
}

/// Persistence collaborator (§6: "Persistence (consumed)").
#[async_trait]
pub trait Persistence: Send + Sync {
    /// `reserveHistoryForExchange` — WAL ranges this node can still
    /// supply for rebalance, keyed by group then partition.
    async fn reserve_history_for_exchange(&self) -> HashMap<GroupId, HashMap<PartitionId, u64>>;

    /// `reserveHistoryForPreloading(group, part, counter)` — attempt to
    /// pin the WAL segment a specific rebalance needs.
    fn reserve_history_for_preloading(&self, group: GroupId, part: PartitionId, counter: u64) -> bool;

    /// Flush the write-behind store once partition-release completes
    /// (§4.3), so durable state matches the now-visible state.
    async fn flush_write_behind(&self) -> Result<(), ExchangeError>;
}

/// Cache-lifecycle manager (§6: "Cache lifecycle (consumed)").
#[async_trait]
pub trait CacheLifecycle: Send + Sync {
    async fn start_received_caches(&self, groups: &[GroupId]) -> Result<(), ExchangeError>;
    async fn start_caches_on_local_join(&self) -> Result<(), ExchangeError>;
}

pub mod memory {
    //! In-process stand-ins for tests and the demo CLI. Not a
    //! production persistence/affinity layer: no real WAL, no real
    //! partition function, just enough bookkeeping to drive the state
    //! machine end to end.

    use std::collections::HashMap;
    use std::sync::RwLock;

    use super::*;

    #[derive(Default)]
    pub struct InMemoryDiscovery {
        servers: RwLock<Vec<ClusterNode>>,
    }

    impl InMemoryDiscovery {
        pub fn new(servers: Vec<ClusterNode>) -> Self {
            Self { servers: RwLock::new(servers) }
        }

        pub fn add_server(&self, node: ClusterNode) {
            self.servers.write().unwrap().push(node);
        }

        pub fn remove_server(&self, node: NodeId) {
            self.servers.write().unwrap().retain(|n| n.id != node);
        }
    }

    impl Discovery for InMemoryDiscovery {
        fn alive(&self, node: NodeId) -> bool {
            self.servers.read().unwrap().iter().any(|n| n.id == node)
        }

        fn server_nodes(&self) -> Vec<ClusterNode> {
            let mut nodes = self.servers.read().unwrap().clone();
            nodes.sort();
            nodes
        }
    }

    /// Round-robin ideal assignment: partition `p`'s primary is
    /// `servers[p % servers.len()]`, backups are the next two in order.
    /// Enough to exercise merge/affinity-diff plumbing without needing a
    /// real rendezvous-hashing affinity function.
    #[derive(Default)]
    pub struct RoundRobinAffinity {
        centralized_on_leave: RwLock<HashMap<(GroupId, NodeId), bool>>,
    }

    impl RoundRobinAffinity {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_centralized_on_leave(&self, group: GroupId, node: NodeId, centralized: bool) {
            self.centralized_on_leave.write().unwrap().insert((group, node), centralized);
        }
    }

    impl Affinity for RoundRobinAffinity {
        fn on_server_left(&self, group: GroupId, node: NodeId) -> bool {
            self.centralized_on_leave.read().unwrap().get(&(group, node)).copied().unwrap_or(false)
        }

        fn ideal_assignment(
            &self,
            _group: GroupId,
            partitions: &[PartitionId],
            servers: &[ClusterNode],
        ) -> HashMap<PartitionId, Vec<NodeId>> {
            if servers.is_empty() {
                return HashMap::new();
            }
            let mut sorted = servers.to_vec();
            sorted.sort();
            partitions
                .iter()
                .map(|&p| {
                    let primary = (p as usize) % sorted.len();
                    let backup = (primary + 1) % sorted.len();
                    let owners = if sorted.len() > 1 {
                        vec![sorted[primary].id, sorted[backup].id]
                    } else {
                        vec![sorted[primary].id]
                    };
                    (p, owners)
                })
                .collect()
        }
    }

    #[derive(Default)]
    pub struct InMemoryPersistence {
        history: RwLock<HashMap<GroupId, HashMap<PartitionId, u64>>>,
    }

    impl InMemoryPersistence {
        pub fn new(history: HashMap<GroupId, HashMap<PartitionId, u64>>) -> Self {
            Self { history: RwLock::new(history) }
        }
    }

    #[async_trait]
    impl Persistence for InMemoryPersistence {
        async fn reserve_history_for_exchange(&self) -> HashMap<GroupId, HashMap<PartitionId, u64>> {
            self.history.read().unwrap().clone()
        }

        fn reserve_history_for_preloading(&self, group: GroupId, part: PartitionId, _counter: u64) -> bool {
            self.history.read().unwrap().get(&group).is_some_and(|g| g.contains_key(&part))
        }

        async fn flush_write_behind(&self) -> Result<(), ExchangeError> {
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct InMemoryCacheLifecycle;

    #[async_trait]
    impl CacheLifecycle for InMemoryCacheLifecycle {
        async fn start_received_caches(&self, _groups: &[GroupId]) -> Result<(), ExchangeError> {
            Ok(())
        }

        async fn start_caches_on_local_join(&self) -> Result<(), ExchangeError> {
            Ok(())
        }
    }
}
