//! Wire message shapes exchanged between exchange participants (§6).

use std::collections::{HashMap, HashSet};

use pxproto_core::{ExchangeId, GroupId, NodeId, PartitionId, PartitionState, TopologyVersion, UpdateCounter};
use serde::{Deserialize, Serialize};

/// One sender's view of a single cache group's partitions, as carried in
/// a single-message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupPartitionMap {
    pub states: HashMap<PartitionId, PartitionState>,
    pub update_counter: u64,
}

/// Message every non-coordinator server (and every client) sends to the
/// coordinator during the collect phase (§4.4, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleMessage {
    pub exch_id: ExchangeId,
    pub sender: NodeId,
    pub client: bool,
    pub partitions: HashMap<GroupId, GroupPartitionMap>,
    pub partition_update_counters: HashMap<GroupId, HashMap<PartitionId, UpdateCounter>>,
    pub partition_history_counters: Option<HashMap<GroupId, HashMap<PartitionId, u64>>>,
    pub last_version: u64,
    pub error: Option<String>,
    pub cache_groups_affinity_request: Option<Vec<GroupId>>,
    pub restore_state: bool,
    pub restore_exchange_id: Option<ExchangeId>,
    /// Set only on the synthetic reply the coordinator fabricates for a
    /// late sender after `DONE` (§4.4): carries a copy of `finishState`.
    pub finish_message: Option<Box<FullMessage>>,
}

impl SingleMessage {
    /// A trivial message with no partition data, as sent by clients
    /// (§4.10) and in tests.
    pub fn trivial(exch_id: ExchangeId, sender: NodeId, client: bool) -> Self {
        Self {
            exch_id,
            sender,
            client,
            partitions: HashMap::new(),
            partition_update_counters: HashMap::new(),
            partition_history_counters: None,
            last_version: 0,
            error: None,
            cache_groups_affinity_request: None,
            restore_state: false,
            restore_exchange_id: None,
            finish_message: None,
        }
    }

    pub fn restore_state_reply(
        exch_id: ExchangeId,
        sender: NodeId,
        restore_exchange_id: ExchangeId,
        finish_message: Option<FullMessage>,
    ) -> Self {
        Self {
            restore_state: true,
            restore_exchange_id: Some(restore_exchange_id),
            finish_message: finish_message.map(Box::new),
            ..Self::trivial(exch_id, sender, false)
        }
    }
}

/// The full, decided partition map for one cache group, as produced by
/// the decide step (§4.5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FullPartitionMap {
    /// Ordered owner list per partition (first entry is the primary).
    pub owners: HashMap<PartitionId, Vec<NodeId>>,
    /// Partitions with no surviving owner (§4.5.4).
    pub lost: HashSet<PartitionId>,
}

/// A `(node, group, partition)` key identifying a history-supplier slot
/// (§4.5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistorySupplierKey {
    pub node: NodeId,
    pub group: GroupId,
    pub partition: PartitionId,
}

/// WAL range `[from, to)` a history supplier can serve for rebalance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRange {
    pub from: u64,
    pub to: u64,
}

/// Message the coordinator sends to every server (and, on request, to
/// clients) once the decide step completes (§4.5, §4.6, §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FullMessage {
    pub exch_id: Option<ExchangeId>,
    pub partitions: HashMap<GroupId, FullPartitionMap>,
    pub update_counters: HashMap<GroupId, HashMap<PartitionId, UpdateCounter>>,
    pub partition_history_suppliers: HashMap<HistorySupplierKey, HistoryRange>,
    pub parts_to_reload: HashMap<NodeId, HashMap<GroupId, HashSet<PartitionId>>>,
    pub last_version: u64,
    pub result_topology_version: Option<TopologyVersion>,
    /// Diff between the affinity function's ideal assignment and what
    /// was actually decided, attached only when a merge happened and a
    /// late joiner needs to reconstruct the difference (§4.5.6, §11.4).
    pub ideal_affinity_diff: Option<HashMap<GroupId, HashMap<PartitionId, Vec<NodeId>>>>,
    pub errors_map: HashMap<NodeId, String>,
    pub joined_node_affinity: Option<HashMap<GroupId, HashMap<PartitionId, Vec<NodeId>>>>,
}

impl FullMessage {
    /// Re-stamp a cached full-message's `exch_id` for a late requester,
    /// per the "finishState is read-only, replayed to late requesters"
    /// invariant in §3. Everything else (the decided assignment) is
    /// shared, matching "every node ... applies the same full-message".
    pub fn restamped_for(&self, exch_id: ExchangeId) -> Self {
        Self { exch_id: Some(exch_id), ..self.clone() }
    }
}

/// Probe a newly-elevated coordinator sends to every surviving server
/// during failover (§4.8, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleRequest {
    pub exch_id: ExchangeId,
    pub requester: NodeId,
    pub restore_state: bool,
    pub restore_exchange_id: Option<ExchangeId>,
}

/// The three message shapes the transport ever carries for this
/// protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExchangeWireMessage {
    Single(SingleMessage),
    Full(FullMessage),
    Request(SingleRequest),
}
