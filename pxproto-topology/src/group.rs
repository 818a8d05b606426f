//! Per-group topology collaborator (§6: "Per-group topology (consumed)").
//!
//! One `GroupTopology` tracks a single cache group's partition-to-owner
//! map and update counters across exchanges. The coordinator state
//! machine in `pxproto-exchange` owns one of these per group and calls
//! into it during the topology-update and decide steps; it never
//! reaches into the map fields directly, driven entirely through
//! methods.

use std::collections::{HashMap, HashSet};

use pxproto_core::{GroupId, NodeId, PartitionId, PartitionState, TopologyVersion, UpdateCounter};
use tracing::{debug, warn};

use crate::reconcile::PartitionDecision;

/// Tracks one cache group's partition ownership, counters, and lost set
/// across topology versions.
#[derive(Debug, Clone)]
pub struct GroupTopology {
    group: GroupId,
    topology_version: TopologyVersion,
    owners: HashMap<PartitionId, Vec<NodeId>>,
    update_counters: HashMap<PartitionId, UpdateCounter>,
    /// What each remote node last reported owning, used to answer
    /// `partition_state` queries about peers.
    reported: HashMap<(NodeId, PartitionId), PartitionState>,
    lost: HashSet<PartitionId>,
}

impl GroupTopology {
    pub fn new(group: GroupId) -> Self {
        Self {
            group,
            topology_version: TopologyVersion::ZERO,
            owners: HashMap::new(),
            update_counters: HashMap::new(),
            reported: HashMap::new(),
            lost: HashSet::new(),
        }
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn topology_version(&self) -> TopologyVersion {
        self.topology_version
    }

    /// §4.2: bump the group's topology version ahead of an exchange.
    /// `centralized` mirrors the `beforeExchange(this, updateAffinity)`
    /// hook's affinity-recompute flag; this layer doesn't own the
    /// affinity function so it only records the intent via logging.
    pub fn before_exchange(&mut self, version: TopologyVersion, centralized: bool) {
        debug!(group = self.group, %version, centralized, "topology before_exchange");
        self.topology_version = version;
    }

    /// Record one node's reported per-partition update counters.
    pub fn apply_update_counters(&mut self, node: NodeId, counters: HashMap<PartitionId, UpdateCounter>) {
        for (part, counter) in counters {
            self.update_counters.insert(part, counter);
            debug!(group = self.group, %node, part, applied = counter.applied, "update counter applied");
        }
    }

    /// Record a node's reported state for one partition, so later
    /// queries (and the next exchange's reconciler) can see it.
    pub fn record_report(&mut self, node: NodeId, part: PartitionId, state: PartitionState) {
        self.reported.insert((node, part), state);
    }

    /// `partitionState(nodeId, partId)` — last reported state, or
    /// `NotApplicable` if never reported.
    pub fn partition_state(&self, node: NodeId, part: PartitionId) -> PartitionState {
        self.reported.get(&(node, part)).copied().unwrap_or(PartitionState::NotApplicable)
    }

    /// `currentLocalPartitions()` — partitions this group currently
    /// tracks any ownership information for.
    pub fn current_local_partitions(&self) -> Vec<PartitionId> {
        let mut parts: Vec<PartitionId> = self.owners.keys().copied().collect();
        parts.sort_unstable();
        parts
    }

    /// `setOwners(part, owners, haveHistory, isLastEntry)` — apply the
    /// decide step's reconciliation result for one partition (§4.5.3).
    /// Clears `LOST` on the partition if it now has an owner.
    pub fn set_owners(&mut self, part: PartitionId, decision: &PartitionDecision) {
        if decision.is_lost() {
            self.owners.remove(&part);
        } else {
            self.owners.insert(part, decision.owners.clone());
            self.lost.remove(&part);
        }
    }

    pub fn owners(&self, part: PartitionId) -> &[NodeId] {
        self.owners.get(&part).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `detectLostPartitions(topVer, evt)` — mark every partition with
    /// no owners as `LOST` (§4.5.4). Returns whether any new partition
    /// was marked, so the caller knows to schedule a resend.
    pub fn detect_lost_partitions(&mut self, all_partitions: &[PartitionId]) -> bool {
        let mut newly_lost = false;
        for &part in all_partitions {
            let has_owner = self.owners.get(&part).is_some_and(|o| !o.is_empty());
            if !has_owner && self.lost.insert(part) {
                newly_lost = true;
                warn!(group = self.group, part, "partition has no surviving owner, marking LOST");
            }
        }
        newly_lost
    }

    /// `resetLostPartitions(ver)` — operator-triggered clear of the
    /// `LOST` marker; ownership must be re-established by a later
    /// exchange.
    pub fn reset_lost_partitions(&mut self) {
        if !self.lost.is_empty() {
            debug!(group = self.group, count = self.lost.len(), "resetting lost partitions");
        }
        self.lost.clear();
    }

    pub fn lost_partitions(&self) -> &HashSet<PartitionId> {
        &self.lost
    }

    /// `onExchangeDone(aff, shouldReset)` — end-of-exchange hook; when
    /// `should_reset` the lost set is cleared (mirrors an operator
    /// reset bundled into the same exchange).
    pub fn on_exchange_done(&mut self, should_reset: bool) {
        if should_reset {
            self.reset_lost_partitions();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_owners_clears_lost_when_owner_present() {
        let mut topo = GroupTopology::new(1);
        topo.lost.insert(5);
        let decision = PartitionDecision { owners: vec![NodeId::new()], ..Default::default() };
        topo.set_owners(5, &decision);
        assert!(!topo.lost_partitions().contains(&5));
    }

    #[test]
    fn detect_lost_partitions_flags_ownerless() {
        let mut topo = GroupTopology::new(1);
        let decision = PartitionDecision::default();
        topo.set_owners(7, &decision);
        let changed = topo.detect_lost_partitions(&[7]);
        assert!(changed);
        assert!(topo.lost_partitions().contains(&7));
    }

    #[test]
    fn detect_lost_partitions_is_idempotent() {
        let mut topo = GroupTopology::new(1);
        topo.detect_lost_partitions(&[3]);
        let changed_again = topo.detect_lost_partitions(&[3]);
        assert!(!changed_again);
    }

    #[test]
    fn reset_lost_partitions_clears_all() {
        let mut topo = GroupTopology::new(1);
        topo.detect_lost_partitions(&[1, 2]);
        topo.reset_lost_partitions();
        assert!(topo.lost_partitions().is_empty());
    }

    #[test]
    fn partition_state_defaults_to_not_applicable() {
        let topo = GroupTopology::new(1);
        assert_eq!(topo.partition_state(NodeId::new(), 9), PartitionState::NotApplicable);
    }
}
