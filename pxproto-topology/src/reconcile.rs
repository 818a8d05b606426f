//! Counter reconciler: the decide-step core (§4.5 steps 1-3).
//!
//! Operates on one partition at a time, across every node's reported
//! view collected during the collect phase. The coordinator calls
//! `reconcile_partition` once per `(group, partition)` pair once every
//! single-message has arrived.

use pxproto_core::{NodeId, PartitionState};

/// One node's reported view of a single partition, as carried in its
/// single-message's `GroupPartitionMap` plus per-partition update
/// counter.
#[derive(Debug, Clone, Copy)]
pub struct PartitionReport {
    pub node: NodeId,
    pub state: PartitionState,
    pub applied_counter: u64,
    /// Historical (WAL-retained) counter the node can rebalance from,
    /// if it tracks one at all.
    pub history_counter: Option<u64>,
}

/// Outcome of reconciling one partition (§4.5.1-3).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionDecision {
    /// Nodes tying the maximum applied counter among `OWNING` reporters
    /// (tie-broken to all `OWNING` reporters when every counter is 0).
    pub owners: Vec<NodeId>,
    /// `(supplier, from, to)` — an owner that can serve the WAL range
    /// `[from, to)` to bring lagging nodes current, if one qualifies.
    pub history_supplier: Option<(NodeId, u64, u64)>,
    /// Nodes that reported this partition but are not owners and have
    /// no history supplier to catch up from: they need a full reload.
    pub needs_reload: Vec<NodeId>,
}

impl PartitionDecision {
    /// No surviving owner: the partition is `LOST` (§4.5.4).
    pub fn is_lost(&self) -> bool {
        self.owners.is_empty()
    }
}

/// Reconcile one partition's counters across all reporters.
///
/// `local_node` is preferred as history supplier when it qualifies,
/// matching "prefer the local node if it qualifies" in §4.5.2.
pub fn reconcile_partition(reports: &[PartitionReport], local_node: NodeId) -> PartitionDecision {
    if reports.is_empty() {
        return PartitionDecision::default();
    }

    let min_cntr = reports
        .iter()
        .filter(|r| r.state.counts_towards_min())
        .map(|r| r.applied_counter)
        .min();

    let max_cntr = reports
        .iter()
        .filter(|r| r.state.counts_towards_max())
        .map(|r| r.applied_counter)
        .max();

    let mut owners: Vec<NodeId> = match max_cntr {
        Some(max) => reports
            .iter()
            .filter(|r| r.state.counts_towards_max() && r.applied_counter == max)
            .map(|r| r.node)
            .collect(),
        None => Vec::new(),
    };

    // Fresh-cluster tie-break (§4.5.3): when the tying counter is 0,
    // every OWNING reporter counts even if the loop above already
    // covered it via counts_towards_max.
    if max_cntr == Some(0) {
        for r in reports {
            if r.state == PartitionState::Owning && !owners.contains(&r.node) {
                owners.push(r.node);
            }
        }
    }

    let history_supplier = min_cntr.and_then(|min| {
        let mut candidates: Vec<&PartitionReport> = reports
            .iter()
            .filter(|r| owners.contains(&r.node) && r.history_counter.is_some_and(|h| h <= min))
            .collect();
        candidates.sort_by_key(|r| r.node != local_node);
        candidates.first().map(|r| (r.node, r.history_counter.unwrap(), max_cntr.unwrap_or(min)))
    });

    let needs_reload = if history_supplier.is_some() {
        Vec::new()
    } else {
        reports.iter().filter(|r| !owners.contains(&r.node)).map(|r| r.node).collect()
    };

    PartitionDecision { owners, history_supplier, needs_reload }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(node: NodeId, state: PartitionState, cntr: u64, hist: Option<u64>) -> PartitionReport {
        PartitionReport { node, state, applied_counter: cntr, history_counter: hist }
    }

    #[test]
    fn owners_are_max_counter_owning_nodes() {
        let a = NodeId::new();
        let b = NodeId::new();
        let c = NodeId::new();
        let reports = vec![
            report(a, PartitionState::Owning, 100, None),
            report(b, PartitionState::Owning, 100, None),
            report(c, PartitionState::Moving, 80, None),
        ];

        let decision = reconcile_partition(&reports, a);
        assert_eq!(decision.owners.len(), 2);
        assert!(decision.owners.contains(&a));
        assert!(decision.owners.contains(&b));
    }

    #[test]
    fn history_supplier_covers_lagging_node() {
        let a = NodeId::new();
        let b = NodeId::new();
        let c = NodeId::new();
        let reports = vec![
            report(a, PartitionState::Owning, 100, Some(60)),
            report(b, PartitionState::Owning, 100, None),
            report(c, PartitionState::Moving, 80, None),
        ];

        let decision = reconcile_partition(&reports, b);
        assert_eq!(decision.history_supplier, Some((a, 60, 100)));
        assert!(decision.needs_reload.is_empty());
    }

    #[test]
    fn no_qualifying_history_forces_reload() {
        let a = NodeId::new();
        let b = NodeId::new();
        let c = NodeId::new();
        let reports = vec![
            report(a, PartitionState::Owning, 100, None),
            report(b, PartitionState::Owning, 100, None),
            report(c, PartitionState::Moving, 80, None),
        ];

        let decision = reconcile_partition(&reports, a);
        assert!(decision.history_supplier.is_none());
        assert_eq!(decision.needs_reload, vec![c]);
    }

    #[test]
    fn no_owning_reporter_is_lost() {
        let a = NodeId::new();
        let reports = vec![report(a, PartitionState::Renting, 10, None)];

        let decision = reconcile_partition(&reports, a);
        assert!(decision.is_lost());
    }

    #[test]
    fn fresh_cluster_zero_counter_ties_all_owning_nodes() {
        let a = NodeId::new();
        let b = NodeId::new();
        let reports =
            vec![report(a, PartitionState::Owning, 0, None), report(b, PartitionState::Owning, 0, None)];

        let decision = reconcile_partition(&reports, a);
        assert_eq!(decision.owners.len(), 2);
    }

    #[test]
    fn local_node_preferred_as_supplier() {
        let local = NodeId::new();
        let other = NodeId::new();
        let lagging = NodeId::new();
        let reports = vec![
            report(local, PartitionState::Owning, 100, Some(50)),
            report(other, PartitionState::Owning, 100, Some(40)),
            report(lagging, PartitionState::Moving, 70, None),
        ];

        let decision = reconcile_partition(&reports, local);
        assert_eq!(decision.history_supplier.unwrap().0, local);
    }
}
