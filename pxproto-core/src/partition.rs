//! Partition-level state shared across the topology and exchange crates.

use serde::{Deserialize, Serialize};

/// Partition id within a cache group.
pub type PartitionId = u32;

/// Cache group id.
pub type GroupId = u32;

/// The state a node reports for one partition, per the per-group topology
/// collaborator's `partitionState(nodeId, partId)` interface (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionState {
    /// This node owns the partition and serves reads/writes for it.
    Owning,
    /// The partition is being rebalanced onto this node.
    Moving,
    /// The partition is being evicted from this node.
    Renting,
    /// No surviving owner; reads/writes fail until reset (§4.5.4).
    Lost,
    /// The partition has finished leaving this node.
    Evicted,
    /// This node has no knowledge of the partition.
    NotApplicable,
}

impl PartitionState {
    /// Whether a node in this state counts as an owner contribution to
    /// the counter reconciler (§4.5.1): `OWNING` and `MOVING` both count
    /// towards `minCntr`, but only `OWNING` counts towards `maxCntr`.
    pub fn counts_towards_min(self) -> bool {
        matches!(self, PartitionState::Owning | PartitionState::Moving)
    }

    pub fn counts_towards_max(self) -> bool {
        matches!(self, PartitionState::Owning)
    }
}

/// An update counter pair: the counter at the start of the current
/// topology version (`initial`) and the counter as of the last applied
/// update (`applied`). Single-messages carry this per `(group, partition)`
/// (§6, `partitionUpdateCounters`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateCounter {
    pub initial: u64,
    pub applied: u64,
}

impl UpdateCounter {
    pub fn new(initial: u64, applied: u64) -> Self {
        Self { initial, applied }
    }
}
