//! Ideal-vs-decided affinity diff (§4.5.6, §11.4 supplement).
//!
//! When a merge happened, the full-message attaches `idealAffinityDiff`
//! so a late joiner can reconstruct the difference between what the
//! affinity function would ideally assign and what decide actually
//! produced (decide is constrained by who has already reported
//! counters, the ideal assignment is not). Structured as a field-level
//! comparison in the style of a conflict-resolution diff, adapted from
//! document-field diffing to partition-owner-list diffing.

use std::collections::HashMap;

use pxproto_core::{NodeId, PartitionId};

/// For each partition whose decided owners differ from the ideal
/// assignment, the ideal owner list. Partitions where decide already
/// matches ideal are omitted, same as `find_conflicting_fields` only
/// returning fields that actually differ.
pub fn diff_ideal_vs_decided(
    ideal: &HashMap<PartitionId, Vec<NodeId>>,
    decided: &HashMap<PartitionId, Vec<NodeId>>,
) -> HashMap<PartitionId, Vec<NodeId>> {
    ideal
        .iter()
        .filter(|(part, ideal_owners)| decided.get(*part).map(|d| d != *ideal_owners).unwrap_or(true))
        .map(|(part, owners)| (*part, owners.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_assignments_produce_empty_diff() {
        let a = NodeId::new();
        let mut ideal = HashMap::new();
        ideal.insert(1u32, vec![a]);
        let decided = ideal.clone();

        assert!(diff_ideal_vs_decided(&ideal, &decided).is_empty());
    }

    #[test]
    fn mismatched_partition_surfaces_in_diff() {
        let a = NodeId::new();
        let b = NodeId::new();
        let mut ideal = HashMap::new();
        ideal.insert(1u32, vec![a]);
        let mut decided = HashMap::new();
        decided.insert(1u32, vec![b]);

        let diff = diff_ideal_vs_decided(&ideal, &decided);
        assert_eq!(diff.get(&1), Some(&vec![a]));
    }

    #[test]
    fn partition_missing_from_decided_surfaces_in_diff() {
        let a = NodeId::new();
        let mut ideal = HashMap::new();
        ideal.insert(2u32, vec![a]);
        let decided = HashMap::new();

        assert_eq!(diff_ideal_vs_decided(&ideal, &decided).len(), 1);
    }
}
