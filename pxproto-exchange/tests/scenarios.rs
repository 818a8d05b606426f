//! End-to-end exercises of the §8 scenarios against a simulated cluster.
//! Scenario 3 (counter reconciliation) is covered at the unit level in
//! `pxproto-topology::reconcile`'s tests; everything else runs here
//! through the real `ExchangeManager`.

use std::collections::HashMap;

use pxproto_core::{ExchangeConfig, GroupId, PartitionId, PartitionState};
use pxproto_exchange::ExchangeManager;

const GROUP: GroupId = 0;
const PARTITION_COUNT: u32 = 4;

fn manager() -> ExchangeManager {
    let groups = vec![GROUP];
    let partitions: HashMap<GroupId, Vec<PartitionId>> = groups
        .iter()
        .map(|&g| (g, (0..PARTITION_COUNT).collect()))
        .collect();
    ExchangeManager::new(ExchangeConfig::default(), groups, partitions)
}

/// Scenario 1: a server joins an already-running cluster.
#[tokio::test]
async fn single_join_completes_and_advances_topology() {
    let mut mgr = manager();
    let a = mgr.bootstrap_server();
    let before = mgr.topology_version();

    let (c, version) = mgr.join_server().await;

    assert!(version > before);
    assert_eq!(mgr.topology_version(), version);
    assert_eq!(mgr.node_count(), 2);
    // The existing server still owns every partition; the joiner hasn't
    // picked up ownership yet (it reported MOVING, not OWNING, so it
    // doesn't qualify for the zero-counter fresh-cluster tie-break).
    for part in 0..PARTITION_COUNT {
        assert_eq!(mgr.local_partition_state(a, GROUP, part), PartitionState::Owning);
        assert_eq!(mgr.local_partition_state(c, GROUP, part), PartitionState::NotApplicable);
    }
}

/// A server leaves a running cluster; survivors keep ownership.
#[tokio::test]
async fn leave_advances_topology_and_keeps_survivor_ownership() {
    let mut mgr = manager();
    let a = mgr.bootstrap_server();
    let b = mgr.bootstrap_server();

    let version = mgr.leave_server(a).await;

    assert_eq!(mgr.topology_version(), version);
    assert_eq!(mgr.node_count(), 1);
    for part in 0..PARTITION_COUNT {
        assert_eq!(mgr.local_partition_state(b, GROUP, part), PartitionState::Owning);
    }
}

/// Scenario 5: a client joins; no exchange round runs, topology is
/// untouched.
#[tokio::test]
async fn client_join_runs_no_exchange_round() {
    let mut mgr = manager();
    mgr.bootstrap_server();
    let before = mgr.topology_version();

    let client = mgr.client_join();

    assert_eq!(mgr.topology_version(), before);
    assert_eq!(mgr.node_count(), 2);
    assert_eq!(mgr.local_partition_state(client, GROUP, 0), PartitionState::NotApplicable);
}

/// Scenario 2: a server joins and the coordinator dies before the round
/// finishes; the next-lowest-ordered survivor completes it via failover.
#[tokio::test]
async fn coordinator_failure_mid_join_completes_via_restore_state() {
    let mut mgr = manager();
    let crd = mgr.bootstrap_server();
    mgr.bootstrap_server();

    let (joined, version) = mgr.join_then_coordinator_fails(crd).await;

    assert_eq!(mgr.node_count(), 2);
    assert_eq!(mgr.topology_version(), version);
    assert_ne!(mgr.current_coordinator(), Some(crd));

    let summary = mgr.history().last().expect("a finished exchange should be recorded");
    assert_eq!(summary.result_topology_version, version);
    assert_ne!(summary.coordinator, crd);
    assert_ne!(mgr.local_partition_state(joined, GROUP, 0), PartitionState::Lost);
}

/// Scenario 6: two overlapping joins get folded into one round instead
/// of running twice.
#[tokio::test]
async fn overlapping_joins_merge_into_one_round() {
    let mut mgr = manager();
    mgr.bootstrap_server();

    let (b, c, version) = mgr.merged_joins().await;

    assert_eq!(mgr.node_count(), 3);
    assert_eq!(mgr.topology_version(), version);
    assert_ne!(b, c);
    let summary = mgr.history().last().expect("merged round should be recorded");
    assert_eq!(summary.result_topology_version, version);
}

/// Scenario 4: a partition with no surviving owner is marked LOST.
#[tokio::test]
async fn partition_with_no_surviving_owner_is_lost() {
    let mut mgr = manager();
    let a = mgr.bootstrap_server();
    let b = mgr.bootstrap_server();
    let (c, _) = mgr.join_server().await;

    mgr.leave_server(a).await;
    mgr.leave_server(b).await;

    assert_eq!(mgr.node_count(), 1);
    for part in 0..PARTITION_COUNT {
        assert_eq!(mgr.local_partition_state(c, GROUP, part), PartitionState::Lost);
    }
    assert_eq!(mgr.group_topology_lost(c, GROUP).len(), PARTITION_COUNT as usize);
}
