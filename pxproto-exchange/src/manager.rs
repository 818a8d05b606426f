//! `ExchangeManager` — orchestrates exchanges across a simulated
//! cluster (§11.5 supplement).
//!
//! Production deployments have no single process that can see every
//! node's state; this manager exists for tests and the demo CLI, where
//! one process hosts every node's runtime and drives message delivery
//! synchronously through the real `Transport`/wire-message types so the
//! state machine in `exchange` is exercised the same way a real node
//! would exercise it. Structured like a top-level node orchestrator,
//! scaled down from "one node's subsystems" to "one simulated cluster's
//! nodes".

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use pxproto_core::{
    ClusterNode, EventKind, ExchangeConfig, ExchangeId, ExchangeType, GroupId, NodeId, NodeOrder,
    PartitionId, PartitionState, TopologyVersion, UpdateCounter,
};
use pxproto_network::{
    FullMessage, FullPartitionMap, GroupPartitionMap, HistoryRange, HistorySupplierKey, InMemoryTransport,
    SingleMessage,
};
use pxproto_topology::{reconcile_partition, GroupTopology, PartitionReport};
use tokio::sync::mpsc;
use tracing::debug;

use crate::collaborators::memory::{InMemoryCacheLifecycle, InMemoryPersistence};
use crate::collaborators::{CacheLifecycle, Persistence};
use crate::event::{classify, needs_quiesce, InitialEvent};
use crate::exchange::Exchange;
use crate::history::{ExchangeHistory, FinishedExchangeSummary};
use crate::quiesce::quiesce;
use crate::state::ExchangeState;

struct NodeRuntime {
    cluster_node: ClusterNode,
    #[allow(dead_code)]
    inbox: mpsc::UnboundedReceiver<pxproto_network::ExchangeWireMessage>,
    topologies: HashMap<GroupId, GroupTopology>,
    local_states: HashMap<(GroupId, PartitionId), PartitionState>,
    local_counters: HashMap<(GroupId, PartitionId), u64>,
    persistence: Arc<dyn Persistence>,
    #[allow(dead_code)]
    cache_lifecycle: Arc<dyn CacheLifecycle>,
}

/// Drives exchanges across every node of a simulated cluster.
pub struct ExchangeManager {
    transport: Arc<InMemoryTransport>,
    nodes: HashMap<NodeId, NodeRuntime>,
    groups: Vec<GroupId>,
    partitions: HashMap<GroupId, Vec<PartitionId>>,
    config: ExchangeConfig,
    history: ExchangeHistory,
    topology_version: TopologyVersion,
    next_order: NodeOrder,
}

impl ExchangeManager {
    pub fn new(config: ExchangeConfig, groups: Vec<GroupId>, partitions: HashMap<GroupId, Vec<PartitionId>>) -> Self {
        Self {
            transport: Arc::new(InMemoryTransport::new()),
            nodes: HashMap::new(),
            groups,
            partitions,
            config,
            history: ExchangeHistory::new(16),
            topology_version: TopologyVersion::ZERO,
            next_order: 1,
        }
    }

    pub fn topology_version(&self) -> TopologyVersion {
        self.topology_version
    }

    pub fn history(&self) -> &ExchangeHistory {
        &self.history
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn local_partition_state(&self, node: NodeId, group: GroupId, part: PartitionId) -> PartitionState {
        self.nodes
            .get(&node)
            .and_then(|n| n.local_states.get(&(group, part)))
            .copied()
            .unwrap_or(PartitionState::NotApplicable)
    }

    pub fn group_topology_lost(&self, node: NodeId, group: GroupId) -> HashSet<PartitionId> {
        self.nodes
            .get(&node)
            .and_then(|n| n.topologies.get(&group))
            .map(|t| t.lost_partitions().clone())
            .unwrap_or_default()
    }

    /// The current lowest-ordered surviving server, i.e. whichever node
    /// would act as coordinator for the next exchange.
    pub fn current_coordinator(&self) -> Option<NodeId> {
        self.server_nodes().first().map(|n| n.id)
    }

    fn server_nodes(&self) -> Vec<ClusterNode> {
        let mut servers: Vec<ClusterNode> =
            self.nodes.values().filter(|n| !n.cluster_node.is_client).map(|n| n.cluster_node).collect();
        servers.sort();
        servers
    }

    /// Register a server with full ownership of every configured
    /// partition at counter zero — used to seed the starting cluster
    /// before any join/leave scenario runs.
    pub fn bootstrap_server(&mut self) -> NodeId {
        let id = NodeId::new();
        let order = self.next_order;
        self.next_order += 1;
        let cluster_node = ClusterNode::new_server(id, order);
        self.register_node(id, cluster_node, PartitionState::Owning);
        id
    }

    fn seed_joining_server(&mut self, id: NodeId, cluster_node: ClusterNode) {
        self.register_node(id, cluster_node, PartitionState::Moving);
    }

    fn register_node(&mut self, id: NodeId, cluster_node: ClusterNode, initial_state: PartitionState) {
        let mut topologies = HashMap::new();
        let mut local_states = HashMap::new();
        let mut local_counters = HashMap::new();
        for &group in &self.groups {
            let mut topo = GroupTopology::new(group);
            for part in self.partitions.get(&group).cloned().unwrap_or_default() {
                local_states.insert((group, part), initial_state);
                local_counters.insert((group, part), 0u64);
                if initial_state == PartitionState::Owning {
                    topo.record_report(id, part, initial_state);
                }
            }
            topologies.insert(group, topo);
        }

        let inbox = self.transport.register(id);
        self.nodes.insert(
            id,
            NodeRuntime {
                cluster_node,
                inbox,
                topologies,
                local_states,
                local_counters,
                persistence: Arc::new(InMemoryPersistence::default()),
                cache_lifecycle: Arc::new(InMemoryCacheLifecycle),
            },
        );
    }

    fn build_single_message(&self, exch_id: ExchangeId, node_id: NodeId) -> SingleMessage {
        let node = self.nodes.get(&node_id).expect("node runtime must exist to build its single-message");
        let mut partitions = HashMap::new();
        let mut partition_update_counters = HashMap::new();

        for &group in &self.groups {
            let mut states = HashMap::new();
            let mut counters = HashMap::new();
            for part in self.partitions.get(&group).cloned().unwrap_or_default() {
                let state =
                    node.local_states.get(&(group, part)).copied().unwrap_or(PartitionState::NotApplicable);
                let counter = node.local_counters.get(&(group, part)).copied().unwrap_or(0);
                states.insert(part, state);
                counters.insert(part, UpdateCounter::new(counter, counter));
            }
            partitions.insert(group, GroupPartitionMap { states, update_counter: 0 });
            partition_update_counters.insert(group, counters);
        }

        let mut msg = SingleMessage::trivial(exch_id, node_id, node.cluster_node.is_client);
        msg.partitions = partitions;
        msg.partition_update_counters = partition_update_counters;
        msg
    }

    /// §4.5: reconcile every group's partitions using the coordinator's
    /// own local view plus everything in `crd_exchange.msgs`, and apply
    /// the result into the coordinator's topologies (§4.5.3-4).
    fn decide(&mut self, crd_exchange: &mut Exchange, crd: NodeId, topology_version: TopologyVersion) -> FullMessage {
        let mut full =
            FullMessage { result_topology_version: Some(topology_version), ..FullMessage::default() };

        for &group in &self.groups.clone() {
            let parts = self.partitions.get(&group).cloned().unwrap_or_default();
            let mut full_map = FullPartitionMap::default();
            let mut counters_map = HashMap::new();

            for &part in &parts {
                let mut reports = Vec::new();
                if let Some(node) = self.nodes.get(&crd) {
                    let state =
                        node.local_states.get(&(group, part)).copied().unwrap_or(PartitionState::NotApplicable);
                    let counter = node.local_counters.get(&(group, part)).copied().unwrap_or(0);
                    reports.push(PartitionReport { node: crd, state, applied_counter: counter, history_counter: None });
                }
                for (&sender, msg) in &crd_exchange.msgs {
                    let Some(group_map) = msg.partitions.get(&group) else { continue };
                    let state = group_map.states.get(&part).copied().unwrap_or(PartitionState::NotApplicable);
                    let counter = msg
                        .partition_update_counters
                        .get(&group)
                        .and_then(|m| m.get(&part))
                        .map(|c| c.applied)
                        .unwrap_or(0);
                    reports.push(PartitionReport { node: sender, state, applied_counter: counter, history_counter: None });
                }

                let decision = reconcile_partition(&reports, crd);
                if let Some(topo) = self.nodes.get_mut(&crd).and_then(|n| n.topologies.get_mut(&group)) {
                    topo.set_owners(part, &decision);
                }

                full_map.owners.insert(part, decision.owners.clone());
                if decision.is_lost() {
                    full_map.lost.insert(part);
                }
                let max_counter = reports.iter().map(|r| r.applied_counter).max().unwrap_or(0);
                counters_map.insert(part, UpdateCounter::new(max_counter, max_counter));

                if let Some((supplier, from, to)) = decision.history_supplier {
                    full.partition_history_suppliers
                        .insert(HistorySupplierKey { node: supplier, group, partition: part }, HistoryRange { from, to });
                }
                for node in decision.needs_reload {
                    full.parts_to_reload.entry(node).or_default().entry(group).or_default().insert(part);
                }
            }

            if let Some(topo) = self.nodes.get_mut(&crd).and_then(|n| n.topologies.get_mut(&group)) {
                topo.detect_lost_partitions(&parts);
            }

            full.partitions.insert(group, full_map);
            full.update_counters.insert(group, counters_map);
        }

        full.last_version = crd_exchange.last_ver;
        full.errors_map = crd_exchange.change_global_state_exceptions.clone();
        full
    }

    fn apply_full_message_locally(&mut self, node_id: NodeId, full: &FullMessage) {
        let Some(node) = self.nodes.get_mut(&node_id) else { return };
        for (&group, full_map) in &full.partitions {
            for (&part, owners) in &full_map.owners {
                let state = if owners.contains(&node_id) {
                    PartitionState::Owning
                } else if full_map.lost.contains(&part) {
                    PartitionState::Lost
                } else {
                    PartitionState::NotApplicable
                };
                node.local_states.insert((group, part), state);
                if let Some(counter) = full.update_counters.get(&group).and_then(|m| m.get(&part)) {
                    node.local_counters.insert((group, part), counter.applied);
                }
            }
        }
    }

    /// Run a full `ALL`-type exchange round for `event` to completion
    /// on every surviving server (§4.1-§4.7).
    async fn run_all_exchange(&mut self, event: InitialEvent, topology_version: TopologyVersion) -> TopologyVersion {
        let servers = self.server_nodes();
        let crd = servers.first().map(|n| n.id).expect("cluster must have at least one server");
        let exch_id = ExchangeId::new(topology_version, event.event_node, event.kind);
        let exchange_type = classify(&event, false);
        debug_assert_eq!(exchange_type, ExchangeType::All, "run_all_exchange is only for ALL-type events");

        let mut exchanges: HashMap<NodeId, Exchange> = HashMap::new();
        for server in &servers {
            let mut exchange = Exchange::new(exch_id, event.clone(), exchange_type, server.id, servers.clone(), crd);
            if needs_quiesce(exchange_type) {
                quiesce(async {}, &self.config, || (Vec::new(), Vec::new())).await;
                if let Some(node) = self.nodes.get(&server.id) {
                    let _ = node.persistence.flush_write_behind().await;
                }
            }
            exchanges.insert(server.id, exchange);
        }

        for server in &servers {
            if server.id == crd {
                continue;
            }
            let msg = self.build_single_message(exch_id, server.id);
            exchanges.get_mut(&crd).expect("coordinator exchange exists").receive_single_message(msg);
        }

        let crd_exchange = exchanges.get_mut(&crd).expect("coordinator exchange exists");
        assert!(crd_exchange.ready_to_decide(), "coordinator must have every single-message before deciding");
        let full_message = self.decide(crd_exchange, crd, topology_version);

        for server in &servers {
            let exchange = exchanges.get_mut(&server.id).expect("exchange exists for every server");
            if server.id == crd {
                exchange.finish(topology_version, full_message.clone());
            } else {
                exchange.receive_full_message(crd, full_message.clone());
            }
            self.apply_full_message_locally(server.id, &full_message);
        }

        self.history.record(FinishedExchangeSummary {
            coordinator: crd,
            result_topology_version: topology_version,
            had_lost_partitions: full_message.partitions.values().any(|p| !p.lost.is_empty()),
        });

        topology_version
    }

    /// §8 scenario 1: a server joins and a full exchange round runs.
    pub async fn join_server(&mut self) -> (NodeId, TopologyVersion) {
        let id = NodeId::new();
        let order = self.next_order;
        self.next_order += 1;
        self.seed_joining_server(id, ClusterNode::new_server(id, order));

        let event = InitialEvent::server_joined(id, true);
        let topology_version = self.topology_version.next_major();
        self.topology_version = topology_version;
        let result = self.run_all_exchange(event, topology_version).await;
        (id, result)
    }

    /// A server leaves normally (no coordinator failover involved).
    pub async fn leave_server(&mut self, node: NodeId) -> TopologyVersion {
        self.nodes.remove(&node);
        let event = InitialEvent::server_left(node);
        let topology_version = self.topology_version.next_major();
        self.topology_version = topology_version;
        self.run_all_exchange(event, topology_version).await
    }

    /// §4.10, §8 scenario 5: a client joins. Servers classify this as
    /// `NONE` (§4.1) — no single-message, no quiesce, immediate
    /// completion at the current version.
    pub fn client_join(&mut self) -> NodeId {
        let id = NodeId::new();
        let order = self.next_order;
        self.next_order += 1;
        let cluster_node = ClusterNode::new_client(id, order);
        let inbox = self.transport.register(id);
        self.nodes.insert(
            id,
            NodeRuntime {
                cluster_node,
                inbox,
                topologies: HashMap::new(),
                local_states: HashMap::new(),
                local_counters: HashMap::new(),
                persistence: Arc::new(InMemoryPersistence::default()),
                cache_lifecycle: Arc::new(InMemoryCacheLifecycle),
            },
        );
        id
    }

    /// §4.8, §8 scenario 2: a new server joins, and the coordinator
    /// dies before the round finishes. The next-lowest-ordered survivor
    /// takes over via the restore-state flow rather than a re-election.
    pub async fn join_then_coordinator_fails(&mut self, failing_crd: NodeId) -> (NodeId, TopologyVersion) {
        let servers_before = self.server_nodes();
        let crd = servers_before.first().map(|n| n.id).expect("cluster must have a coordinator");
        assert_eq!(crd, failing_crd, "this scenario requires the current coordinator to be the one that fails");

        let new_id = NodeId::new();
        let new_order = self.next_order;
        self.next_order += 1;
        self.seed_joining_server(new_id, ClusterNode::new_server(new_id, new_order));

        let join_version = self.topology_version.next_major();
        let join_event = InitialEvent::server_joined(new_id, true);
        let join_exch_id = ExchangeId::new(join_version, join_event.event_node, join_event.kind);
        let join_servers = self.server_nodes();

        let mut exchanges: HashMap<NodeId, Exchange> = join_servers
            .iter()
            .map(|s| (s.id, Exchange::new(join_exch_id, join_event.clone(), ExchangeType::All, s.id, join_servers.clone(), crd)))
            .collect();

        for server in &join_servers {
            if server.id == crd {
                continue;
            }
            let msg = self.build_single_message(join_exch_id, server.id);
            exchanges.get_mut(&crd).expect("coordinator exchange exists").receive_single_message(msg);
        }

        // A dies before running decide; its in-flight exchange is gone.
        exchanges.remove(&crd);
        self.nodes.remove(&crd);

        let survivors = self.server_nodes();
        let fail_version = join_version.next_major();
        self.topology_version = fail_version;
        let new_crd = survivors.first().map(|n| n.id).expect("at least one survivor remains");

        let mut restore_exchanges: HashMap<NodeId, Exchange> = HashMap::new();
        for server in &survivors {
            let exch_id = ExchangeId::new(fail_version, new_id, EventKind::ServerFailed);
            let mut exchange =
                Exchange::new(exch_id, InitialEvent::server_failed(crd), ExchangeType::All, server.id, survivors.clone(), crd);
            if server.id == new_crd {
                exchange.become_coordinator(&survivors);
            }
            restore_exchanges.insert(server.id, exchange);
        }

        for server in &survivors {
            if server.id == new_crd {
                continue;
            }
            let msg = self.build_single_message(restore_exchanges[&new_crd].exch_id, server.id);
            restore_exchanges.get_mut(&new_crd).expect("new coordinator exchange exists").receive_single_message(msg);
        }

        let new_crd_exchange = restore_exchanges.get_mut(&new_crd).expect("new coordinator exchange exists");
        new_crd_exchange.complete_failover(None);
        assert!(new_crd_exchange.ready_to_decide());
        let full_message = self.decide(new_crd_exchange, new_crd, fail_version);

        for server in &survivors {
            let exchange = restore_exchanges.get_mut(&server.id).expect("exchange exists for every survivor");
            if server.id == new_crd {
                exchange.finish(fail_version, full_message.clone());
            } else {
                exchange.receive_full_message(new_crd, full_message.clone());
            }
            self.apply_full_message_locally(server.id, &full_message);
        }

        self.history.record(FinishedExchangeSummary {
            coordinator: new_crd,
            result_topology_version: fail_version,
            had_lost_partitions: full_message.partitions.values().any(|p| !p.lost.is_empty()),
        });

        (new_id, fail_version)
    }

    /// §4.9, §8 scenario 6: two join events overlap, so the first
    /// exchange is folded into the second rather than running twice.
    pub async fn merged_joins(&mut self) -> (NodeId, NodeId, TopologyVersion) {
        let b_id = NodeId::new();
        let b_order = self.next_order;
        self.next_order += 1;
        self.seed_joining_server(b_id, ClusterNode::new_server(b_id, b_order));

        let e1_version = self.topology_version.next_major();
        let e1_event = InitialEvent::server_joined(b_id, true);
        let e1_id = ExchangeId::new(e1_version, e1_event.event_node, e1_event.kind);
        let servers_at_e1 = self.server_nodes();
        let crd = servers_at_e1.first().map(|n| n.id).expect("cluster must have a coordinator");
        let mut e1 = Exchange::new(e1_id, e1_event, ExchangeType::All, crd, servers_at_e1.clone(), crd);

        let b_msg = self.build_single_message(e1_id, b_id);
        e1.receive_single_message(b_msg.clone());

        let c_id = NodeId::new();
        let c_order = self.next_order;
        self.next_order += 1;
        self.seed_joining_server(c_id, ClusterNode::new_server(c_id, c_order));

        let e2_version = e1_version.next_major();
        self.topology_version = e2_version;
        let e2_event = InitialEvent::server_joined(c_id, true);
        let e2_id = ExchangeId::new(e2_version, e2_event.event_node, e2_event.kind);
        let servers_at_e2 = self.server_nodes();
        let mut e2 = Exchange::new(e2_id, e2_event, ExchangeType::All, crd, servers_at_e2.clone(), crd);

        e1.merge_into(e2_id);
        e2.await_merged_node(b_id, Some(b_msg));

        for server in &servers_at_e2 {
            if server.id == crd || server.id == b_id || server.id == c_id {
                continue;
            }
            let msg = self.build_single_message(e2_id, server.id);
            e2.receive_single_message(msg);
        }
        let c_msg = self.build_single_message(e2_id, c_id);
        e2.receive_single_message(c_msg);

        assert!(e2.ready_to_decide());
        let full_message = self.decide(&mut e2, crd, e2_version);
        e2.finish(e2_version, full_message.clone());
        for server in &servers_at_e2 {
            self.apply_full_message_locally(server.id, &full_message);
        }

        debug_assert_eq!(e1.state, ExchangeState::Merged);
        debug!(version = %e2_version, "merged two overlapping join exchanges into one round");

        self.history.record(FinishedExchangeSummary {
            coordinator: crd,
            result_topology_version: e2_version,
            had_lost_partitions: full_message.partitions.values().any(|p| !p.lost.is_empty()),
        });

        (b_id, c_id, e2_version)
    }
}
