//! The per-exchange coordination state machine (§3, §4.4-§4.10).
//!
//! One `Exchange` is created per exchange event on every server node
//! and runs to completion on that topology version (§2). This module
//! holds only the data model and the pure state transitions; the
//! surrounding orchestration (who to send messages to, when to run the
//! quiesce wait) lives in `manager`.

use std::collections::{HashMap, HashSet};

use pxproto_core::{ClusterNode, ExchangeId, ExchangeType, NodeId, TopologyVersion};
use pxproto_network::{FullMessage, SingleMessage};
use tracing::{debug, warn};

use crate::event::InitialEvent;
use crate::state::ExchangeState;

/// The final, immutable outcome of a completed exchange (§3:
/// `finishState`). Replayed verbatim (modulo `exch_id` restamping) to
/// late single-message senders.
#[derive(Debug, Clone)]
pub struct FinishState {
    pub coordinator: NodeId,
    pub result_topology_version: TopologyVersion,
    pub full_message: FullMessage,
}

/// What handling an inbound single-message should cause the caller
/// (the node runtime) to do next.
#[derive(Debug)]
pub enum SingleMessageOutcome {
    /// Buffered; no action required yet.
    Buffered,
    /// Recorded; `remaining` still non-empty or merged slots still
    /// outstanding.
    Accepted,
    /// Every awaited message arrived: run the decide step.
    ReadyToDecide,
    /// The exchange was already `DONE`: reply with this message,
    /// already carrying a copy of `finishState`.
    Reply(Box<SingleMessage>),
}

/// What handling an inbound full-message should cause the caller to
/// do next.
#[derive(Debug)]
pub enum FullMessageOutcome {
    /// From a non-coordinator with a higher order than the currently
    /// known coordinator: buffered as a fallback for failover.
    Buffered,
    /// Applied: the exchange is now `DONE` with this topology version.
    Applied(TopologyVersion),
    /// Already done; nothing to do.
    Ignored,
}

/// One instance of the per-exchange coordination state machine (§3).
pub struct Exchange {
    pub exch_id: ExchangeId,
    pub initial_event: InitialEvent,
    pub exchange_type: ExchangeType,
    pub local_node: NodeId,
    /// Immutable snapshot of server membership at init; mutated only to
    /// drop nodes that fail mid-exchange (§3).
    pub srv_nodes: Vec<ClusterNode>,
    pub crd: NodeId,
    pub state: ExchangeState,
    pub remaining: HashSet<NodeId>,
    pub msgs: HashMap<NodeId, SingleMessage>,
    pub pending_single_msgs: HashMap<NodeId, SingleMessage>,
    pub full_msgs: HashMap<NodeId, FullMessage>,
    pub merged_join_exch_msgs: HashMap<NodeId, Option<SingleMessage>>,
    pub await_merged_msgs: usize,
    pub merged_with: Option<ExchangeId>,
    pub finish_state: Option<FinishState>,
    pub last_ver: u64,
    pub centralized_aff: bool,
    pub change_global_state_exceptions: HashMap<NodeId, String>,
}

impl Exchange {
    pub fn new(
        exch_id: ExchangeId,
        initial_event: InitialEvent,
        exchange_type: ExchangeType,
        local_node: NodeId,
        srv_nodes: Vec<ClusterNode>,
        crd: NodeId,
    ) -> Self {
        let state = if exchange_type == ExchangeType::Client {
            ExchangeState::Client
        } else if local_node == crd {
            ExchangeState::Crd
        } else {
            ExchangeState::Srv
        };

        let remaining = if state == ExchangeState::Crd {
            srv_nodes.iter().map(|n| n.id).filter(|&id| id != local_node).collect()
        } else {
            HashSet::new()
        };

        debug!(exch = %exch_id, %local_node, %state, "exchange initialized");

        Self {
            exch_id,
            initial_event,
            exchange_type,
            local_node,
            srv_nodes,
            crd,
            state,
            remaining,
            msgs: HashMap::new(),
            pending_single_msgs: HashMap::new(),
            full_msgs: HashMap::new(),
            merged_join_exch_msgs: HashMap::new(),
            await_merged_msgs: 0,
            merged_with: None,
            finish_state: None,
            last_ver: 0,
            centralized_aff: false,
            change_global_state_exceptions: HashMap::new(),
        }
    }

    pub fn is_coordinator(&self) -> bool {
        self.local_node == self.crd
    }

    fn node_order(&self, node: NodeId) -> Option<u64> {
        self.srv_nodes.iter().find(|n| n.id == node).map(|n| n.order)
    }

    /// §4.4: handle an inbound single-message at the coordinator (or at
    /// whatever non-coordinator state buffers it).
    pub fn receive_single_message(&mut self, msg: SingleMessage) -> SingleMessageOutcome {
        match self.state {
            ExchangeState::Done => {
                let finish = self.finish_state.as_ref().expect("DONE implies finish_state set");
                let reply = finish.full_message.restamped_for(msg.exch_id);
                let mut single = SingleMessage::trivial(msg.exch_id, self.local_node, msg.client);
                single.finish_message = Some(Box::new(reply));
                SingleMessageOutcome::Reply(Box::new(single))
            }
            ExchangeState::Srv | ExchangeState::BecomeCrd if !self.is_coordinator() => {
                self.pending_single_msgs.insert(msg.sender, msg);
                SingleMessageOutcome::Buffered
            }
            ExchangeState::Crd | ExchangeState::BecomeCrd => {
                if let Some(err) = &msg.error {
                    self.change_global_state_exceptions.insert(msg.sender, err.clone());
                }
                self.last_ver = self.last_ver.max(msg.last_version);

                if self.remaining.remove(&msg.sender) {
                    self.msgs.insert(msg.sender, msg);
                } else if let Some(slot) = self.merged_join_exch_msgs.get_mut(&msg.sender) {
                    if slot.is_none() {
                        *slot = Some(msg.clone());
                        self.await_merged_msgs = self.await_merged_msgs.saturating_sub(1);
                    }
                    self.msgs.insert(msg.sender, msg);
                } else {
                    debug!(sender = %msg.sender, "single-message from node not in remaining or merge slots, ignoring");
                    return SingleMessageOutcome::Accepted;
                }

                if self.remaining.is_empty() && self.await_merged_msgs == 0 {
                    SingleMessageOutcome::ReadyToDecide
                } else {
                    SingleMessageOutcome::Accepted
                }
            }
            _ => SingleMessageOutcome::Buffered,
        }
    }

    /// §4.4: a server departs mid-exchange. If it was still owed a
    /// single-message, it's dropped from `remaining` just like a
    /// received message would have removed it.
    pub fn on_node_left(&mut self, node: NodeId) {
        self.srv_nodes.retain(|n| n.id != node);
        self.remaining.remove(&node);
        if let Some(slot) = self.merged_join_exch_msgs.get_mut(&node) {
            if slot.is_none() {
                self.await_merged_msgs = self.await_merged_msgs.saturating_sub(1);
                self.merged_join_exch_msgs.remove(&node);
            }
        }
    }

    pub fn ready_to_decide(&self) -> bool {
        matches!(self.state, ExchangeState::Crd | ExchangeState::BecomeCrd)
            && self.remaining.is_empty()
            && self.await_merged_msgs == 0
    }

    /// §4.5 step 7: atomically set `finishState` and transition `DONE`.
    pub fn finish(&mut self, result_topology_version: TopologyVersion, full_message: FullMessage) {
        self.finish_state =
            Some(FinishState { coordinator: self.crd, result_topology_version, full_message });
        self.state = ExchangeState::Done;
        self.msgs.clear();
        self.pending_single_msgs.clear();
        self.change_global_state_exceptions.clear();
    }

    /// §4.7: apply an inbound full-message at a non-coordinator.
    pub fn receive_full_message(&mut self, from: NodeId, msg: FullMessage) -> FullMessageOutcome {
        if self.state == ExchangeState::Done {
            return FullMessageOutcome::Ignored;
        }

        if from != self.crd {
            let from_order = self.node_order(from).unwrap_or(u64::MAX);
            let crd_order = self.node_order(self.crd).unwrap_or(0);
            if from_order > crd_order {
                self.full_msgs.insert(from, msg);
                return FullMessageOutcome::Buffered;
            }
        }

        let result_version = msg.result_topology_version.unwrap_or(self.exch_id.topology_version);
        self.finish(result_version, msg);
        FullMessageOutcome::Applied(result_version)
    }

    /// §4.8 steps 1-3: flip to `BECOME_CRD` when the coordinator departs
    /// and this node is the next lowest-ordered survivor.
    pub fn become_coordinator(&mut self, new_crd_candidates: &[ClusterNode]) {
        self.state = ExchangeState::BecomeCrd;
        self.crd = self.local_node;
        self.remaining =
            new_crd_candidates.iter().map(|n| n.id).filter(|&id| id != self.local_node).collect();
        warn!(exch = %self.exch_id, "coordinator departed, this node is becoming coordinator");
    }

    /// §4.8 step 3: after restore-state replies arrive, either adopt a
    /// survivor's already-finished `finishState` or fall through to a
    /// normal decide step as `CRD`.
    pub fn complete_failover(&mut self, adopted: Option<FinishState>) {
        match adopted {
            Some(finish) => {
                self.finish_state = Some(finish);
                self.state = ExchangeState::Done;
            }
            None => {
                self.state = ExchangeState::Crd;
            }
        }
    }

    /// §4.9: fold this exchange into a later one.
    pub fn merge_into(&mut self, target: ExchangeId) {
        self.state = ExchangeState::Merged;
        self.merged_with = Some(target);
    }

    /// §4.9: register an expected merged-in message slot on the target
    /// exchange (this exchange, once it is the merge target).
    pub fn await_merged_node(&mut self, node: NodeId, pending: Option<SingleMessage>) {
        match pending {
            Some(msg) => {
                self.msgs.insert(node, msg.clone());
                self.merged_join_exch_msgs.insert(node, Some(msg));
            }
            None => {
                self.merged_join_exch_msgs.insert(node, None);
                self.await_merged_msgs += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pxproto_core::{EventKind, TopologyVersion};

    fn event() -> InitialEvent {
        InitialEvent::server_joined(NodeId::new(), false)
    }

    #[test]
    fn new_coordinator_has_full_remaining_set() {
        let a = NodeId::new();
        let b = NodeId::new();
        let c = NodeId::new();
        let srv = vec![
            ClusterNode::new_server(a, 1),
            ClusterNode::new_server(b, 2),
            ClusterNode::new_server(c, 3),
        ];
        let exch_id = ExchangeId::new(TopologyVersion::new(1, 0), a, EventKind::ServerJoined { local: false });
        let exch = Exchange::new(exch_id, event(), ExchangeType::All, a, srv, a);

        assert_eq!(exch.state, ExchangeState::Crd);
        assert_eq!(exch.remaining.len(), 2);
        assert!(exch.remaining.contains(&b));
        assert!(exch.remaining.contains(&c));
    }

    #[test]
    fn non_coordinator_starts_as_srv() {
        let a = NodeId::new();
        let b = NodeId::new();
        let srv = vec![ClusterNode::new_server(a, 1), ClusterNode::new_server(b, 2)];
        let exch_id = ExchangeId::new(TopologyVersion::new(1, 0), a, EventKind::ServerJoined { local: false });
        let exch = Exchange::new(exch_id, event(), ExchangeType::All, b, srv, a);

        assert_eq!(exch.state, ExchangeState::Srv);
        assert!(exch.remaining.is_empty());
    }

    #[test]
    fn single_message_shrinks_remaining_and_signals_decide() {
        let a = NodeId::new();
        let b = NodeId::new();
        let srv = vec![ClusterNode::new_server(a, 1), ClusterNode::new_server(b, 2)];
        let exch_id = ExchangeId::new(TopologyVersion::new(1, 0), a, EventKind::ServerJoined { local: false });
        let mut exch = Exchange::new(exch_id, event(), ExchangeType::All, a, srv, a);

        let msg = SingleMessage::trivial(exch_id, b, false);
        let outcome = exch.receive_single_message(msg);
        assert!(matches!(outcome, SingleMessageOutcome::ReadyToDecide));
        assert!(exch.remaining.is_empty());
    }

    #[test]
    fn late_single_message_after_done_gets_replayed_reply() {
        let a = NodeId::new();
        let b = NodeId::new();
        let srv = vec![ClusterNode::new_server(a, 1), ClusterNode::new_server(b, 2)];
        let exch_id = ExchangeId::new(TopologyVersion::new(1, 0), a, EventKind::ServerJoined { local: false });
        let mut exch = Exchange::new(exch_id, event(), ExchangeType::All, a, srv, a);
        exch.finish(TopologyVersion::new(1, 0), FullMessage::default());

        let msg = SingleMessage::trivial(exch_id, b, false);
        let outcome = exch.receive_single_message(msg);
        assert!(matches!(outcome, SingleMessageOutcome::Reply(_)));
    }

    #[test]
    fn node_departure_shrinks_remaining_without_a_message() {
        let a = NodeId::new();
        let b = NodeId::new();
        let c = NodeId::new();
        let srv = vec![
            ClusterNode::new_server(a, 1),
            ClusterNode::new_server(b, 2),
            ClusterNode::new_server(c, 3),
        ];
        let exch_id = ExchangeId::new(TopologyVersion::new(1, 0), a, EventKind::ServerJoined { local: false });
        let mut exch = Exchange::new(exch_id, event(), ExchangeType::All, a, srv, a);

        exch.on_node_left(b);
        assert!(!exch.remaining.contains(&b));
        assert!(!exch.ready_to_decide());

        exch.on_node_left(c);
        assert!(exch.ready_to_decide());
    }

    #[test]
    fn become_coordinator_sets_remaining_from_candidates() {
        let a = NodeId::new();
        let b = NodeId::new();
        let c = NodeId::new();
        let srv = vec![ClusterNode::new_server(b, 2), ClusterNode::new_server(c, 3)];
        let exch_id = ExchangeId::new(TopologyVersion::new(1, 0), a, EventKind::ServerJoined { local: false });
        let mut exch = Exchange::new(exch_id, event(), ExchangeType::All, b, srv.clone(), a);

        exch.become_coordinator(&srv);
        assert_eq!(exch.state, ExchangeState::BecomeCrd);
        assert_eq!(exch.crd, b);
        assert!(exch.remaining.contains(&c));
    }
}
