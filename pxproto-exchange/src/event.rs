//! Event classifier (§4.1).

use pxproto_core::{CustomMessageKind, EventKind, ExchangeType, NodeId};

/// The discovery event that triggers an exchange: `{eventNode, type,
/// customMessage?, topologySnapshot}` per §6, minus the snapshot (the
/// exchange driver attaches that separately as `discoSnapshot`).
#[derive(Debug, Clone)]
pub struct InitialEvent {
    pub event_node: NodeId,
    pub kind: EventKind,
}

impl InitialEvent {
    pub fn server_joined(event_node: NodeId, local: bool) -> Self {
        Self { event_node, kind: EventKind::ServerJoined { local } }
    }

    pub fn server_left(event_node: NodeId) -> Self {
        Self { event_node, kind: EventKind::ServerLeft }
    }

    pub fn server_failed(event_node: NodeId) -> Self {
        Self { event_node, kind: EventKind::ServerFailed }
    }

    pub fn client_joined(event_node: NodeId, local: bool) -> Self {
        Self { event_node, kind: EventKind::ClientJoined { local } }
    }

    pub fn client_left(event_node: NodeId, local: bool) -> Self {
        Self { event_node, kind: EventKind::ClientLeft { local } }
    }

    pub fn custom(event_node: NodeId, kind: CustomMessageKind) -> Self {
        Self { event_node, kind: EventKind::Custom(kind) }
    }

    /// Whether this is a server join that the classifying node itself
    /// performed, triggering per-group affinity init (§4.1).
    pub fn is_local_server_join(&self) -> bool {
        matches!(self.kind, EventKind::ServerJoined { local: true })
    }

    pub fn is_server_departure(&self) -> bool {
        matches!(self.kind, EventKind::ServerLeft | EventKind::ServerFailed)
    }
}

/// Classify the initial event into an `ExchangeType`, from the
/// perspective of the classifying node (`self_is_client` tells whether
/// that node is itself a client rather than a server, per §4.1's
/// custom-message rule).
pub fn classify(event: &InitialEvent, self_is_client: bool) -> ExchangeType {
    match event.kind {
        EventKind::ServerJoined { .. } | EventKind::ServerLeft | EventKind::ServerFailed => ExchangeType::All,
        EventKind::ClientJoined { local } | EventKind::ClientLeft { local } => {
            if local {
                ExchangeType::Client
            } else {
                ExchangeType::None
            }
        }
        EventKind::Custom(_) => {
            if self_is_client {
                ExchangeType::Client
            } else {
                ExchangeType::All
            }
        }
    }
}

/// Whether the quiesce phase runs for this exchange (§4.1: "only for
/// ALL").
pub fn needs_quiesce(exchange_type: ExchangeType) -> bool {
    matches!(exchange_type, ExchangeType::All)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_join_is_always_all() {
        let event = InitialEvent::server_joined(NodeId::new(), true);
        assert_eq!(classify(&event, false), ExchangeType::All);
        assert!(needs_quiesce(classify(&event, false)));
    }

    #[test]
    fn remote_client_event_is_none_for_servers() {
        let event = InitialEvent::client_joined(NodeId::new(), false);
        assert_eq!(classify(&event, false), ExchangeType::None);
    }

    #[test]
    fn local_client_event_is_client_type() {
        let event = InitialEvent::client_joined(NodeId::new(), true);
        assert_eq!(classify(&event, false), ExchangeType::Client);
    }

    #[test]
    fn custom_message_depends_on_local_role() {
        let event = InitialEvent::custom(NodeId::new(), CustomMessageKind::ClusterActivate);
        assert_eq!(classify(&event, false), ExchangeType::All);
        assert_eq!(classify(&event, true), ExchangeType::Client);
    }

    #[test]
    fn client_only_type_skips_quiesce() {
        assert!(!needs_quiesce(ExchangeType::Client));
        assert!(!needs_quiesce(ExchangeType::None));
    }
}
