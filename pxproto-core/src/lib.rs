//! # Partition exchange protocol — core types
//!
//! This crate holds the data model shared by every other crate in the
//! workspace: node and topology-version identifiers, the wire-level
//! partition state enum, exchange configuration, and the structured
//! error taxonomy from §7. It has no behavior of its own beyond
//! comparison, display, and (de)serialization — the state machine lives
//! in `pxproto-exchange`.

pub mod config;
pub mod errors;
pub mod ids;
pub mod partition;

pub use config::ExchangeConfig;
pub use errors::ExchangeError;
pub use ids::{
    ClusterNode, CustomMessageKind, EventKind, ExchangeId, ExchangeType, NodeId, NodeOrder,
    TopologyVersion,
};
pub use partition::{GroupId, PartitionId, PartitionState, UpdateCounter};
