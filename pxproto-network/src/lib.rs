//! # Partition exchange protocol — transport & wire messages
//!
//! Defines the three wire message shapes exchanged between participants
//! during an exchange (`messages`) and the `Transport` collaborator the
//! exchange core uses to send them (`transport`). Neither module knows
//! anything about exchange state; they're pure plumbing, the same role
//! a dedicated networking crate plays for its own protocol.

pub mod messages;
pub mod transport;

pub use messages::{
    ExchangeWireMessage, FullMessage, FullPartitionMap, GroupPartitionMap, HistoryRange,
    HistorySupplierKey, SingleMessage, SingleRequest,
};
pub use transport::{InMemoryTransport, MessagePool, Transport};
