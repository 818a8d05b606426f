//! # Partition exchange protocol — per-group topology & reconciliation
//!
//! Implements the leaf components at the bottom of the component table
//! in §2: the counter reconciler (`reconcile`) and the per-group
//! topology collaborator (`group`) that the coordinator state machine
//! in `pxproto-exchange` drives during the decide step.

pub mod group;
pub mod reconcile;

pub use group::GroupTopology;
pub use reconcile::{reconcile_partition, PartitionDecision, PartitionReport};
