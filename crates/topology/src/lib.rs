//! Core topology model for Meridian clusters
//!
//! This crate provides:
//! - Node identity types (`NodeId`, `ServerId`, `NodeAddress`)
//! - Membership records (`NodeRecord`, `NodeRole`, `NodeState`)
//! - Applied-transaction sets and history comparison
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod address;
mod error;
mod node;
mod txset;

pub use address::NodeAddress;
pub use error::TopologyError;
pub use node::{AuthMode, ClusterName, NodeId, NodeRecord, NodeRole, NodeState, ServerId};
pub use txset::{HistoryComparison, Interval, TransactionSet, compare_histories};
