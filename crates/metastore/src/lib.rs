//! Abstract interface for the durable cluster metadata registry.
//!
//! The metastore is the only durable artifact of a topology mutation. The
//! interface is deliberately narrow: atomic grouped writes plus a few reads.
//! On top of it this crate builds the transaction contract the orchestrator
//! depends on: [`MetadataTransaction`] stages forward writes while capturing
//! their reverse statements, and [`UndoLog`] keeps those reverse statements
//! applicable long after the transaction itself has committed.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod transaction;
mod write;

pub use error::{MetastoreError, MetastoreErrorKind};
pub use transaction::{MetadataTransaction, UndoLog};
pub use write::{ClusterRecord, MetadataWrite};

use async_trait::async_trait;
use meridian_topology::{NodeId, NodeRecord};
use uuid::Uuid;

/// Durable registry of cluster membership.
///
/// `apply` is the single mutation entry point and must be atomic: either
/// every write in the group lands or none does. That atomicity, together
/// with uniqueness enforcement on node inserts, is what lets the admin layer
/// run without any topology-wide lock.
#[async_trait]
pub trait Metastore: Clone + Send + Sync + 'static {
    /// The error type for this store.
    type Error: MetastoreError;

    /// Identifier of the topology this store describes
    async fn topology_id(&self) -> Result<Uuid, Self::Error>;

    /// Apply a group of writes atomically.
    ///
    /// # Errors
    ///
    /// Fails with kind `Conflict` when an insert collides with an existing
    /// registration, leaving the store untouched.
    async fn apply(&self, writes: &[MetadataWrite]) -> Result<(), Self::Error>;

    /// Fetch one node's registration, if present
    async fn node(&self, id: &NodeId) -> Result<Option<NodeRecord>, Self::Error>;

    /// All registered nodes, including offline and unreachable ones
    async fn nodes(&self) -> Result<Vec<NodeRecord>, Self::Error>;

    /// One attribute of one node
    async fn attribute(
        &self,
        id: &NodeId,
        key: &str,
    ) -> Result<Option<serde_json::Value>, Self::Error>;

    /// All registered sub-clusters of this topology
    async fn clusters(&self) -> Result<Vec<ClusterRecord>, Self::Error>;
}
