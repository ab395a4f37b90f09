//! In-memory (single process) implementation of the cluster metastore for
//! local development and tests.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use meridian_metastore::{ClusterRecord, MetadataWrite, Metastore};
use meridian_topology::{NodeId, NodeRecord};

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<NodeId, NodeRecord>,
    /// Keyed by lowercased name; sibling uniqueness is case-insensitive
    clusters: BTreeMap<String, ClusterRecord>,
}

/// In-memory cluster metastore.
#[derive(Clone, Debug)]
pub struct MemoryMetastore {
    topology_id: Uuid,
    state: Arc<Mutex<State>>,
}

impl MemoryMetastore {
    /// Create an empty store for a fresh topology
    #[must_use]
    pub fn new() -> Self {
        Self::with_topology_id(Uuid::new_v4())
    }

    /// Create an empty store with a fixed topology id
    #[must_use]
    pub fn with_topology_id(topology_id: Uuid) -> Self {
        Self {
            topology_id,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Apply one write to a state image, validating invariants
    fn apply_one(state: &mut State, write: &MetadataWrite) -> Result<(), Error> {
        match write {
            MetadataWrite::InsertNode(record) => {
                if state.nodes.contains_key(&record.id) {
                    return Err(Error::Conflict(format!(
                        "node {} is already registered",
                        record.id
                    )));
                }
                if state
                    .nodes
                    .values()
                    .any(|n| n.server_id == record.server_id)
                {
                    return Err(Error::Conflict(format!(
                        "server id {} is already registered",
                        record.server_id
                    )));
                }
                state.nodes.insert(record.id, record.clone());
            }
            MetadataWrite::DeleteNode(id) => {
                state.nodes.remove(id);
            }
            MetadataWrite::SetState { node, state: new } => {
                let record = state
                    .nodes
                    .get_mut(node)
                    .ok_or_else(|| Error::NotFound(format!("node {node}")))?;
                record.state = *new;
            }
            MetadataWrite::SetAttribute { node, key, value } => {
                let record = state
                    .nodes
                    .get_mut(node)
                    .ok_or_else(|| Error::NotFound(format!("node {node}")))?;
                record.attributes.insert(key.clone(), value.clone());
            }
            MetadataWrite::DeleteAttribute { node, key } => {
                let record = state
                    .nodes
                    .get_mut(node)
                    .ok_or_else(|| Error::NotFound(format!("node {node}")))?;
                record.attributes.remove(key);
            }
            MetadataWrite::InsertCluster(record) => {
                let key = record.name.as_str().to_ascii_lowercase();
                if state.clusters.contains_key(&key) {
                    return Err(Error::Conflict(format!(
                        "cluster '{}' is already registered",
                        record.name
                    )));
                }
                state.clusters.insert(key, record.clone());
            }
            MetadataWrite::DeleteCluster(name) => {
                state.clusters.remove(&name.as_str().to_ascii_lowercase());
            }
        }
        Ok(())
    }
}

impl Default for MemoryMetastore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Metastore for MemoryMetastore {
    type Error = Error;

    async fn topology_id(&self) -> Result<Uuid, Self::Error> {
        Ok(self.topology_id)
    }

    async fn apply(&self, writes: &[MetadataWrite]) -> Result<(), Self::Error> {
        let mut state = self.state.lock().await;

        // Validate the whole group against a scratch image first so a
        // failure midway leaves the store untouched.
        let mut scratch = State {
            nodes: state.nodes.clone(),
            clusters: state.clusters.clone(),
        };
        for write in writes {
            Self::apply_one(&mut scratch, write)?;
        }

        *state = scratch;
        Ok(())
    }

    async fn node(&self, id: &NodeId) -> Result<Option<NodeRecord>, Self::Error> {
        Ok(self.state.lock().await.nodes.get(id).cloned())
    }

    async fn nodes(&self) -> Result<Vec<NodeRecord>, Self::Error> {
        Ok(self.state.lock().await.nodes.values().cloned().collect())
    }

    async fn attribute(
        &self,
        id: &NodeId,
        key: &str,
    ) -> Result<Option<serde_json::Value>, Self::Error> {
        Ok(self
            .state
            .lock()
            .await
            .nodes
            .get(id)
            .and_then(|record| record.attributes.get(key).cloned()))
    }

    async fn clusters(&self) -> Result<Vec<ClusterRecord>, Self::Error> {
        Ok(self.state.lock().await.clusters.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_metastore::MetadataTransaction;
    use meridian_topology::{NodeAddress, NodeRole, NodeState, ServerId};

    fn record(id: u128, server_id: u32, address: &str) -> NodeRecord {
        NodeRecord::new(
            NodeId::new(Uuid::from_u128(id)),
            ServerId(server_id),
            NodeAddress::parse(address).unwrap(),
            NodeRole::Member,
        )
    }

    #[tokio::test]
    async fn grouped_writes_are_atomic() {
        let store = MemoryMetastore::new();
        store
            .apply(&[MetadataWrite::InsertNode(record(1, 1, "db1"))])
            .await
            .unwrap();

        // Second write in the group conflicts; the first must not land.
        let result = store
            .apply(&[
                MetadataWrite::InsertNode(record(2, 2, "db2")),
                MetadataWrite::InsertNode(record(3, 1, "db3")),
            ])
            .await;
        assert!(result.is_err());
        assert_eq!(store.nodes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_server_id_conflicts() {
        use meridian_metastore::MetastoreError as _;
        use meridian_metastore::MetastoreErrorKind;

        let store = MemoryMetastore::new();
        store
            .apply(&[MetadataWrite::InsertNode(record(1, 7, "db1"))])
            .await
            .unwrap();
        let err = store
            .apply(&[MetadataWrite::InsertNode(record(2, 7, "db2"))])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), MetastoreErrorKind::Conflict);
    }

    #[tokio::test]
    async fn undo_log_reverses_a_committed_transaction() {
        let store = MemoryMetastore::new();
        let node = record(1, 1, "db1");
        let id = node.id;

        let mut txn = MetadataTransaction::new(&store);
        txn.insert_node(node);
        txn.set_attribute(id, "label", serde_json::json!("east"))
            .await
            .unwrap();
        txn.set_state(id, NodeState::Online { writable: true })
            .await
            .unwrap();
        let undo = txn.commit().await.unwrap();

        assert!(store.node(&id).await.unwrap().is_some());

        undo.apply(&store).await.unwrap();
        assert!(store.node(&id).await.unwrap().is_none());
        assert!(store.nodes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn undo_log_restores_prior_attribute_values() {
        let store = MemoryMetastore::new();
        let node = record(1, 1, "db1");
        let id = node.id;
        store
            .apply(&[
                MetadataWrite::InsertNode(node),
                MetadataWrite::SetAttribute {
                    node: id,
                    key: "label".to_string(),
                    value: serde_json::json!("old"),
                },
            ])
            .await
            .unwrap();

        let mut txn = MetadataTransaction::new(&store);
        txn.set_attribute(id, "label", serde_json::json!("new"))
            .await
            .unwrap();
        let undo = txn.commit().await.unwrap();
        assert_eq!(
            store.attribute(&id, "label").await.unwrap(),
            Some(serde_json::json!("new"))
        );

        undo.apply(&store).await.unwrap();
        assert_eq!(
            store.attribute(&id, "label").await.unwrap(),
            Some(serde_json::json!("old"))
        );
    }

    #[tokio::test]
    async fn cluster_names_collide_case_insensitively() {
        use meridian_topology::ClusterName;

        let store = MemoryMetastore::new();
        let east = ClusterRecord {
            name: ClusterName::new("East").unwrap(),
            primary: NodeId::new(Uuid::from_u128(1)),
        };
        let east_again = ClusterRecord {
            name: ClusterName::new("EAST").unwrap(),
            primary: NodeId::new(Uuid::from_u128(2)),
        };
        store
            .apply(&[MetadataWrite::InsertCluster(east)])
            .await
            .unwrap();
        assert!(
            store
                .apply(&[MetadataWrite::InsertCluster(east_again)])
                .await
                .is_err()
        );
    }
}
