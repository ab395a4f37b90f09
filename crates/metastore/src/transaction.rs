//! Grouped metadata writes with reverse-statement capture

use tracing::{debug, info};

use meridian_topology::{ClusterName, NodeId, NodeRecord, NodeState};

use crate::{ClusterRecord, MetadataWrite, Metastore};

/// A staged group of metadata writes committed atomically.
///
/// Every forward write staged here also records its exact reverse, captured
/// against the store's pre-image at staging time. `commit` applies the
/// forward group and hands back an [`UndoLog`]; the log stays valid after
/// the commit, so later non-transactional phases of an operation can still
/// reverse the metadata without a transaction being held open under them.
pub struct MetadataTransaction<'a, S: Metastore> {
    store: &'a S,
    forward: Vec<MetadataWrite>,
    reverse: Vec<MetadataWrite>,
}

impl<'a, S: Metastore> MetadataTransaction<'a, S> {
    /// Begin staging writes against `store`
    #[must_use]
    pub const fn new(store: &'a S) -> Self {
        Self {
            store,
            forward: Vec::new(),
            reverse: Vec::new(),
        }
    }

    /// Stage a node registration
    pub fn insert_node(&mut self, record: NodeRecord) {
        self.reverse.push(MetadataWrite::DeleteNode(record.id));
        self.forward.push(MetadataWrite::InsertNode(record));
    }

    /// Stage a sub-cluster registration
    pub fn insert_cluster(&mut self, record: ClusterRecord) {
        self.reverse
            .push(MetadataWrite::DeleteCluster(record.name.clone()));
        self.forward.push(MetadataWrite::InsertCluster(record));
    }

    /// Stage a state change, capturing the prior state for reversal.
    ///
    /// # Errors
    ///
    /// Fails if the node is neither staged in this transaction nor present
    /// in the store.
    pub async fn set_state(&mut self, node: NodeId, state: NodeState) -> Result<(), S::Error> {
        let prior = match self.staged_state(&node) {
            Some(state) => Some(state),
            None => self.store.node(&node).await?.map(|record| record.state),
        };
        // No pre-image means the node is unknown; the forward write will be
        // rejected at apply time, so there is nothing to reverse.
        if let Some(prior) = prior {
            self.reverse.push(MetadataWrite::SetState { node, state: prior });
        }
        self.forward.push(MetadataWrite::SetState { node, state });
        Ok(())
    }

    /// Stage an attribute write, capturing the prior value for reversal.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be read for the pre-image.
    pub async fn set_attribute(
        &mut self,
        node: NodeId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), S::Error> {
        let prior = match self.staged_attribute(&node, key) {
            Some(value) => Some(value),
            None => self.store.attribute(&node, key).await?,
        };
        match prior {
            Some(prior) => self.reverse.push(MetadataWrite::SetAttribute {
                node,
                key: key.to_string(),
                value: prior,
            }),
            None => self.reverse.push(MetadataWrite::DeleteAttribute {
                node,
                key: key.to_string(),
            }),
        }
        self.forward.push(MetadataWrite::SetAttribute {
            node,
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    /// Number of staged forward writes
    #[must_use]
    pub const fn len(&self) -> usize {
        self.forward.len()
    }

    /// Whether nothing has been staged
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Commit the staged group atomically and return its undo log.
    ///
    /// # Errors
    ///
    /// Propagates the store's error; on failure nothing was applied and no
    /// undo is needed.
    pub async fn commit(self) -> Result<UndoLog, S::Error> {
        info!(writes = self.forward.len(), "committing metadata transaction");
        for write in &self.forward {
            debug!(%write, "metadata write");
        }
        self.store.apply(&self.forward).await?;

        let mut writes = self.reverse;
        writes.reverse();
        Ok(UndoLog { writes })
    }

    /// Read-your-writes lookup of a staged node state
    fn staged_state(&self, node: &NodeId) -> Option<NodeState> {
        self.forward.iter().rev().find_map(|write| match write {
            MetadataWrite::SetState { node: n, state } if n == node => Some(*state),
            MetadataWrite::InsertNode(record) if record.id == *node => Some(record.state),
            _ => None,
        })
    }

    /// Read-your-writes lookup of a staged attribute value
    fn staged_attribute(&self, node: &NodeId, key: &str) -> Option<serde_json::Value> {
        self.forward.iter().rev().find_map(|write| match write {
            MetadataWrite::SetAttribute {
                node: n,
                key: k,
                value,
            } if n == node && k == key => Some(value.clone()),
            MetadataWrite::InsertNode(record) if record.id == *node => {
                record.attributes.get(key).cloned()
            }
            _ => None,
        })
    }
}

/// Reverse statements of one committed metadata transaction.
///
/// Already ordered for replay: the reverse of the last forward write comes
/// first. Applying the log is itself one atomic group.
#[derive(Clone, Debug)]
pub struct UndoLog {
    writes: Vec<MetadataWrite>,
}

impl UndoLog {
    /// Whether there is anything to undo
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Number of reverse writes
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// The reverse writes, in replay order
    #[must_use]
    pub fn writes(&self) -> &[MetadataWrite] {
        &self.writes
    }

    /// Replay the log against a store.
    ///
    /// # Errors
    ///
    /// Propagates the store's error; the group either fully applies or not
    /// at all, so a failed replay can be retried.
    pub async fn apply<S: Metastore>(&self, store: &S) -> Result<(), S::Error> {
        info!(writes = self.writes.len(), "replaying metadata undo log");
        store.apply(&self.writes).await
    }
}
