//! Write operations accepted by the metastore

use std::fmt;

use serde::{Deserialize, Serialize};

use meridian_topology::{ClusterName, NodeId, NodeRecord, NodeState};

/// Registration of one sub-cluster within a cluster set
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClusterRecord {
    /// Cluster name, unique among siblings case-insensitively
    pub name: ClusterName,

    /// Identity of the cluster's primary node
    pub primary: NodeId,
}

/// One write against the metastore.
///
/// Writes are grouped and applied atomically; each variant has an exact
/// reverse, which is what makes the undo log possible.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MetadataWrite {
    /// Register a node
    InsertNode(NodeRecord),

    /// Remove a node registration and all its attributes
    DeleteNode(NodeId),

    /// Record a new state for a node
    SetState {
        /// Node to update
        node: NodeId,
        /// New state
        state: NodeState,
    },

    /// Set one attribute of a node
    SetAttribute {
        /// Node to update
        node: NodeId,
        /// Attribute key
        key: String,
        /// Attribute value
        value: serde_json::Value,
    },

    /// Remove one attribute of a node
    DeleteAttribute {
        /// Node to update
        node: NodeId,
        /// Attribute key
        key: String,
    },

    /// Register a sub-cluster
    InsertCluster(ClusterRecord),

    /// Remove a sub-cluster registration
    DeleteCluster(ClusterName),
}

impl fmt::Display for MetadataWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsertNode(record) => {
                write!(f, "insert node {} ({})", record.id, record.address)
            }
            Self::DeleteNode(id) => write!(f, "delete node {id}"),
            Self::SetState { node, state } => write!(f, "set state of {node} to {state}"),
            Self::SetAttribute { node, key, .. } => {
                write!(f, "set attribute '{key}' of {node}")
            }
            Self::DeleteAttribute { node, key } => {
                write!(f, "delete attribute '{key}' of {node}")
            }
            Self::InsertCluster(record) => write!(f, "insert cluster '{}'", record.name),
            Self::DeleteCluster(name) => write!(f, "delete cluster '{name}'"),
        }
    }
}
