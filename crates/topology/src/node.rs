//! Node identity and membership record types

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{NodeAddress, TopologyError};

/// Globally unique, stable identity of one server.
///
/// Assigned when a server is first provisioned and never reassigned, even
/// across restarts or re-adds. This is the identity every uniqueness
/// invariant in the topology is keyed on.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Wrap an existing identity
    #[must_use]
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a fresh random identity
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for NodeId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Numeric server identifier, unique across the whole topology.
///
/// Distinct from [`NodeId`]: replication internals key on this small
/// integer, so collisions must be rejected even against offline members.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerId(pub u32);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The role a node plays in its topology
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    /// Full voting member; participates in quorum and accepts writes when primary
    Member,

    /// Consumes changes only; never votes, never accepts writes
    ReadReplica,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Member => write!(f, "MEMBER"),
            Self::ReadReplica => write!(f, "READ_REPLICA"),
        }
    }
}

/// Live state of a node as observed or recorded
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Reachable and serving
    Online {
        /// Whether the node currently accepts writes
        writable: bool,
    },

    /// Catching up on missed transactions
    Recovering,

    /// Registered but not reachable over the network
    Unreachable,

    /// Cleanly shut down
    Offline,

    /// Reachable but reporting an internal error
    Error,

    /// Registered in metadata but absent from the live topology
    Missing,
}

impl NodeState {
    /// Whether the node is online, in either writable or read-only mode
    #[must_use]
    pub const fn is_online(&self) -> bool {
        matches!(self, Self::Online { .. })
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online { writable: true } => write!(f, "ONLINE"),
            Self::Online { writable: false } => write!(f, "ONLINE_READ_ONLY"),
            Self::Recovering => write!(f, "RECOVERING"),
            Self::Unreachable => write!(f, "UNREACHABLE"),
            Self::Offline => write!(f, "OFFLINE"),
            Self::Error => write!(f, "ERROR"),
            Self::Missing => write!(f, "MISSING"),
        }
    }
}

/// Authentication mode a topology requires of its members
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum AuthMode {
    /// Password-based replication accounts
    Password,

    /// Certificate-based authentication; members must present a subject
    Certificate,
}

/// Durable membership record for one node, as persisted in the metastore
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Stable identity
    pub id: NodeId,

    /// Numeric server identifier
    pub server_id: ServerId,

    /// Canonical network address
    pub address: NodeAddress,

    /// Role within the topology
    pub role: NodeRole,

    /// Last recorded state
    pub state: NodeState,

    /// Name of the replication account provisioned for this node, if any
    pub replication_account: Option<String>,

    /// Ordered replication sources this node pulls from
    pub source_list: Vec<NodeAddress>,

    /// Certificate subject, when the topology uses certificate auth
    pub cert_subject: Option<String>,

    /// Free-form per-node attributes
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl NodeRecord {
    /// Create a record in the given role with empty optional fields
    #[must_use]
    pub fn new(id: NodeId, server_id: ServerId, address: NodeAddress, role: NodeRole) -> Self {
        Self {
            id,
            server_id,
            address,
            role,
            state: NodeState::Recovering,
            replication_account: None,
            source_list: Vec::new(),
            cert_subject: None,
            attributes: BTreeMap::new(),
        }
    }
}

/// Validated name of a cluster within a cluster set.
///
/// Uniqueness among sibling clusters is case-insensitive, so the comparison
/// helpers here fold case rather than leaving that to callers.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ClusterName(String);

impl ClusterName {
    const MAX_LEN: usize = 63;

    /// Validate and wrap a cluster name
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::InvalidClusterName`] if the name is empty,
    /// longer than 63 characters, does not start with a letter, or contains
    /// characters outside `[A-Za-z0-9_-]`.
    pub fn new(name: &str) -> Result<Self, TopologyError> {
        if name.is_empty() {
            return Err(TopologyError::InvalidClusterName(
                name.to_string(),
                "name is empty".to_string(),
            ));
        }
        if name.len() > Self::MAX_LEN {
            return Err(TopologyError::InvalidClusterName(
                name.to_string(),
                format!("name exceeds {} characters", Self::MAX_LEN),
            ));
        }
        if !name.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
            return Err(TopologyError::InvalidClusterName(
                name.to_string(),
                "name must start with a letter".to_string(),
            ));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(TopologyError::InvalidClusterName(
                name.to_string(),
                format!("invalid character '{bad}'"),
            ));
        }
        Ok(Self(name.to_string()))
    }

    /// The name as given
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive equality, the rule used for sibling uniqueness
    #[must_use]
    pub fn eq_ignore_case(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl fmt::Display for ClusterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ClusterName {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_name_rules() {
        assert!(ClusterName::new("primary").is_ok());
        assert!(ClusterName::new("dc-east_2").is_ok());
        assert!(ClusterName::new("").is_err());
        assert!(ClusterName::new("2fast").is_err());
        assert!(ClusterName::new("bad name").is_err());
        assert!(ClusterName::new(&"x".repeat(64)).is_err());
    }

    #[test]
    fn cluster_name_case_fold() {
        let name = ClusterName::new("Primary").unwrap();
        assert!(name.eq_ignore_case("PRIMARY"));
        assert!(name.eq_ignore_case("primary"));
        assert!(!name.eq_ignore_case("primary2"));
    }

    #[test]
    fn node_state_display() {
        assert_eq!(NodeState::Online { writable: true }.to_string(), "ONLINE");
        assert_eq!(
            NodeState::Online { writable: false }.to_string(),
            "ONLINE_READ_ONLY"
        );
        assert!(NodeState::Online { writable: false }.is_online());
        assert!(!NodeState::Offline.is_online());
    }
}
