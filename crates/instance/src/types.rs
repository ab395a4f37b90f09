//! Value types reported by or passed to instances

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use meridian_topology::NodeAddress;

/// Credentials used to dial a server
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    /// Account name
    pub user: String,

    /// Password, absent for certificate-only authentication
    pub password: Option<String>,
}

impl Credentials {
    /// Password credentials
    #[must_use]
    pub fn with_password(user: &str, password: &str) -> Self {
        Self {
            user: user.to_string(),
            password: Some(password.to_string()),
        }
    }
}

/// A server software version, compared lexicographically by component
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerVersion {
    /// Major component
    pub major: u16,

    /// Minor component
    pub minor: u16,

    /// Patch component
    pub patch: u16,
}

impl ServerVersion {
    /// Build a version from components
    #[must_use]
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ServerVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        let [major, minor, patch] = parts.as_slice() else {
            return Err(format!("version '{s}' must have three components"));
        };
        let parse = |part: &str| {
            part.parse::<u16>()
                .map_err(|e| format!("bad version '{s}': {e}"))
        };
        Ok(Self::new(parse(major)?, parse(minor)?, parse(patch)?))
    }
}

/// Scope at which a system variable is set
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum VariableScope {
    /// Current session only
    Session,

    /// Server-wide, until restart
    Global,

    /// Server-wide and persisted across restarts
    Persist,
}

/// State of one replication channel
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ChannelState {
    /// Applier and receiver both running
    On,

    /// Channel configured but stopped
    Off,

    /// Receiver attempting to connect
    Connecting,

    /// Channel stopped after an error
    Error,
}

/// Status of one replication channel as reported by a server
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChannelStatus {
    /// Channel name
    pub name: String,

    /// Address of the current source, when connected
    pub source: Option<NodeAddress>,

    /// Channel state
    pub state: ChannelState,

    /// Message of the last error, when `state` is [`ChannelState::Error`]
    pub last_error: Option<String>,
}

/// What a server's own metadata copy says about its membership.
///
/// This copy can be stale: a node that was forcibly removed from a topology
/// keeps claiming membership until it is rejoined or reset.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LocalMetadata {
    /// Identifier of the topology the server believes it belongs to
    pub topology_id: Uuid,

    /// Name of the cluster within that topology, when known
    pub cluster_name: Option<String>,
}
