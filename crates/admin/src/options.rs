//! Configuration objects for topology mutation operations
//!
//! Everything an operation's behavior depends on is an explicit field here,
//! including interactive-mode and dry-run switches. There is no ambient
//! process state to consult, which keeps the same inputs giving the same
//! decisions in tests and in production.

use std::sync::Arc;
use std::time::Duration;

use meridian_instance::{Credentials, ServerVersion};
use meridian_topology::{AuthMode, ClusterName, NodeAddress};

use crate::recovery::RecoveryMethod;

/// Topology-wide settings the admin enforces on every operation
#[derive(Clone, Copy, Debug)]
pub struct TopologySettings {
    /// Authentication mode every member must support
    pub auth_mode: AuthMode,

    /// Oldest server version allowed to join
    pub min_version: ServerVersion,
}

impl Default for TopologySettings {
    fn default() -> Self {
        Self {
            auth_mode: AuthMode::Password,
            min_version: ServerVersion::new(8, 0, 0),
        }
    }
}

/// How replication sources for a new node are chosen
#[derive(Clone, Debug, Default)]
pub enum SourcePolicy {
    /// Replicate from the topology's primary
    #[default]
    Primary,

    /// Replicate from an online non-primary member
    Secondary,

    /// Explicit ordered list; the first entry is the donor and gets the
    /// highest failover weight
    Custom(Vec<NodeAddress>),
}

/// Whether a synchronization timeout fails the operation
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncTimeoutPolicy {
    /// Timeout triggers rollback and surfaces as an error
    Fatal,

    /// Timeout is reported in the result; partial state is left in place
    Advisory,
}

/// Operator confirmation hook used when `interactive` is set.
///
/// Receives the question text, returns whether the operator accepted.
pub type ConfirmFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Options for one join operation
#[derive(Clone)]
pub struct JoinOptions {
    /// Address of the node (or secondary cluster primary) being added
    pub address: NodeAddress,

    /// Credentials used for every connection made by the operation
    pub credentials: Credentials,

    /// Override for the provisioning donor; resolved from the source
    /// policy when absent
    pub donor: Option<NodeAddress>,

    /// Requested recovery method; `Auto` resolves from history comparison
    pub recovery_method: RecoveryMethod,

    /// How ongoing replication sources are chosen
    pub source_policy: SourcePolicy,

    /// Operator assertion that the topology's recorded history has no gaps
    pub history_is_known_complete: bool,

    /// Deadline for the post-provisioning synchronization barrier
    pub sync_timeout: Duration,

    /// Interval between applied-set polls during synchronization
    pub sync_poll_interval: Duration,

    /// Execute only validations and reads; record what would be done
    pub dry_run: bool,

    /// Allow interactive confirmation prompts
    pub interactive: bool,

    /// Prompt hook consulted when `interactive` is set
    pub confirm: Option<ConfirmFn>,

    /// Certificate subject to register, required under certificate auth
    pub cert_subject: Option<String>,

    /// Free-form label stored as a node attribute
    pub label: Option<String>,

    /// Name for the new sub-cluster; required by `add_cluster` only
    pub cluster_name: Option<ClusterName>,
}

impl JoinOptions {
    /// Options with defaults for everything but the target
    #[must_use]
    pub fn new(address: NodeAddress, credentials: Credentials) -> Self {
        Self {
            address,
            credentials,
            donor: None,
            recovery_method: RecoveryMethod::Auto,
            source_policy: SourcePolicy::default(),
            history_is_known_complete: false,
            sync_timeout: Duration::from_secs(300),
            sync_poll_interval: Duration::from_millis(500),
            dry_run: false,
            interactive: false,
            confirm: None,
            cert_subject: None,
            label: None,
            cluster_name: None,
        }
    }
}

impl std::fmt::Debug for JoinOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinOptions")
            .field("address", &self.address)
            .field("donor", &self.donor)
            .field("recovery_method", &self.recovery_method)
            .field("dry_run", &self.dry_run)
            .field("interactive", &self.interactive)
            .finish_non_exhaustive()
    }
}
