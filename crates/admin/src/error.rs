//! Error taxonomy for admin operations
//!
//! Callers match on [`AdminError::kind`], never on message text. Every
//! variant carries a free-form message for the operator; the kind is the
//! contract.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use meridian_instance::InstanceError;
use meridian_topology::NodeAddress;

/// Which endpoint of an operation an error refers to
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EndpointRole {
    /// The node being added or removed
    Target,

    /// The node chosen to provision initial data
    Donor,

    /// A node in the ongoing replication source list
    Source,

    /// The topology's current primary
    Primary,
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Target => write!(f, "target"),
            Self::Donor => write!(f, "donor"),
            Self::Source => write!(f, "source"),
            Self::Primary => write!(f, "primary"),
        }
    }
}

/// The kind of admin error, the discriminant callers branch on
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AdminErrorKind {
    /// A precondition was not met; nothing was written
    Validation,

    /// Duplicate identity, name collision, or already-managed resource
    Conflict,

    /// A node could not be reached
    Unreachable,

    /// Incremental recovery is impossible and clone is unavailable
    IrrecoverableHistory,

    /// Synchronization did not converge within the allowed time
    SyncTimeout,

    /// The operator interrupted the operation
    Canceled,

    /// A remote statement or query failed
    Instance,

    /// The metadata store failed
    Metadata,
}

impl fmt::Display for AdminErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Errors raised by topology mutation operations
#[derive(Clone, Debug, Error)]
pub enum AdminError {
    /// A precondition was not met
    #[error("validation failed: {0}")]
    Validation(String),

    /// A uniqueness or ownership rule was violated
    #[error("conflict: {0}")]
    Conflict(String),

    /// A node could not be reached
    #[error("{role} {address} is unreachable: {reason}")]
    Unreachable {
        /// Endpoint the operation was talking to
        role: EndpointRole,
        /// Address as resolved at the time of the failure
        address: NodeAddress,
        /// Underlying connection error
        reason: String,
    },

    /// The candidate's history gap has been purged and clone cannot run
    #[error("irrecoverable transaction history: {0}")]
    IrrecoverableHistory(String),

    /// Synchronization exceeded its deadline without a channel error
    #[error("synchronization timed out after {0:?}")]
    SyncTimeout(Duration),

    /// The operator interrupted the operation; rollback has already run
    #[error("operation canceled by operator")]
    Canceled,

    /// A remote call against an instance failed
    #[error("instance {address}: {message}")]
    Instance {
        /// Instance the call was issued against
        address: NodeAddress,
        /// Underlying error
        message: String,
    },

    /// The metadata store rejected or failed a read or write
    #[error("metadata store: {0}")]
    Metadata(String),
}

impl AdminError {
    /// The taxonomy kind of this error
    #[must_use]
    pub const fn kind(&self) -> AdminErrorKind {
        match self {
            Self::Validation(_) => AdminErrorKind::Validation,
            Self::Conflict(_) => AdminErrorKind::Conflict,
            Self::Unreachable { .. } => AdminErrorKind::Unreachable,
            Self::IrrecoverableHistory(_) => AdminErrorKind::IrrecoverableHistory,
            Self::SyncTimeout(_) => AdminErrorKind::SyncTimeout,
            Self::Canceled => AdminErrorKind::Canceled,
            Self::Instance { .. } => AdminErrorKind::Instance,
            Self::Metadata(_) => AdminErrorKind::Metadata,
        }
    }

    /// Wrap an instance error as either unreachable or an instance failure,
    /// depending on its kind
    pub fn from_instance<E: InstanceError>(
        role: EndpointRole,
        address: &NodeAddress,
        err: &E,
    ) -> Self {
        match err.kind() {
            meridian_instance::InstanceErrorKind::Connection => Self::Unreachable {
                role,
                address: address.clone(),
                reason: err.to_string(),
            },
            _ => Self::Instance {
                address: address.clone(),
                message: err.to_string(),
            },
        }
    }

    /// Wrap a metastore error
    pub fn from_metastore<E: std::error::Error>(err: &E) -> Self {
        Self::Metadata(err.to_string())
    }
}
