//! Abstract interface for talking to one live database server.
//!
//! The admin layer never opens sockets or speaks the wire protocol itself;
//! it consumes this narrow interface. Concrete implementations live in
//! sibling crates (`meridian-instance-mock` for tests, the real client
//! elsewhere).
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod types;

pub use error::{InstanceError, InstanceErrorKind};
pub use types::{
    ChannelState, ChannelStatus, Credentials, LocalMetadata, ServerVersion, VariableScope,
};

use async_trait::async_trait;
use meridian_topology::{AuthMode, NodeAddress, NodeId, NodeState, ServerId, TransactionSet};

/// A live connection to one database server.
///
/// All methods are remote calls bounded by the connection's own timeouts.
/// Implementations must be safe to share behind an `Arc`; the admin layer
/// keeps handles alive inside compensation closures.
#[async_trait]
pub trait Instance: Send + Sync + 'static {
    /// The error type for this instance.
    type Error: InstanceError;

    /// The address this handle was dialed with
    fn dialed_address(&self) -> &NodeAddress;

    /// The canonical address the server reports for itself.
    ///
    /// May differ from [`Self::dialed_address`] when the operator used an
    /// alias or alternate spelling; uniqueness checks compare this one.
    async fn canonical_address(&self) -> Result<NodeAddress, Self::Error>;

    /// The server's stable identity
    async fn node_id(&self) -> Result<NodeId, Self::Error>;

    /// The server's numeric server id
    async fn server_id(&self) -> Result<ServerId, Self::Error>;

    /// The server software version
    async fn version(&self) -> Result<ServerVersion, Self::Error>;

    /// Current live state
    async fn state(&self) -> Result<NodeState, Self::Error>;

    /// The set of transactions this server has executed
    async fn applied_transactions(&self) -> Result<TransactionSet, Self::Error>;

    /// The set of transactions this server has discarded from its log.
    ///
    /// A joiner missing any of these can only be provisioned by clone.
    async fn purged_transactions(&self) -> Result<TransactionSet, Self::Error>;

    /// Status of every replication channel configured on this server
    async fn replication_channels(&self) -> Result<Vec<ChannelStatus>, Self::Error>;

    /// The topology membership this server believes it has, from its own
    /// (possibly stale) local metadata copy
    async fn local_metadata(&self) -> Result<Option<LocalMetadata>, Self::Error>;

    /// Whether the server can satisfy the given authentication mode
    async fn supports_auth_mode(&self, mode: AuthMode) -> Result<bool, Self::Error>;

    /// Execute a single SQL statement
    async fn execute(&self, sql: &str) -> Result<(), Self::Error>;

    /// Set a system variable at the given scope
    async fn set_variable(
        &self,
        name: &str,
        value: &str,
        scope: VariableScope,
    ) -> Result<(), Self::Error>;
}

/// Dials servers and produces [`Instance`] handles.
#[async_trait]
pub trait Connector: Clone + Send + Sync + 'static {
    /// The instance type produced by this connector.
    type Instance: Instance;

    /// Connect to a server.
    ///
    /// # Errors
    ///
    /// Returns an error of kind [`InstanceErrorKind::Connection`] when the
    /// server cannot be reached or refuses the credentials.
    async fn connect(
        &self,
        address: &NodeAddress,
        credentials: &Credentials,
    ) -> Result<Self::Instance, <Self::Instance as Instance>::Error>;
}
