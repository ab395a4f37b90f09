//! Mock implementation of the instance interface for testing purposes.
//!
//! `MockInstance` is a fully scriptable in-memory server: tests set its
//! reported state, transaction sets and channels up front, inject failures
//! for specific statements, and inspect every statement the admin layer
//! executed against it. `MockConnector` maps addresses to instances and can
//! simulate unreachable servers and address aliases.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use meridian_instance::{
    ChannelStatus, Connector, Credentials, Instance, InstanceErrorKind, LocalMetadata,
    ServerVersion, VariableScope,
};
use meridian_topology::{AuthMode, NodeAddress, NodeId, NodeState, ServerId, TransactionSet};

/// Mutable state shared by all clones of one mock instance
#[derive(Debug)]
struct MockState {
    canonical_address: NodeAddress,
    node_id: NodeId,
    server_id: ServerId,
    version: ServerVersion,
    state: NodeState,
    applied: TransactionSet,
    purged: TransactionSet,
    channels: Vec<ChannelStatus>,
    local_metadata: Option<LocalMetadata>,
    auth_modes: Vec<AuthMode>,
    executed: Vec<String>,
    variables: Vec<(String, String, VariableScope)>,
    /// Substring patterns that make `execute` fail with a statement error
    fail_statements: Vec<String>,
    /// Applied set the instance drifts toward, one poll at a time
    convergence_target: Option<(TransactionSet, u32)>,
}

/// Mock implementation of the instance interface.
#[derive(Clone, Debug)]
pub struct MockInstance {
    dialed_address: NodeAddress,
    state: Arc<Mutex<MockState>>,
}

impl MockInstance {
    /// Create a mock server with sensible defaults: online and writable,
    /// empty transaction history, version 8.4.0, no channels.
    #[must_use]
    pub fn new(address: NodeAddress, server_id: u32) -> Self {
        let state = MockState {
            canonical_address: address.clone(),
            node_id: NodeId::random(),
            server_id: ServerId(server_id),
            version: ServerVersion::new(8, 4, 0),
            state: NodeState::Online { writable: true },
            applied: TransactionSet::new(),
            purged: TransactionSet::new(),
            channels: Vec::new(),
            local_metadata: None,
            auth_modes: vec![AuthMode::Password],
            executed: Vec::new(),
            variables: Vec::new(),
            fail_statements: Vec::new(),
            convergence_target: None,
        };
        Self {
            dialed_address: address,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Replace the node identity
    pub async fn set_node_id(&self, id: NodeId) {
        self.state.lock().await.node_id = id;
    }

    /// Replace the reported version
    pub async fn set_version(&self, version: ServerVersion) {
        self.state.lock().await.version = version;
    }

    /// Replace the live state
    pub async fn set_state(&self, state: NodeState) {
        self.state.lock().await.state = state;
    }

    /// Replace the applied-transaction set
    pub async fn set_applied(&self, applied: TransactionSet) {
        self.state.lock().await.applied = applied;
    }

    /// Replace the purged-transaction set
    pub async fn set_purged(&self, purged: TransactionSet) {
        self.state.lock().await.purged = purged;
    }

    /// Replace the configured channel list
    pub async fn set_channels(&self, channels: Vec<ChannelStatus>) {
        self.state.lock().await.channels = channels;
    }

    /// Replace the server's own metadata view
    pub async fn set_local_metadata(&self, metadata: Option<LocalMetadata>) {
        self.state.lock().await.local_metadata = metadata;
    }

    /// Replace the supported authentication modes
    pub async fn set_auth_modes(&self, modes: Vec<AuthMode>) {
        self.state.lock().await.auth_modes = modes;
    }

    /// Report a canonical address different from the dialed one
    pub async fn set_canonical_address(&self, address: NodeAddress) {
        self.state.lock().await.canonical_address = address;
    }

    /// Make `execute` fail for any statement containing `pattern`
    pub async fn fail_statements_matching(&self, pattern: &str) {
        self.state
            .lock()
            .await
            .fail_statements
            .push(pattern.to_string());
    }

    /// Remove every scripted statement failure
    pub async fn clear_scripted_failures(&self) {
        self.state.lock().await.fail_statements.clear();
    }

    /// Script convergence: after `polls` reads of the applied set, the
    /// instance reports `target` as applied.
    pub async fn converge_after(&self, target: TransactionSet, polls: u32) {
        self.state.lock().await.convergence_target = Some((target, polls));
    }

    /// Every statement executed against this instance, in order
    pub async fn executed_statements(&self) -> Vec<String> {
        self.state.lock().await.executed.clone()
    }

    /// Every variable write issued against this instance, in order
    pub async fn variable_writes(&self) -> Vec<(String, String, VariableScope)> {
        self.state.lock().await.variables.clone()
    }
}

#[async_trait]
impl Instance for MockInstance {
    type Error = Error;

    fn dialed_address(&self) -> &NodeAddress {
        &self.dialed_address
    }

    async fn canonical_address(&self) -> Result<NodeAddress, Self::Error> {
        Ok(self.state.lock().await.canonical_address.clone())
    }

    async fn node_id(&self) -> Result<NodeId, Self::Error> {
        Ok(self.state.lock().await.node_id)
    }

    async fn server_id(&self) -> Result<ServerId, Self::Error> {
        Ok(self.state.lock().await.server_id)
    }

    async fn version(&self) -> Result<ServerVersion, Self::Error> {
        Ok(self.state.lock().await.version)
    }

    async fn state(&self) -> Result<NodeState, Self::Error> {
        Ok(self.state.lock().await.state)
    }

    async fn applied_transactions(&self) -> Result<TransactionSet, Self::Error> {
        let mut state = self.state.lock().await;
        if let Some((target, polls)) = state.convergence_target.take() {
            if polls == 0 {
                state.applied = target;
            } else {
                state.convergence_target = Some((target, polls - 1));
            }
        }
        Ok(state.applied.clone())
    }

    async fn purged_transactions(&self) -> Result<TransactionSet, Self::Error> {
        Ok(self.state.lock().await.purged.clone())
    }

    async fn replication_channels(&self) -> Result<Vec<ChannelStatus>, Self::Error> {
        Ok(self.state.lock().await.channels.clone())
    }

    async fn local_metadata(&self) -> Result<Option<LocalMetadata>, Self::Error> {
        Ok(self.state.lock().await.local_metadata.clone())
    }

    async fn supports_auth_mode(&self, mode: AuthMode) -> Result<bool, Self::Error> {
        Ok(self.state.lock().await.auth_modes.contains(&mode))
    }

    async fn execute(&self, sql: &str) -> Result<(), Self::Error> {
        let mut state = self.state.lock().await;
        if let Some(pattern) = state
            .fail_statements
            .iter()
            .find(|p| sql.contains(p.as_str()))
        {
            return Err(Error::Statement(format!(
                "statement matching '{pattern}' failed by test script"
            )));
        }
        state.executed.push(sql.to_string());
        Ok(())
    }

    async fn set_variable(
        &self,
        name: &str,
        value: &str,
        scope: VariableScope,
    ) -> Result<(), Self::Error> {
        self.state
            .lock()
            .await
            .variables
            .push((name.to_string(), value.to_string(), scope));
        Ok(())
    }
}

/// Mock connector mapping addresses to registered [`MockInstance`]s.
#[derive(Clone, Debug, Default)]
pub struct MockConnector {
    inner: Arc<Mutex<ConnectorState>>,
}

#[derive(Debug, Default)]
struct ConnectorState {
    instances: HashMap<NodeAddress, MockInstance>,
    aliases: HashMap<NodeAddress, NodeAddress>,
    unreachable: Vec<NodeAddress>,
}

impl MockConnector {
    /// Create an empty connector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance under its dialed address
    pub async fn register(&self, instance: MockInstance) {
        let mut inner = self.inner.lock().await;
        inner
            .instances
            .insert(instance.dialed_address().clone(), instance);
    }

    /// Make `alias` dial the instance registered at `canonical`
    pub async fn alias(&self, alias: NodeAddress, canonical: NodeAddress) {
        self.inner.lock().await.aliases.insert(alias, canonical);
    }

    /// Make future connections to `address` fail
    pub async fn set_unreachable(&self, address: NodeAddress) {
        self.inner.lock().await.unreachable.push(address);
    }

    /// Undo [`Self::set_unreachable`]
    pub async fn set_reachable(&self, address: &NodeAddress) {
        self.inner.lock().await.unreachable.retain(|a| a != address);
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Instance = MockInstance;

    async fn connect(
        &self,
        address: &NodeAddress,
        _credentials: &Credentials,
    ) -> Result<Self::Instance, Error> {
        let inner = self.inner.lock().await;
        if inner.unreachable.contains(address) {
            return Err(Error::Connection(format!("{address} is unreachable")));
        }
        let target = inner.aliases.get(address).unwrap_or(address);
        inner.instances.get(target).cloned().ok_or_else(|| {
            Error::Connection(format!("no instance registered at {address}"))
        })
    }
}
