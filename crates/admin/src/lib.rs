//! Topology mutation orchestration for Meridian clusters
//!
//! This crate takes a standalone server into a live topology (as a full
//! member, a read replica, or the primary of an attached secondary cluster)
//! as one logical operation. There is no distributed transaction to lean
//! on: the operation is a sequence of independent remote calls, and
//! atomicity is recovered by registering a compensating action for every
//! externally visible step and walking those compensations on failure.
//!
//! The entry point is [`ClusterAdmin`]; one operation runs to completion
//! (or rollback) before the next starts.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod account;
mod channel;
mod compensation;
mod error;
mod join;
mod options;
mod recovery;
mod sources;
mod validate;
mod view;

pub use account::{ACCOUNT_PREFIX, ReplicationAccount};
pub use channel::{
    CLUSTER_CHANNEL, ChannelSettings, MANAGED_CHANNEL, SyncOutcome, configure_channel,
    teardown_channel, wait_until_converged,
};
pub use compensation::CompensationTracker;
pub use error::{AdminError, AdminErrorKind, EndpointRole};
pub use join::{JoinReport, OpState, OperationKind};
pub use options::{ConfirmFn, JoinOptions, SourcePolicy, SyncTimeoutPolicy, TopologySettings};
pub use recovery::{MIN_CLONE_VERSION, RecoveryDecision, RecoveryMethod};
pub use sources::ReplicationSource;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use meridian_instance::Connector;
use meridian_metastore::Metastore;

use crate::join::JoinOperation;

/// Orchestrates topology mutations against one cluster.
///
/// Holds the connector used to dial servers and the metastore describing
/// the topology. Runs a single operation at a time; the compensation state
/// of a partially failed rollback is retained for [`ClusterAdmin::undo`].
pub struct ClusterAdmin<C, S>
where
    C: Connector,
    S: Metastore,
{
    connector: C,
    store: S,
    settings: TopologySettings,
    cancel: CancellationToken,
    pending: Option<CompensationTracker>,
}

impl<C, S> ClusterAdmin<C, S>
where
    C: Connector,
    S: Metastore,
{
    /// Create an admin with default topology settings
    #[must_use]
    pub fn new(connector: C, store: S) -> Self {
        Self::with_settings(connector, store, TopologySettings::default())
    }

    /// Create an admin with explicit topology settings
    #[must_use]
    pub fn with_settings(connector: C, store: S, settings: TopologySettings) -> Self {
        Self {
            connector,
            store,
            settings,
            cancel: CancellationToken::new(),
            pending: None,
        }
    }

    /// Token an operator can cancel to interrupt the current operation.
    ///
    /// Cancellation triggers rollback and surfaces as
    /// [`AdminError::Canceled`] once rollback has run.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Add a full voting member to the topology.
    ///
    /// # Errors
    ///
    /// See [`AdminError`]; any failure after the first mutation has already
    /// been rolled back when this returns.
    pub async fn add_member(&mut self, opts: JoinOptions) -> Result<JoinReport, AdminError> {
        self.run(OperationKind::AddMember, opts).await
    }

    /// Add a read replica to the topology.
    ///
    /// A synchronization timeout is advisory for replicas: the operation
    /// reports it and leaves the replica catching up.
    ///
    /// # Errors
    ///
    /// See [`AdminError`]; any failure after the first mutation has already
    /// been rolled back when this returns.
    pub async fn add_replica(&mut self, opts: JoinOptions) -> Result<JoinReport, AdminError> {
        self.run(OperationKind::AddReplica, opts).await
    }

    /// Attach a secondary cluster to this topology's cluster set.
    ///
    /// `opts.cluster_name` is required and must not collide (case
    /// insensitively) with an existing cluster.
    ///
    /// # Errors
    ///
    /// See [`AdminError`]; any failure after the first mutation has already
    /// been rolled back when this returns.
    pub async fn add_cluster(&mut self, opts: JoinOptions) -> Result<JoinReport, AdminError> {
        self.run(OperationKind::AddCluster, opts).await
    }

    /// Retry compensations left over from a rollback that itself partially
    /// failed. Returns the number of compensations still failing; `0` means
    /// the cleanup is now complete (or there was nothing to do).
    pub async fn undo(&mut self) -> usize {
        let Some(mut tracker) = self.pending.take() else {
            return 0;
        };
        info!(remaining = tracker.len(), "retrying leftover compensations");
        let failed = tracker.execute().await;
        if failed > 0 {
            warn!(failed, "compensations still failing after retry");
            self.pending = Some(tracker);
        }
        failed
    }

    async fn run(
        &mut self,
        kind: OperationKind,
        opts: JoinOptions,
    ) -> Result<JoinReport, AdminError> {
        // A cancellation belongs to one operation; do not let a previous
        // operation's interrupt bleed into this one.
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }

        let mut tracker = CompensationTracker::new();
        let operation = JoinOperation::new(
            &self.connector,
            &self.store,
            &self.settings,
            &self.cancel,
            kind,
            opts,
        );

        let result = operation.drive(&mut tracker).await;
        match result {
            Ok(report) => {
                // Success: the compensation list is discarded, never run.
                Ok(report)
            }
            Err(err) => {
                if tracker.is_empty() {
                    // Failed before any externally visible action.
                    return Err(err);
                }
                error!(%kind, state = ?OpState::Failing, error = %err, "join failed; rolling back");
                let failed = tracker.execute().await;
                if failed > 0 {
                    warn!(
                        failed,
                        "rollback incomplete; leftover compensations retained for undo()"
                    );
                    self.pending = Some(tracker);
                }
                info!(%kind, state = ?OpState::RolledBack, "rollback finished");
                // The original failure is always what the caller sees;
                // rollback trouble is logged, never substituted.
                Err(err)
            }
        }
    }
}
