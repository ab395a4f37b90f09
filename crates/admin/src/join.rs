//! The join operation state machine
//!
//! One operation moves strictly forward through its states; there is no
//! in-place retry of a failed step. Any failure after the first mutation
//! unwinds through the compensation tracker owned by the caller, and the
//! original error is what the caller sees. Every mutating step registers
//! its reversal before acting (the metadata commit is the one exception:
//! its undo log only exists once the atomic commit has succeeded, and a
//! failed commit leaves nothing to reverse).

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use meridian_instance::{Connector, Instance, VariableScope};
use meridian_metastore::{ClusterRecord, MetadataTransaction, Metastore};
use meridian_topology::{NodeAddress, NodeId, NodeRecord, NodeRole, NodeState};

use crate::account::{self, ReplicationAccount};
use crate::channel::{
    self, CLUSTER_CHANNEL, ChannelSettings, MANAGED_CHANNEL, SyncOutcome,
};
use crate::compensation::CompensationTracker;
use crate::error::{AdminError, EndpointRole};
use crate::options::{JoinOptions, SyncTimeoutPolicy, TopologySettings};
use crate::recovery::{self, RecoveryDecision, RecoveryMethod};
use crate::sources::{self, ResolvedSources};
use crate::validate::{self, CandidateFacts};
use crate::view::TopologyView;

/// The kind of join being performed
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperationKind {
    /// Add a full voting member
    AddMember,

    /// Add a read replica
    AddReplica,

    /// Attach a secondary cluster's primary to the cluster set
    AddCluster,
}

impl OperationKind {
    /// Role the new node is registered with
    #[must_use]
    pub const fn role(self) -> NodeRole {
        match self {
            Self::AddMember | Self::AddCluster => NodeRole::Member,
            Self::AddReplica => NodeRole::ReadReplica,
        }
    }

    /// Replication channel used by this kind of join
    #[must_use]
    pub const fn channel_name(self) -> &'static str {
        match self {
            Self::AddMember | Self::AddReplica => MANAGED_CHANNEL,
            Self::AddCluster => CLUSTER_CHANNEL,
        }
    }

    /// Whether a synchronization timeout fails the operation.
    ///
    /// A replica that is slow to catch up is left catching up; a member or
    /// an attached cluster that never converged would hold a half-joined
    /// position in the topology, so those roll back.
    #[must_use]
    pub const fn sync_timeout_policy(self) -> SyncTimeoutPolicy {
        match self {
            Self::AddReplica => SyncTimeoutPolicy::Advisory,
            Self::AddMember | Self::AddCluster => SyncTimeoutPolicy::Fatal,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddMember => write!(f, "add-member"),
            Self::AddReplica => write!(f, "add-replica"),
            Self::AddCluster => write!(f, "add-cluster"),
        }
    }
}

/// States of one join operation, in order
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpState {
    /// Nothing has happened yet
    Init,

    /// Preconditions hold; nothing written
    Validated,

    /// Donor and sources are concrete
    SourceResolved,

    /// Recovery method is fixed for the rest of the operation
    RecoveryChosen,

    /// Initial data is in place on the candidate
    Provisioned,

    /// Membership is durably registered
    MetadataCommitted,

    /// Replication is configured and started
    ChannelConfigured,

    /// The candidate caught up with its donor
    Synchronized,

    /// The operation completed
    Done,

    /// A failure occurred; compensations are running
    Failing,

    /// Compensations have run (possibly partially)
    RolledBack,
}

/// What one join operation did (or, in a dry run, would do)
#[derive(Clone, Debug)]
pub struct JoinReport {
    /// The kind of join performed
    pub kind: OperationKind,

    /// Final state reached
    pub state: OpState,

    /// Identity of the node that was (or would be) added
    pub node_id: Option<NodeId>,

    /// Donor used for provisioning
    pub donor: Option<NodeAddress>,

    /// The resolved recovery decision
    pub recovery: Option<RecoveryDecision>,

    /// Outcome of the synchronization barrier, when it ran
    pub sync: Option<SyncOutcome>,

    /// Whether this was a dry run
    pub dry_run: bool,

    /// Mutating actions, in order: performed ones on a real run, planned
    /// ones on a dry run
    pub actions: Vec<String>,
}

/// One in-flight join operation.
pub(crate) struct JoinOperation<'a, C, S>
where
    C: Connector,
    S: Metastore,
{
    connector: &'a C,
    store: &'a S,
    settings: &'a TopologySettings,
    cancel: &'a CancellationToken,
    kind: OperationKind,
    opts: JoinOptions,
    state: OpState,
    report: JoinReport,
}

impl<'a, C, S> JoinOperation<'a, C, S>
where
    C: Connector,
    S: Metastore,
{
    pub fn new(
        connector: &'a C,
        store: &'a S,
        settings: &'a TopologySettings,
        cancel: &'a CancellationToken,
        kind: OperationKind,
        opts: JoinOptions,
    ) -> Self {
        let report = JoinReport {
            kind,
            state: OpState::Init,
            node_id: None,
            donor: None,
            recovery: None,
            sync: None,
            dry_run: opts.dry_run,
            actions: Vec::new(),
        };
        Self {
            connector,
            store,
            settings,
            cancel,
            kind,
            opts,
            state: OpState::Init,
            report,
        }
    }

    /// Drive the operation to completion. The caller owns the tracker and
    /// is responsible for walking it if this returns an error.
    pub async fn drive(
        mut self,
        tracker: &mut CompensationTracker,
    ) -> Result<JoinReport, AdminError> {
        info!(kind = %self.kind, target = %self.opts.address, dry_run = self.opts.dry_run, "starting join");

        // INIT -> VALIDATED: read-only, no compensation on failure.
        let candidate = self
            .connector
            .connect(&self.opts.address, &self.opts.credentials)
            .await
            .map_err(|e| AdminError::from_instance(EndpointRole::Target, &self.opts.address, &e))?;
        let view = TopologyView::load(self.connector, self.store, &self.opts.credentials).await?;
        let facts = validate::validate(
            self.kind,
            Arc::new(candidate),
            &view,
            self.settings,
            &self.opts,
        )
        .await?;
        self.report.node_id = Some(facts.node_id);
        self.transition(OpState::Validated);
        self.check_cancel()?;

        // VALIDATED -> SOURCE_RESOLVED: still read-only.
        let resolved = sources::resolve(self.connector, &view, &self.opts).await?;
        self.report.donor = Some(resolved.donor_address.clone());
        self.transition(OpState::SourceResolved);

        // SOURCE_RESOLVED -> RECOVERY_CHOSEN: decided once, immutable after.
        let decision = recovery::select(
            &*resolved.donor,
            &resolved.donor_address,
            &*facts.instance,
            &facts.canonical_address,
            &self.opts,
        )
        .await?;
        self.report.recovery = Some(decision);
        self.transition(OpState::RecoveryChosen);
        self.check_cancel()?;

        // Metadata and account writes go through the primary.
        let primary = view.primary().ok_or_else(|| {
            AdminError::Validation("topology has no online writable primary".to_string())
        })?;
        let primary_live = primary.live.clone().ok_or_else(|| AdminError::Unreachable {
            role: EndpointRole::Primary,
            address: primary.record.address.clone(),
            reason: "primary is not reachable".to_string(),
        })?;
        let primary_address = primary.record.address.clone();

        // First mutation: the replication account.
        let account = ReplicationAccount::for_server(facts.server_id);
        self.report.actions.push(format!(
            "create replication account '{}' on {primary_address}",
            account.user
        ));
        if !self.opts.dry_run {
            let undo_primary = Arc::clone(&primary_live);
            let undo_address = primary_address.clone();
            let undo_user = account.user.clone();
            tracker.add(
                &format!("drop replication account '{}'", account.user),
                move || {
                    let primary = Arc::clone(&undo_primary);
                    let address = undo_address.clone();
                    let user = undo_user.clone();
                    Box::pin(async move {
                        account::drop_account(&*primary, &address, &user)
                            .await
                            .map_err(|e| e.to_string())
                    })
                },
            );
            account::create_account(&*primary_live, &primary_address, &account).await?;
        }
        self.check_cancel()?;

        // RECOVERY_CHOSEN -> PROVISIONED
        self.provision(tracker, &facts, &resolved, decision).await?;
        self.transition(OpState::Provisioned);
        self.check_cancel()?;

        // PROVISIONED -> METADATA_COMMITTED
        self.commit_metadata(tracker, &facts, &resolved, &account)
            .await?;
        self.transition(OpState::MetadataCommitted);
        self.check_cancel()?;

        // Replicas must never accept writes; flip the setting before any
        // replication starts so there is no writable window.
        if self.kind.role() == NodeRole::ReadReplica {
            self.report.actions.push(format!(
                "set read_only on {}",
                facts.canonical_address
            ));
            if !self.opts.dry_run {
                let undo_candidate = Arc::clone(&facts.instance);
                let undo_address = facts.canonical_address.clone();
                tracker.add("restore read_only setting", move || {
                    let candidate = Arc::clone(&undo_candidate);
                    let address = undo_address.clone();
                    Box::pin(async move {
                        candidate
                            .set_variable("read_only", "OFF", VariableScope::Persist)
                            .await
                            .map_err(|e| {
                                AdminError::from_instance(EndpointRole::Target, &address, &e)
                                    .to_string()
                            })
                    })
                });
                facts
                    .instance
                    .set_variable("read_only", "ON", VariableScope::Persist)
                    .await
                    .map_err(|e| {
                        AdminError::from_instance(
                            EndpointRole::Target,
                            &facts.canonical_address,
                            &e,
                        )
                    })?;
            }
        }

        // METADATA_COMMITTED -> CHANNEL_CONFIGURED
        self.report.actions.push(format!(
            "configure and start channel '{}' on {}",
            self.kind.channel_name(),
            facts.canonical_address
        ));
        if !self.opts.dry_run {
            let undo_candidate = Arc::clone(&facts.instance);
            let undo_address = facts.canonical_address.clone();
            let channel_name = self.kind.channel_name();
            // Registered at the back: metadata rollback rides the still-open
            // channel, so the channel must be the last thing reversed.
            tracker.add_back(
                &format!("tear down channel '{channel_name}'"),
                move || {
                    let candidate = Arc::clone(&undo_candidate);
                    let address = undo_address.clone();
                    Box::pin(async move {
                        channel::teardown_channel(&*candidate, &address, channel_name)
                            .await
                            .map_err(|e| e.to_string())
                    })
                },
            );
            let channel_settings =
                ChannelSettings::new(self.kind.channel_name(), self.settings.auth_mode);
            channel::configure_channel(
                &*facts.instance,
                &facts.canonical_address,
                &resolved.sources,
                &account,
                &channel_settings,
            )
            .await?;
        }
        self.transition(OpState::ChannelConfigured);

        // CHANNEL_CONFIGURED -> SYNCHRONIZED
        let converged = self.synchronize(&facts, &resolved).await?;
        self.transition(OpState::Synchronized);

        // Flip the registered state once the node has truly caught up.
        if converged {
            self.report.actions.push(format!(
                "mark node {} online in metadata",
                facts.node_id
            ));
            if !self.opts.dry_run {
                let mut txn = MetadataTransaction::new(self.store);
                txn.set_state(facts.node_id, NodeState::Online { writable: false })
                    .await
                    .map_err(|e| AdminError::from_metastore(&e))?;
                let undo = txn.commit().await.map_err(|e| AdminError::from_metastore(&e))?;
                let store = self.store.clone();
                tracker.add("revert node state in metadata", move || {
                    let store = store.clone();
                    let undo = undo.clone();
                    Box::pin(async move {
                        undo.apply(&store).await.map_err(|e| e.to_string())
                    })
                });
            }
        }

        self.transition(OpState::Done);
        info!(kind = %self.kind, node = ?self.report.node_id, "join complete");
        Ok(self.report)
    }

    /// RECOVERY_CHOSEN -> PROVISIONED: run the clone when the decision
    /// calls for one. Incremental provisioning needs no discrete step; the
    /// channel catch-up does the work.
    async fn provision(
        &mut self,
        tracker: &mut CompensationTracker,
        facts: &CandidateFacts<C::Instance>,
        resolved: &ResolvedSources<C::Instance>,
        decision: RecoveryDecision,
    ) -> Result<(), AdminError> {
        if decision.method != RecoveryMethod::Clone {
            return Ok(());
        }

        self.report.actions.push(format!(
            "clone data from {} onto {}",
            resolved.donor_address, facts.canonical_address
        ));
        if self.opts.dry_run {
            return Ok(());
        }

        let undo_candidate = Arc::clone(&facts.instance);
        let undo_address = facts.canonical_address.clone();
        tracker.add("discard partially cloned data", move || {
            let candidate = Arc::clone(&undo_candidate);
            let address = undo_address.clone();
            Box::pin(async move {
                candidate
                    .execute("RESET CLONE STAGING")
                    .await
                    .map_err(|e| {
                        AdminError::from_instance(EndpointRole::Target, &address, &e).to_string()
                    })
            })
        });

        facts
            .instance
            .execute(&format!(
                "CLONE INSTANCE FROM '{}'@'{}':{}",
                self.opts.credentials.user,
                resolved.donor_address.host(),
                resolved.donor_address.port(),
            ))
            .await
            .map_err(|e| {
                AdminError::from_instance(EndpointRole::Target, &facts.canonical_address, &e)
            })?;

        // A completed clone either fully replaced the data directory or
        // failed wholesale; the partial-data compensation is moot now.
        let canceled = tracker.cancel_last();
        debug!(compensation = ?canceled, "clone finished; staging cleanup no longer needed");
        Ok(())
    }

    /// PROVISIONED -> METADATA_COMMITTED: one atomic group registering the
    /// node (and, for a cluster attach, the cluster), with its undo log
    /// registered as a compensation that outlives the commit.
    async fn commit_metadata(
        &mut self,
        tracker: &mut CompensationTracker,
        facts: &CandidateFacts<C::Instance>,
        resolved: &ResolvedSources<C::Instance>,
        account: &ReplicationAccount,
    ) -> Result<(), AdminError> {
        self.report.actions.push(format!(
            "register node {} as {} in metadata",
            facts.node_id,
            self.kind.role()
        ));
        if self.opts.dry_run {
            return Ok(());
        }

        let mut record = NodeRecord::new(
            facts.node_id,
            facts.server_id,
            facts.canonical_address.clone(),
            self.kind.role(),
        );
        record.state = NodeState::Recovering;
        record.replication_account = Some(account.user.clone());
        record.source_list = resolved
            .sources
            .iter()
            .map(|s| s.address.clone())
            .collect();
        record.cert_subject = self.opts.cert_subject.clone();
        record.attributes.insert(
            "joined_at".to_string(),
            serde_json::json!(chrono::Utc::now().to_rfc3339()),
        );
        record.attributes.insert(
            "server_version".to_string(),
            serde_json::json!(facts.version.to_string()),
        );
        if let Some(label) = &self.opts.label {
            record
                .attributes
                .insert("label".to_string(), serde_json::json!(label));
        }

        let mut txn = MetadataTransaction::new(self.store);
        txn.insert_node(record);
        if self.kind == OperationKind::AddCluster {
            // Presence of the name was checked during validation.
            let name = self.opts.cluster_name.clone().ok_or_else(|| {
                AdminError::Validation("a cluster name is required to attach a cluster".to_string())
            })?;
            txn.insert_cluster(ClusterRecord {
                name,
                primary: facts.node_id,
            });
        }
        let undo = txn.commit().await.map_err(|e| AdminError::from_metastore(&e))?;

        let store = self.store.clone();
        tracker.add("revert metadata registration", move || {
            let store = store.clone();
            let undo = undo.clone();
            Box::pin(async move { undo.apply(&store).await.map_err(|e| e.to_string()) })
        });
        Ok(())
    }

    /// CHANNEL_CONFIGURED -> SYNCHRONIZED. Returns whether the candidate
    /// actually converged; an advisory timeout reaches this state without
    /// convergence and leaves the partial replication state in place.
    async fn synchronize(
        &mut self,
        facts: &CandidateFacts<C::Instance>,
        resolved: &ResolvedSources<C::Instance>,
    ) -> Result<bool, AdminError> {
        if self.opts.dry_run {
            self.report.actions.push(format!(
                "wait until {} catches up with {}",
                facts.canonical_address, resolved.donor_address
            ));
            return Ok(true);
        }

        let required = resolved.donor.applied_transactions().await.map_err(|e| {
            AdminError::from_instance(EndpointRole::Donor, &resolved.donor_address, &e)
        })?;

        let outcome = channel::wait_until_converged(
            &*facts.instance,
            &facts.canonical_address,
            self.kind.channel_name(),
            &required,
            self.opts.sync_timeout,
            self.opts.sync_poll_interval,
            self.cancel,
        )
        .await?;
        self.report.sync = Some(outcome.clone());

        match outcome {
            SyncOutcome::Converged => Ok(true),
            SyncOutcome::Canceled => Err(AdminError::Canceled),
            SyncOutcome::ChannelError(message) => Err(AdminError::Instance {
                address: facts.canonical_address.clone(),
                message,
            }),
            SyncOutcome::TimedOut => match self.kind.sync_timeout_policy() {
                SyncTimeoutPolicy::Fatal => Err(AdminError::SyncTimeout(self.opts.sync_timeout)),
                SyncTimeoutPolicy::Advisory => {
                    warn!(
                        target_node = %facts.canonical_address,
                        timeout = ?self.opts.sync_timeout,
                        "synchronization timed out; replica left catching up"
                    );
                    Ok(false)
                }
            },
        }
    }

    fn transition(&mut self, next: OpState) {
        debug!(from = ?self.state, to = ?next, "state transition");
        self.state = next;
        self.report.state = next;
    }

    fn check_cancel(&self) -> Result<(), AdminError> {
        if self.cancel.is_cancelled() {
            return Err(AdminError::Canceled);
        }
        Ok(())
    }
}
