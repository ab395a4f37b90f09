//! Replication channel configuration and the synchronization barrier

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use meridian_instance::{ChannelState, Instance};
use meridian_topology::{AuthMode, NodeAddress, TransactionSet};

use crate::account::ReplicationAccount;
use crate::error::{AdminError, EndpointRole};
use crate::sources::ReplicationSource;

/// Channel name used for member and replica replication
pub const MANAGED_CHANNEL: &str = "meridian_applier";

/// Channel name used when attaching a whole cluster
pub const CLUSTER_CHANNEL: &str = "meridian_cluster_applier";

/// Tuning applied when a channel is created
#[derive(Clone, Debug)]
pub struct ChannelSettings {
    /// Channel name
    pub name: String,

    /// Reconnection attempts before the receiver gives up
    pub retry_count: u32,

    /// Seconds between reconnection attempts
    pub connect_retry_secs: u32,

    /// Seconds between heartbeats when the source is idle
    pub heartbeat_secs: u32,

    /// Compress the replication stream
    pub compression: bool,

    /// Authentication mode, which decides the channel's SSL mode
    pub auth_mode: AuthMode,
}

impl ChannelSettings {
    /// Defaults for the given channel name and auth mode
    #[must_use]
    pub fn new(name: &str, auth_mode: AuthMode) -> Self {
        Self {
            name: name.to_string(),
            retry_count: 10,
            connect_retry_secs: 10,
            heartbeat_secs: 30,
            compression: false,
            auth_mode,
        }
    }

    fn ssl_mode(&self) -> &'static str {
        match self.auth_mode {
            AuthMode::Password => "REQUIRED",
            AuthMode::Certificate => "VERIFY_IDENTITY",
        }
    }
}

/// Configure and start a replication channel on the candidate.
///
/// The first source is the main one; the rest are installed as weighted
/// failover alternatives. Statements are issued sequentially and the first
/// failure aborts the whole configuration.
///
/// # Errors
///
/// Wraps the candidate's statement errors as `Instance` errors.
pub async fn configure_channel<I: Instance>(
    candidate: &I,
    candidate_address: &NodeAddress,
    sources: &[ReplicationSource],
    account: &ReplicationAccount,
    settings: &ChannelSettings,
) -> Result<(), AdminError> {
    let main = sources.first().ok_or_else(|| {
        AdminError::Validation("cannot configure a channel with no sources".to_string())
    })?;

    info!(
        channel = %settings.name,
        source = %main.address,
        failover_sources = sources.len() - 1,
        "configuring replication channel"
    );

    let wrap = |e: &I::Error| AdminError::from_instance(EndpointRole::Target, candidate_address, e);

    let compression = if settings.compression { "zstd" } else { "none" };
    candidate
        .execute(&format!(
            "CHANGE REPLICATION SOURCE TO SOURCE_HOST='{}', SOURCE_PORT={}, SOURCE_USER='{}', \
             SOURCE_PASSWORD='{}', SOURCE_RETRY_COUNT={}, SOURCE_CONNECT_RETRY={}, \
             SOURCE_HEARTBEAT_PERIOD={}, SOURCE_COMPRESSION='{}', SOURCE_SSL_MODE='{}' \
             FOR CHANNEL '{}'",
            main.address.host(),
            main.address.port(),
            account.user,
            account.password,
            settings.retry_count,
            settings.connect_retry_secs,
            settings.heartbeat_secs,
            compression,
            settings.ssl_mode(),
            settings.name,
        ))
        .await
        .map_err(|e| wrap(&e))?;

    for source in &sources[1..] {
        candidate
            .execute(&format!(
                "ADD REPLICATION FAILOVER SOURCE SOURCE_HOST='{}', SOURCE_PORT={}, WEIGHT={} \
                 FOR CHANNEL '{}'",
                source.address.host(),
                source.address.port(),
                source.weight,
                settings.name,
            ))
            .await
            .map_err(|e| wrap(&e))?;
    }

    candidate
        .execute(&format!("START REPLICA FOR CHANNEL '{}'", settings.name))
        .await
        .map_err(|e| wrap(&e))?;

    Ok(())
}

/// Stop and deconfigure a channel; used by rollback.
///
/// # Errors
///
/// Wraps the candidate's statement errors as `Instance` errors.
pub async fn teardown_channel<I: Instance>(
    candidate: &I,
    candidate_address: &NodeAddress,
    channel: &str,
) -> Result<(), AdminError> {
    let wrap = |e: &I::Error| AdminError::from_instance(EndpointRole::Target, candidate_address, e);
    candidate
        .execute(&format!("STOP REPLICA FOR CHANNEL '{channel}'"))
        .await
        .map_err(|e| wrap(&e))?;
    candidate
        .execute(&format!("RESET REPLICA ALL FOR CHANNEL '{channel}'"))
        .await
        .map_err(|e| wrap(&e))?;
    Ok(())
}

/// Outcome of waiting for a candidate to converge
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SyncOutcome {
    /// The candidate's applied set covers everything required
    Converged,

    /// The deadline passed with the channel still healthy; advisory, the
    /// candidate may simply be catching up slowly
    TimedOut,

    /// The channel itself reported an error while we waited
    ChannelError(String),

    /// The operator interrupted the wait
    Canceled,
}

/// Poll the candidate until its applied set is a superset of `required`.
///
/// Cancellation and timeout are both checked every iteration; when both
/// fire at once, cancellation wins. A channel error observed mid-wait is
/// reported immediately instead of letting the deadline run out.
///
/// # Errors
///
/// Only remote-call failures surface as errors; timeout, cancellation and
/// channel errors are values in [`SyncOutcome`], because their handling is
/// operation policy, not a property of the wait itself.
pub async fn wait_until_converged<I: Instance>(
    candidate: &I,
    candidate_address: &NodeAddress,
    channel: &str,
    required: &TransactionSet,
    timeout: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<SyncOutcome, AdminError> {
    let deadline = tokio::time::Instant::now() + timeout;
    let wrap = |e: &I::Error| AdminError::from_instance(EndpointRole::Target, candidate_address, e);

    info!(
        %channel,
        required = %required,
        ?timeout,
        "waiting for candidate to converge"
    );

    loop {
        // Cancellation takes precedence over everything, including an
        // already-elapsed deadline.
        if cancel.is_cancelled() {
            return Ok(SyncOutcome::Canceled);
        }

        let channels = candidate
            .replication_channels()
            .await
            .map_err(|e| wrap(&e))?;
        if let Some(status) = channels.iter().find(|c| c.name == channel) {
            if status.state == ChannelState::Error {
                let message = status
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "replication channel failed".to_string());
                warn!(%channel, %message, "channel error during synchronization");
                return Ok(SyncOutcome::ChannelError(message));
            }
        }

        let applied = candidate
            .applied_transactions()
            .await
            .map_err(|e| wrap(&e))?;
        if required.is_subset_of(&applied) {
            info!(%channel, "candidate converged");
            return Ok(SyncOutcome::Converged);
        }
        debug!(
            missing = %required.subtract(&applied),
            "candidate still catching up"
        );

        if tokio::time::Instant::now() >= deadline {
            return Ok(SyncOutcome::TimedOut);
        }

        tokio::select! {
            () = cancel.cancelled() => return Ok(SyncOutcome::Canceled),
            () = tokio::time::sleep(poll_interval) => {}
        }
    }
}
