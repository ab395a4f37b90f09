//! Precondition validation for join operations
//!
//! Every check here is read-only. An operation that fails validation has
//! performed no externally visible action, so no compensation is ever
//! needed for this phase. Checks run in a fixed order and depend only on
//! the candidate, the snapshot, the settings and the options, which makes
//! the accept/reject decision repeatable while nothing changes underneath.

use std::sync::Arc;

use tracing::{debug, info, warn};

use meridian_instance::{Instance, ServerVersion};
use meridian_topology::{AuthMode, NodeAddress, NodeId, NodeRole, ServerId};

use crate::channel::{CLUSTER_CHANNEL, MANAGED_CHANNEL};
use crate::error::{AdminError, EndpointRole};
use crate::join::OperationKind;
use crate::options::{JoinOptions, TopologySettings};
use crate::view::TopologyView;

/// Facts gathered about the candidate during validation, reused by every
/// later phase so the candidate is interrogated once.
pub struct CandidateFacts<I> {
    /// Open handle to the candidate
    pub instance: Arc<I>,

    /// The candidate's stable identity
    pub node_id: NodeId,

    /// The candidate's numeric server id
    pub server_id: ServerId,

    /// Address the candidate reports for itself
    pub canonical_address: NodeAddress,

    /// The candidate's software version
    pub version: ServerVersion,
}

/// Run every precondition check against a connected candidate.
///
/// # Errors
///
/// Returns `Validation` or `Conflict` errors per the taxonomy; never
/// mutates anything.
pub async fn validate<I: Instance>(
    kind: OperationKind,
    candidate: Arc<I>,
    view: &TopologyView<I>,
    settings: &TopologySettings,
    opts: &JoinOptions,
) -> Result<CandidateFacts<I>, AdminError> {
    let address = candidate.dialed_address().clone();
    let wrap = |e: &I::Error| AdminError::from_instance(EndpointRole::Target, &address, e);

    let canonical_address = candidate.canonical_address().await.map_err(|e| wrap(&e))?;
    let node_id = candidate.node_id().await.map_err(|e| wrap(&e))?;
    let server_id = candidate.server_id().await.map_err(|e| wrap(&e))?;
    let version = candidate.version().await.map_err(|e| wrap(&e))?;

    info!(
        %node_id,
        address = %canonical_address,
        %version,
        "validating candidate"
    );

    check_membership(&candidate, view, node_id, &canonical_address).await?;
    check_versions(view, settings, version, &canonical_address).await?;
    check_foreign_channels(&candidate, &canonical_address).await?;
    check_collisions(view, node_id, server_id, &canonical_address)?;
    check_auth(&candidate, settings, opts, &canonical_address).await?;
    check_quorum(view)?;
    if kind == OperationKind::AddCluster {
        check_cluster_name(view, opts)?;
    }

    debug!(%node_id, "candidate passed validation");
    Ok(CandidateFacts {
        instance: candidate,
        node_id,
        server_id,
        canonical_address,
        version,
    })
}

/// The candidate must not already belong to a topology, checked against
/// its own (possibly stale) metadata and against our live registry, so a
/// node forcibly removed earlier can be re-added.
async fn check_membership<I: Instance>(
    candidate: &Arc<I>,
    view: &TopologyView<I>,
    node_id: NodeId,
    address: &NodeAddress,
) -> Result<(), AdminError> {
    let local = candidate
        .local_metadata()
        .await
        .map_err(|e| AdminError::from_instance(EndpointRole::Target, address, &e))?;

    let registered = view.members.iter().any(|m| m.record.id == node_id);

    match local {
        Some(meta) if meta.topology_id == view.topology_id => {
            if registered {
                return Err(AdminError::Validation(format!(
                    "{address} is already a member of this topology"
                )));
            }
            // Stale claim with no live registration: the node was removed
            // while offline and may rejoin.
            warn!(%address, "candidate carries stale metadata for this topology; allowing re-add");
        }
        Some(meta) => {
            return Err(AdminError::Validation(format!(
                "{address} already belongs to topology {}",
                meta.topology_id
            )));
        }
        None => {
            if registered {
                return Err(AdminError::Conflict(format!(
                    "node id {node_id} is already registered in this topology"
                )));
            }
        }
    }
    Ok(())
}

/// Both sides of the join must meet the minimum supported version: the
/// candidate, and the topology as observed at its primary.
async fn check_versions<I: Instance>(
    view: &TopologyView<I>,
    settings: &TopologySettings,
    candidate_version: ServerVersion,
    address: &NodeAddress,
) -> Result<(), AdminError> {
    if candidate_version < settings.min_version {
        return Err(AdminError::Validation(format!(
            "{address} runs {candidate_version}, below the minimum supported {}",
            settings.min_version
        )));
    }
    if let Some(primary) = view.primary() {
        if let Some(live) = &primary.live {
            let primary_version = live.version().await.map_err(|e| {
                AdminError::from_instance(EndpointRole::Primary, &primary.record.address, &e)
            })?;
            if primary_version < settings.min_version {
                return Err(AdminError::Validation(format!(
                    "topology primary {} runs {primary_version}, below the minimum supported {}",
                    primary.record.address, settings.min_version
                )));
            }
        }
    }
    Ok(())
}

/// Replication channels not managed by this tool mean the server is already
/// feeding from somewhere we know nothing about.
async fn check_foreign_channels<I: Instance>(
    candidate: &Arc<I>,
    address: &NodeAddress,
) -> Result<(), AdminError> {
    let channels = candidate
        .replication_channels()
        .await
        .map_err(|e| AdminError::from_instance(EndpointRole::Target, address, &e))?;

    for channel in channels {
        if channel.name != MANAGED_CHANNEL && channel.name != CLUSTER_CHANNEL {
            return Err(AdminError::Validation(format!(
                "{address} has an unmanaged replication channel '{}'",
                channel.name
            )));
        }
    }
    Ok(())
}

/// Identity, server id and address must be unique across the whole
/// registry, including unreachable and offline members.
fn check_collisions<I>(
    view: &TopologyView<I>,
    node_id: NodeId,
    server_id: ServerId,
    address: &NodeAddress,
) -> Result<(), AdminError> {
    for member in &view.members {
        if member.record.id == node_id {
            return Err(AdminError::Conflict(format!(
                "node id {node_id} collides with {} ({})",
                member.record.address, member.state
            )));
        }
        if member.record.server_id == server_id {
            return Err(AdminError::Conflict(format!(
                "server id {server_id} collides with {} ({})",
                member.record.address, member.state
            )));
        }
        if member.record.address == *address {
            return Err(AdminError::Conflict(format!(
                "address {address} is already registered"
            )));
        }
    }
    Ok(())
}

async fn check_auth<I: Instance>(
    candidate: &Arc<I>,
    settings: &TopologySettings,
    opts: &JoinOptions,
    address: &NodeAddress,
) -> Result<(), AdminError> {
    let supported = candidate
        .supports_auth_mode(settings.auth_mode)
        .await
        .map_err(|e| AdminError::from_instance(EndpointRole::Target, address, &e))?;
    if !supported {
        return Err(AdminError::Validation(format!(
            "{address} does not support the topology's {:?} authentication mode",
            settings.auth_mode
        )));
    }
    if settings.auth_mode == AuthMode::Certificate && opts.cert_subject.is_none() {
        return Err(AdminError::Validation(
            "certificate authentication requires a certificate subject".to_string(),
        ));
    }
    Ok(())
}

/// A mutation is only safe while a majority of voting members is reachable
/// and online; otherwise the metadata we would write may be on the losing
/// side of a partition.
fn check_quorum<I>(view: &TopologyView<I>) -> Result<(), AdminError> {
    let voting: Vec<_> = view
        .members
        .iter()
        .filter(|m| m.record.role == NodeRole::Member)
        .collect();
    if voting.is_empty() {
        return Err(AdminError::Validation(
            "topology has no registered members to join".to_string(),
        ));
    }
    let online = voting
        .iter()
        .filter(|m| m.live.is_some() && m.state.is_online())
        .count();
    if online * 2 <= voting.len() {
        return Err(AdminError::Validation(format!(
            "only {online} of {} voting members are reachable and online; no quorum",
            voting.len()
        )));
    }
    Ok(())
}

fn check_cluster_name<I>(view: &TopologyView<I>, opts: &JoinOptions) -> Result<(), AdminError> {
    let name = opts.cluster_name.as_ref().ok_or_else(|| {
        AdminError::Validation("a cluster name is required to attach a cluster".to_string())
    })?;
    for existing in &view.clusters {
        if existing.name.eq_ignore_case(name.as_str()) {
            return Err(AdminError::Conflict(format!(
                "cluster name '{name}' collides with existing cluster '{}'",
                existing.name
            )));
        }
    }
    Ok(())
}
