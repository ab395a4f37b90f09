//! Resolution of replication-source policies into concrete donors and
//! source lists
//!
//! Resolution is deterministic: the same policy against the same snapshot
//! always yields the same donor and the same ordered source list. Explicit
//! lists are deduplicated on canonical addresses, so two spellings of the
//! same server are still caught.

use std::sync::Arc;

use tracing::{debug, info};

use meridian_instance::{Connector, Instance};
use meridian_topology::{NodeAddress, NodeRole};

use crate::error::{AdminError, EndpointRole};
use crate::options::{JoinOptions, SourcePolicy};
use crate::view::TopologyView;

/// Failover weight given to the donor / primary entry
const DONOR_WEIGHT: u8 = 80;

/// Failover weight step between successive list entries
const WEIGHT_STEP: u8 = 10;

/// Lowest weight an entry can be assigned
const MIN_WEIGHT: u8 = 10;

/// One concrete replication source with its failover weight
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReplicationSource {
    /// Canonical address of the source
    pub address: NodeAddress,

    /// Failover weight; higher is preferred
    pub weight: u8,
}

/// Outcome of source resolution: one donor plus the ongoing source list
pub struct ResolvedSources<I> {
    /// Handle to the donor used for initial provisioning
    pub donor: Arc<I>,

    /// Canonical address of the donor
    pub donor_address: NodeAddress,

    /// Ordered replication sources, donor first
    pub sources: Vec<ReplicationSource>,
}

/// Resolve the configured policy into a donor and source list.
///
/// # Errors
///
/// Each rejection reason is distinct: unreachable entries, entries that are
/// not registered members, read replicas (which can never feed another
/// node), entries that are not online, and duplicates.
pub async fn resolve<C, I>(
    connector: &C,
    view: &TopologyView<I>,
    opts: &JoinOptions,
) -> Result<ResolvedSources<I>, AdminError>
where
    C: Connector<Instance = I>,
    I: Instance,
{
    let mut resolved = match &opts.source_policy {
        SourcePolicy::Primary => resolve_primary(view)?,
        SourcePolicy::Secondary => resolve_secondary(view)?,
        SourcePolicy::Custom(entries) => resolve_custom(connector, view, opts, entries).await?,
    };

    // A donor override replaces who provisions the data, not who the node
    // replicates from afterwards.
    if let Some(donor_address) = &opts.donor {
        let (donor, donor_address) = resolve_donor_override(connector, view, opts, donor_address).await?;
        resolved.donor = donor;
        resolved.donor_address = donor_address;
    }

    info!(
        donor = %resolved.donor_address,
        sources = resolved.sources.len(),
        "resolved replication sources"
    );
    Ok(resolved)
}

fn resolve_primary<I>(view: &TopologyView<I>) -> Result<ResolvedSources<I>, AdminError>
where
    I: Instance,
{
    let primary = view.primary().ok_or_else(|| {
        AdminError::Validation("topology has no online writable primary".to_string())
    })?;
    let live = primary.live.clone().ok_or_else(|| AdminError::Unreachable {
        role: EndpointRole::Primary,
        address: primary.record.address.clone(),
        reason: "primary is not reachable".to_string(),
    })?;
    Ok(ResolvedSources {
        donor: live,
        donor_address: primary.record.address.clone(),
        sources: vec![ReplicationSource {
            address: primary.record.address.clone(),
            weight: DONOR_WEIGHT,
        }],
    })
}

fn resolve_secondary<I>(view: &TopologyView<I>) -> Result<ResolvedSources<I>, AdminError>
where
    I: Instance,
{
    // online_secondaries is sorted by node id, so the choice is stable
    // across runs against the same live states.
    let secondaries = view.online_secondaries();
    let chosen = secondaries.first().ok_or_else(|| {
        AdminError::Validation("topology has no online secondary member".to_string())
    })?;
    let live = chosen.live.clone().ok_or_else(|| AdminError::Unreachable {
        role: EndpointRole::Source,
        address: chosen.record.address.clone(),
        reason: "secondary is not reachable".to_string(),
    })?;
    Ok(ResolvedSources {
        donor: live,
        donor_address: chosen.record.address.clone(),
        sources: vec![ReplicationSource {
            address: chosen.record.address.clone(),
            weight: DONOR_WEIGHT,
        }],
    })
}

async fn resolve_custom<C, I>(
    connector: &C,
    view: &TopologyView<I>,
    opts: &JoinOptions,
    entries: &[NodeAddress],
) -> Result<ResolvedSources<I>, AdminError>
where
    C: Connector<Instance = I>,
    I: Instance,
{
    if entries.is_empty() {
        return Err(AdminError::Validation(
            "the source list must not be empty".to_string(),
        ));
    }

    let mut donor: Option<(Arc<I>, NodeAddress)> = None;
    let mut sources: Vec<ReplicationSource> = Vec::with_capacity(entries.len());
    let mut seen: Vec<NodeAddress> = Vec::with_capacity(entries.len());

    for (position, entry) in entries.iter().enumerate() {
        let (instance, canonical) =
            connect_and_verify(connector, view, opts, entry, EndpointRole::Source).await?;

        if seen.contains(&canonical) {
            return Err(AdminError::Conflict(format!(
                "duplicate source entry {entry} (canonical {canonical})"
            )));
        }
        seen.push(canonical.clone());

        let weight = DONOR_WEIGHT
            .saturating_sub(WEIGHT_STEP.saturating_mul(u8::try_from(position).unwrap_or(u8::MAX)))
            .max(MIN_WEIGHT);
        debug!(source = %canonical, weight, "accepted source entry");
        sources.push(ReplicationSource {
            address: canonical.clone(),
            weight,
        });

        if donor.is_none() {
            donor = Some((instance, canonical));
        }
    }

    // Non-empty list checked above
    let (donor, donor_address) = donor.expect("source list verified non-empty");
    Ok(ResolvedSources {
        donor,
        donor_address,
        sources,
    })
}

async fn resolve_donor_override<C, I>(
    connector: &C,
    view: &TopologyView<I>,
    opts: &JoinOptions,
    address: &NodeAddress,
) -> Result<(Arc<I>, NodeAddress), AdminError>
where
    C: Connector<Instance = I>,
    I: Instance,
{
    connect_and_verify(connector, view, opts, address, EndpointRole::Donor).await
}

/// Connect to one candidate source and verify it may feed the new node:
/// registered, a full member, and currently online.
async fn connect_and_verify<C, I>(
    connector: &C,
    view: &TopologyView<I>,
    opts: &JoinOptions,
    address: &NodeAddress,
    role: EndpointRole,
) -> Result<(Arc<I>, NodeAddress), AdminError>
where
    C: Connector<Instance = I>,
    I: Instance,
{
    let instance = connector
        .connect(address, &opts.credentials)
        .await
        .map_err(|e| AdminError::from_instance(role, address, &e))?;
    let instance = Arc::new(instance);

    let canonical = instance
        .canonical_address()
        .await
        .map_err(|e| AdminError::from_instance(role, address, &e))?;

    let member = view.member_at(&canonical).ok_or_else(|| {
        AdminError::Validation(format!(
            "{role} {address} (canonical {canonical}) is not a registered topology member"
        ))
    })?;

    if member.record.role == NodeRole::ReadReplica {
        return Err(AdminError::Validation(format!(
            "{role} {canonical} is a read replica and cannot feed another node"
        )));
    }

    let state = instance
        .state()
        .await
        .map_err(|e| AdminError::from_instance(role, address, &e))?;
    if !state.is_online() {
        return Err(AdminError::Validation(format!(
            "{role} {canonical} is {state}, not online"
        )));
    }

    Ok((instance, canonical))
}
