//! Live snapshot of a topology taken at the start of an operation

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use meridian_instance::{Connector, Credentials, Instance};
use meridian_metastore::{ClusterRecord, Metastore};
use meridian_topology::{NodeAddress, NodeRecord, NodeRole, NodeState};

use crate::error::AdminError;

/// One registered member plus whatever could be learned about it live
pub struct MemberView<I> {
    /// The member's durable registration
    pub record: NodeRecord,

    /// Open handle, absent when the member could not be reached
    pub live: Option<Arc<I>>,

    /// State observed over the live handle; falls back to the recorded
    /// state for unreachable members
    pub state: NodeState,
}

/// Registered membership joined with live reachability, observed once.
///
/// Safety against concurrent mutation comes from this snapshot being taken
/// immediately before validation, not from any lock on the topology.
pub struct TopologyView<I> {
    /// Identifier of the topology
    pub topology_id: Uuid,

    /// Every registered node, including unreachable and offline ones
    pub members: Vec<MemberView<I>>,

    /// Every registered sub-cluster
    pub clusters: Vec<ClusterRecord>,
}

impl<I: Instance> TopologyView<I> {
    /// Probe every registered node and assemble the snapshot.
    ///
    /// Unreachable members stay in the view with `live: None`; deciding
    /// whether that is acceptable is the validator's job, not ours.
    ///
    /// # Errors
    ///
    /// Fails only when the metastore itself cannot be read.
    pub async fn load<C, S>(
        connector: &C,
        store: &S,
        credentials: &Credentials,
    ) -> Result<Self, AdminError>
    where
        C: Connector<Instance = I>,
        S: Metastore,
    {
        let topology_id = store
            .topology_id()
            .await
            .map_err(|e| AdminError::from_metastore(&e))?;
        let records = store
            .nodes()
            .await
            .map_err(|e| AdminError::from_metastore(&e))?;
        let clusters = store
            .clusters()
            .await
            .map_err(|e| AdminError::from_metastore(&e))?;

        let mut members = Vec::with_capacity(records.len());
        for record in records {
            let view = match connector.connect(&record.address, credentials).await {
                Ok(instance) => {
                    let instance = Arc::new(instance);
                    match instance.state().await {
                        Ok(state) => {
                            debug!(node = %record.id, %state, "probed member");
                            MemberView {
                                record,
                                live: Some(instance),
                                state,
                            }
                        }
                        Err(e) => {
                            warn!(node = %record.id, error = %e, "member state query failed");
                            MemberView {
                                record,
                                live: None,
                                state: NodeState::Unreachable,
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(node = %record.id, error = %e, "member unreachable");
                    MemberView {
                        record,
                        live: None,
                        state: NodeState::Unreachable,
                    }
                }
            };
            members.push(view);
        }

        Ok(Self {
            topology_id,
            members,
            clusters,
        })
    }

    /// The current primary: the online, writable full member
    pub fn primary(&self) -> Option<&MemberView<I>> {
        self.members.iter().find(|m| {
            m.record.role == NodeRole::Member
                && matches!(m.state, NodeState::Online { writable: true })
        })
    }

    /// Online non-primary full members, ordered by node id for determinism
    pub fn online_secondaries(&self) -> Vec<&MemberView<I>> {
        let mut secondaries: Vec<&MemberView<I>> = self
            .members
            .iter()
            .filter(|m| {
                m.record.role == NodeRole::Member
                    && matches!(m.state, NodeState::Online { writable: false })
            })
            .collect();
        secondaries.sort_by_key(|m| m.record.id);
        secondaries
    }

    /// Find a member by canonical address
    pub fn member_at(&self, address: &NodeAddress) -> Option<&MemberView<I>> {
        self.members.iter().find(|m| m.record.address == *address)
    }
}
