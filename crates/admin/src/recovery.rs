//! Choice of how a joining node's data is provisioned
//!
//! The decision is made exactly once per operation, before any provisioning
//! step runs, and never revisited; a node whose state drifts mid-operation
//! fails and rolls back rather than silently switching strategies.

use tracing::{info, warn};

use meridian_instance::{Instance, ServerVersion};
use meridian_topology::{HistoryComparison, NodeAddress, compare_histories};

use crate::error::{AdminError, EndpointRole};
use crate::options::JoinOptions;

/// Oldest donor version able to serve a physical clone
pub const MIN_CLONE_VERSION: ServerVersion = ServerVersion::new(8, 1, 0);

/// How a joining node's initial data is provisioned
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RecoveryMethod {
    /// Decide from the history comparison
    #[default]
    Auto,

    /// Replay the donor's log from where the candidate stopped
    Incremental,

    /// Physically copy the donor's data
    Clone,
}

/// The resolved provisioning decision for one operation
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RecoveryDecision {
    /// Concrete method; never [`RecoveryMethod::Auto`]
    pub method: RecoveryMethod,

    /// The history comparison the decision was based on
    pub comparison: HistoryComparison,
}

/// Compare histories and resolve the requested method to a concrete one.
///
/// # Errors
///
/// Returns `IrrecoverableHistory` when incremental recovery is impossible
/// and clone cannot run (or was refused), and `Validation` when an
/// explicitly requested clone is unsupported by the donor.
pub async fn select<I: Instance>(
    donor: &I,
    donor_address: &NodeAddress,
    candidate: &I,
    candidate_address: &NodeAddress,
    opts: &JoinOptions,
) -> Result<RecoveryDecision, AdminError> {
    let candidate_applied = candidate
        .applied_transactions()
        .await
        .map_err(|e| AdminError::from_instance(EndpointRole::Target, candidate_address, &e))?;
    let donor_applied = donor
        .applied_transactions()
        .await
        .map_err(|e| AdminError::from_instance(EndpointRole::Donor, donor_address, &e))?;
    let donor_purged = donor
        .purged_transactions()
        .await
        .map_err(|e| AdminError::from_instance(EndpointRole::Donor, donor_address, &e))?;

    let mut comparison = compare_histories(&candidate_applied, &donor_applied, &donor_purged);
    if comparison == HistoryComparison::Irrecoverable && opts.history_is_known_complete {
        // The operator asserts the recorded history is gap-free, which is
        // exactly the knowledge the purged set denies us.
        warn!("treating purged history gap as recoverable: operator asserts history is complete");
        comparison = HistoryComparison::Recoverable;
    }

    let donor_version = donor
        .version()
        .await
        .map_err(|e| AdminError::from_instance(EndpointRole::Donor, donor_address, &e))?;
    let clone_available = donor_version >= MIN_CLONE_VERSION;

    let method = match opts.recovery_method {
        RecoveryMethod::Clone => {
            if !clone_available {
                return Err(AdminError::Validation(format!(
                    "clone was requested but donor {donor_address} runs {donor_version}, below {MIN_CLONE_VERSION}"
                )));
            }
            RecoveryMethod::Clone
        }
        RecoveryMethod::Incremental => match comparison {
            HistoryComparison::Identical | HistoryComparison::Recoverable => {
                RecoveryMethod::Incremental
            }
            HistoryComparison::Irrecoverable => {
                return Err(AdminError::IrrecoverableHistory(format!(
                    "incremental recovery was requested but donor {donor_address} has purged transactions {candidate_address} needs"
                )));
            }
        },
        RecoveryMethod::Auto => match comparison {
            HistoryComparison::Identical | HistoryComparison::Recoverable => {
                RecoveryMethod::Incremental
            }
            HistoryComparison::Irrecoverable if clone_available => RecoveryMethod::Clone,
            HistoryComparison::Irrecoverable => {
                let accepted = opts.interactive
                    && opts.confirm.as_ref().is_some_and(|confirm| {
                        confirm(&format!(
                            "Donor {donor_address} has purged transactions {candidate_address} needs and clone is unavailable. Proceed with incremental recovery anyway?"
                        ))
                    });
                if accepted {
                    warn!("operator accepted incremental recovery across a purged history gap");
                    RecoveryMethod::Incremental
                } else {
                    return Err(AdminError::IrrecoverableHistory(format!(
                        "donor {donor_address} has purged transactions {candidate_address} needs; clone is required but unavailable"
                    )));
                }
            }
        },
    };

    info!(?method, ?comparison, "recovery method resolved");
    Ok(RecoveryDecision { method, comparison })
}
