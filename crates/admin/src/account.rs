//! Per-node replication account provisioning

use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::info;

use meridian_instance::Instance;
use meridian_topology::{NodeAddress, ServerId};

use crate::error::{AdminError, EndpointRole};

/// Prefix of every account this tool manages
pub const ACCOUNT_PREFIX: &str = "meridian_repl_";

const PASSWORD_LEN: usize = 32;

/// Credentials of the replication account provisioned for one node
#[derive(Clone, Debug)]
pub struct ReplicationAccount {
    /// Account name, derived from the node's server id
    pub user: String,

    /// Generated password
    pub password: String,
}

impl ReplicationAccount {
    /// Derive the account for a server id with a fresh random password
    #[must_use]
    pub fn for_server(server_id: ServerId) -> Self {
        let password: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PASSWORD_LEN)
            .map(char::from)
            .collect();
        Self {
            user: format!("{ACCOUNT_PREFIX}{server_id}"),
            password,
        }
    }
}

/// Create the account on the topology's primary, from where it replicates
/// to every member.
///
/// # Errors
///
/// Wraps the primary's statement errors as `Instance` errors.
pub async fn create_account<I: Instance>(
    primary: &I,
    primary_address: &NodeAddress,
    account: &ReplicationAccount,
) -> Result<(), AdminError> {
    info!(user = %account.user, "creating replication account");
    let wrap = |e: &I::Error| AdminError::from_instance(EndpointRole::Primary, primary_address, e);

    primary
        .execute(&format!(
            "CREATE USER '{}'@'%' IDENTIFIED BY '{}'",
            account.user, account.password
        ))
        .await
        .map_err(|e| wrap(&e))?;
    primary
        .execute(&format!(
            "GRANT REPLICATION ON *.* TO '{}'@'%'",
            account.user
        ))
        .await
        .map_err(|e| wrap(&e))?;
    Ok(())
}

/// Drop the account; used by rollback. `IF EXISTS` keeps this a no-op when
/// the create itself never ran.
///
/// # Errors
///
/// Wraps the primary's statement errors as `Instance` errors.
pub async fn drop_account<I: Instance>(
    primary: &I,
    primary_address: &NodeAddress,
    user: &str,
) -> Result<(), AdminError> {
    info!(%user, "dropping replication account");
    primary
        .execute(&format!("DROP USER IF EXISTS '{user}'@'%'"))
        .await
        .map_err(|e| AdminError::from_instance(EndpointRole::Primary, primary_address, &e))?;
    Ok(())
}
