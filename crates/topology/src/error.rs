//! Error types for the topology model

use thiserror::Error;

/// Errors raised while parsing or validating topology model values
#[derive(Clone, Debug, Error)]
pub enum TopologyError {
    /// A node address could not be parsed or canonicalized
    #[error("invalid node address '{0}': {1}")]
    InvalidAddress(String, String),

    /// A transaction set string was malformed
    #[error("invalid transaction set: {0}")]
    InvalidTransactionSet(String),

    /// A cluster name did not satisfy the naming rules
    #[error("invalid cluster name '{0}': {1}")]
    InvalidClusterName(String, String),
}
