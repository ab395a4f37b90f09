//! Error type for the in-memory metastore

use meridian_metastore::{MetastoreError, MetastoreErrorKind};
use thiserror::Error as ThisError;

/// Errors produced by [`crate::MemoryMetastore`]
#[derive(Clone, Debug, ThisError)]
pub enum Error {
    /// A write collided with an existing registration
    #[error("conflict: {0}")]
    Conflict(String),

    /// A referenced node or cluster does not exist
    #[error("not found: {0}")]
    NotFound(String),
}

impl MetastoreError for Error {
    fn kind(&self) -> MetastoreErrorKind {
        match self {
            Self::Conflict(_) => MetastoreErrorKind::Conflict,
            Self::NotFound(_) => MetastoreErrorKind::NotFound,
        }
    }
}
