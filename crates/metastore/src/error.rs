//! Error contract for metastore implementations

use std::error::Error;
use std::fmt::{self, Debug};

/// The kind of metastore error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetastoreErrorKind {
    /// A write collided with an existing registration
    Conflict,

    /// A referenced node or cluster does not exist
    NotFound,

    /// The underlying storage failed
    Storage,

    /// Other/unknown error
    Other,
}

impl fmt::Display for MetastoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Marker trait for [`crate::Metastore`] errors
pub trait MetastoreError: Debug + Error + Send + Sync + 'static {
    /// Returns the kind of this error
    fn kind(&self) -> MetastoreErrorKind;
}
