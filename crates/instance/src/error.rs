//! Error contract for instance implementations

use std::error::Error;
use std::fmt::{self, Debug};

/// The kind of instance error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstanceErrorKind {
    /// The server could not be reached or rejected the connection
    Connection,

    /// A statement or query failed on the server
    Statement,

    /// The server lacks a capability the caller asked for
    Unsupported,

    /// Other/unknown error
    Other,
}

impl fmt::Display for InstanceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Marker trait for [`crate::Instance`] errors
pub trait InstanceError: Debug + Error + Send + Sync + 'static {
    /// Returns the kind of this error
    fn kind(&self) -> InstanceErrorKind;
}
