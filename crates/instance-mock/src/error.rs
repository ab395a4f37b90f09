//! Error type for the mock instance

use meridian_instance::{InstanceError, InstanceErrorKind};
use thiserror::Error as ThisError;

/// Errors produced by [`crate::MockInstance`] and [`crate::MockConnector`]
#[derive(Clone, Debug, ThisError)]
pub enum Error {
    /// Connection failed or the address is scripted as unreachable
    #[error("connection error: {0}")]
    Connection(String),

    /// A statement failed, usually by test script
    #[error("statement error: {0}")]
    Statement(String),
}

impl InstanceError for Error {
    fn kind(&self) -> InstanceErrorKind {
        match self {
            Self::Connection(_) => InstanceErrorKind::Connection,
            Self::Statement(_) => InstanceErrorKind::Statement,
        }
    }
}
