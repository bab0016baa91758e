//! Error handling for the console engine.
//!
//! Two layers: [`RemoteError`] is everything the device bridge boundary can
//! report, [`ConsoleError`] adds the failures the engine rejects locally
//! before any remote call is made.

use thiserror::Error;

/// Failure surfaced from the remote device API boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote call did not answer within the configured timeout.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The device bridge answered but refused the operation.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The device bridge could not be reached at all.
    #[error("Device unreachable: {0}")]
    Unreachable(String),
}

impl RemoteError {
    pub fn timeout(msg: impl Into<String>) -> Self {
        RemoteError::Timeout(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        RemoteError::Rejected(msg.into())
    }

    pub fn unreachable(msg: impl Into<String>) -> Self {
        RemoteError::Unreachable(msg.into())
    }
}

/// Console engine error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsoleError {
    /// Malformed input (bad IP, zero count). Rejected before any remote call.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A read or write was attempted without an established session.
    #[error("Not connected to device")]
    NotConnected,

    /// A status check revealed the remote side dropped the session.
    #[error("Stale connection: {0}")]
    StaleConnection(String),

    /// Failure reported by the remote device API.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl ConsoleError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        ConsoleError::InvalidArgument(msg.into())
    }

    pub fn stale(msg: impl Into<String>) -> Self {
        ConsoleError::StaleConnection(msg.into())
    }
}

/// Result type alias for the console engine.
pub type Result<T> = std::result::Result<T, ConsoleError>;
