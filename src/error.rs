//! Error taxonomy shared by the adapter runtime and the query surface.
//!
//! Every fallible operation returns `Result<_, BridgeError>`; panics are
//! reserved for aggregator invariant violations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Adapter asked to do work before being given a host/credentials.
    #[error("{0} is not configured")]
    NotConfigured(String),

    /// No connection has been established yet.
    #[error("not connected")]
    NotConnected,

    /// The connection was lost; the next call may reconnect.
    #[error("disconnected")]
    Disconnected,

    /// A request did not complete within its deadline.
    #[error("request timed out")]
    Timeout,

    /// Unparseable XML or an unexpected element on the wire.
    #[error("malformed protocol data: {0}")]
    ProtocolMalformed(String),

    /// The adapter does not implement this operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// No zone or adapter matches the given identifier.
    #[error("not found: {0}")]
    NotFound(String),

    /// The adapter exhausted its restart budget and stays stopped.
    #[error("adapter failed permanently: {0}")]
    Fatal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl BridgeError {
    /// Whether this error corresponds to a caller mistake (4xx-equivalent)
    /// rather than a backend/transport failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotConfigured(_) | Self::Unsupported(_) | Self::NotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_classification() {
        assert!(BridgeError::NotFound("zone".into()).is_client_error());
        assert!(BridgeError::Unsupported("get_image".into()).is_client_error());
        assert!(!BridgeError::Timeout.is_client_error());
        assert!(!BridgeError::Disconnected.is_client_error());
    }
}
