//! Error types for Tether
//!
//! This module defines the error kinds reported by every fallible operation in
//! the workspace. The facade returns them as structured values; the boundary
//! crates flatten them to success flags and keep the rendered message around
//! for callers that want the detail.

#![allow(missing_docs)]

use crate::state::ConnectionState;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for Tether operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for Tether operations
#[derive(Error, Debug)]
pub enum Error {
    /// The handshake did not complete before the deadline
    #[error("Connect timed out after {timeout:?}")]
    ConnectTimeout { timeout: Duration },

    /// The server answered the upgrade request with a non-101 status
    #[error("Connect rejected with HTTP status {status}")]
    ConnectRejected {
        status: http::StatusCode,
        headers: http::HeaderMap,
    },

    /// Network failure before any handshake response arrived
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// No live transport binding
    #[error("Not connected")]
    NotConnected,

    /// Transport-level send error
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Transport-level receive error, terminal for the current binding
    #[error("Read failed: {0}")]
    ReadFailed(String),

    /// The server address could not be used
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The operation is not legal in the current connection state
    #[error("Operation not allowed while {state}")]
    InvalidState { state: ConnectionState },

    /// A connection attempt was cancelled by `close`
    #[error("Connection attempt aborted by close")]
    Aborted,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Create an invalid address error
    pub fn invalid_address(address: impl Into<String>, reason: impl ToString) -> Self {
        Error::InvalidAddress {
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error came out of connection establishment
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            Error::ConnectTimeout { .. } | Error::ConnectRejected { .. } | Error::ConnectFailed(_)
        )
    }

    /// Whether the reconnect policy may retry after this error.
    ///
    /// A rejected handshake is final: the server has looked at the credentials
    /// and said no, so retrying on a timer only hammers it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ConnectTimeout { .. }
                | Error::ConnectFailed(_)
                | Error::WriteFailed(_)
                | Error::ReadFailed(_)
        )
    }

    /// HTTP status of a rejected handshake
    pub fn status(&self) -> Option<http::StatusCode> {
        match self {
            Error::ConnectRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// Missing required configuration
    #[error("Missing required configuration: {field}")]
    MissingField { field: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, value: impl ToString) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ConnectTimeout {
            timeout: Duration::from_secs(3),
        };
        assert_eq!(err.to_string(), "Connect timed out after 3s");

        let err = Error::InvalidState {
            state: ConnectionState::Reconnecting,
        };
        assert_eq!(err.to_string(), "Operation not allowed while reconnecting");
    }

    #[test]
    fn test_error_classification() {
        let rejected = Error::ConnectRejected {
            status: http::StatusCode::UNAUTHORIZED,
            headers: http::HeaderMap::new(),
        };
        assert!(rejected.is_connect_error());
        assert!(!rejected.is_recoverable());
        assert_eq!(rejected.status(), Some(http::StatusCode::UNAUTHORIZED));

        assert!(Error::ReadFailed("reset".into()).is_recoverable());
        assert!(!Error::ReadFailed("reset".into()).is_connect_error());
        assert!(!Error::NotConnected.is_recoverable());
        assert!(!Error::Aborted.is_recoverable());
        assert_eq!(Error::NotConnected.status(), None);
    }

    #[test]
    fn test_config_error_conversion() {
        let err: Error = ConfigError::Validation("bad".into()).into();
        assert!(matches!(err, Error::Config(ConfigError::Validation(_))));
        assert!(err.to_string().contains("bad"));
    }
}
