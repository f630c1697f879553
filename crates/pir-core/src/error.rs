//! Error types for the PIR sensor bridge.
//!
//! Every failure in the discovery-to-connection lifecycle is local to a single
//! device: a failed resolution drops one announcement, a stalled handshake is
//! retried by the transport, and a malformed payload is discarded. None of these
//! errors is escalated to the process. All errors are serializable for logging.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using PirError as the error type.
pub type Result<T> = std::result::Result<T, PirError>;

/// Top-level error type for all bridge operations.
#[derive(Debug, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum PirError {
    /// Hostname resolution errors
    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    /// Device connection errors
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Device payload errors
    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while turning an advertised hostname into an address.
///
/// The announcement that triggered the lookup is dropped; the device is picked
/// up again on the next periodic re-scan.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResolutionError {
    /// The resolver rejected or failed the query
    #[error("Failed to resolve {host}: {reason}")]
    Unresolvable { host: String, reason: String },

    /// No answer arrived within the resolver timeout
    #[error("Resolving {host} timed out after {timeout_ms}ms")]
    Timeout { host: String, timeout_ms: u64 },

    /// The name resolved, but only to non-IPv4 addresses
    #[error("No IPv4 address found for {host}")]
    NoIpv4 { host: String },
}

impl ResolutionError {
    /// Creates an unresolvable error.
    pub fn unresolvable(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unresolvable {
            host: host.into(),
            reason: reason.into(),
        }
    }

    /// Returns the hostname that failed to resolve.
    pub fn host(&self) -> &str {
        match self {
            ResolutionError::Unresolvable { host, .. }
            | ResolutionError::Timeout { host, .. }
            | ResolutionError::NoIpv4 { host } => host,
        }
    }
}

/// Errors related to the persistent device connection.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionError {
    /// The websocket handshake did not complete in time
    #[error("Handshake with {endpoint} timed out after {timeout_ms}ms")]
    HandshakeTimeout { endpoint: String, timeout_ms: u64 },

    /// Failed to establish a connection
    #[error("Failed to connect to {endpoint}: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    /// Connection was closed by the device or the network
    #[error("Connection closed: {reason}")]
    Closed { reason: String },

    /// Writing to the socket failed
    #[error("Failed to send to device: {reason}")]
    SendFailed { reason: String },
}

impl ConnectionError {
    /// Creates a connection failed error.
    pub fn failed(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectFailed {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Creates a connection closed error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: reason.into(),
        }
    }
}

/// Errors related to payloads received from a device.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageError {
    /// Payload is not JSON or does not match the status shape
    #[error("Malformed device message: {reason}")]
    Malformed { reason: String },
}

impl MessageError {
    /// Creates a malformed message error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

/// Errors related to configuration.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },
}

impl ConfigError {
    /// Creates a file not found error.
    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a validation failed error.
    pub fn validation_failed(reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_helpers() {
        let err = ConnectionError::failed("10.0.0.5:8080", "connection refused");
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(
            ConnectionError::closed("reset"),
            ConnectionError::Closed {
                reason: "reset".to_string()
            }
        );
    }

    #[test]
    fn test_handshake_timeout_display() {
        let err = ConnectionError::HandshakeTimeout {
            endpoint: "10.0.0.5:8080".to_string(),
            timeout_ms: 2000,
        };
        let display = err.to_string();
        assert!(display.contains("10.0.0.5:8080"));
        assert!(display.contains("2000ms"));
    }

    #[test]
    fn test_resolution_error_host() {
        let err = ResolutionError::unresolvable("x.local", "no answer");
        assert_eq!(err.host(), "x.local");

        let err = ResolutionError::Timeout {
            host: "y.local".to_string(),
            timeout_ms: 3000,
        };
        assert_eq!(err.host(), "y.local");
    }

    #[test]
    fn test_error_serialization() {
        let err = PirError::Resolution(ResolutionError::NoIpv4 {
            host: "x.local".to_string(),
        });
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("Resolution"));
        assert!(json.contains("x.local"));
    }

    #[test]
    fn test_config_error_helpers() {
        let err = ConfigError::file_not_found("/etc/pir-bridge/config.yaml");
        assert!(matches!(err, ConfigError::FileNotFound { .. }));

        let err = ConfigError::invalid_value("devices.no_motion_delay_ms", "must be positive");
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_message_error_into_pir_error() {
        let err: PirError = MessageError::malformed("expected value at line 1").into();
        assert!(matches!(err, PirError::Message(_)));
    }
}
