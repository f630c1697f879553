//! Error types for the discovery coordinator

use pir_core::error::ResolutionError;
use pir_core::types::DeviceId;
use thiserror::Error;

/// Result type alias for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Errors that can occur during device discovery
///
/// All of these are scoped to a single announcement or device; none of them
/// stops the discovery loop.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// mDNS service daemon failed to initialize
    #[error("Failed to initialize mDNS daemon: {0}")]
    MdnsInitFailed(String),

    /// Failed to browse for services
    #[error("Failed to browse for service type '{service_type}': {reason}")]
    BrowseFailed { service_type: String, reason: String },

    /// Announcement is missing an attribute needed to identify the device
    #[error("Invalid announcement '{service_name}': {reason}")]
    InvalidAnnouncement {
        service_name: String,
        reason: String,
    },

    /// Advertised hostname could not be resolved
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// No record exists for the device
    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),

    /// Invalid discovery configuration
    #[error("Invalid discovery configuration: {0}")]
    InvalidConfig(String),

    /// Coordinator already started
    #[error("Discovery coordinator is already running")]
    AlreadyStarted,

    /// Announcement arrived after shutdown began
    #[error("Discovery coordinator is shutting down")]
    ShuttingDown,
}

impl DiscoveryError {
    /// Creates an invalid announcement error.
    pub fn invalid_announcement(
        service_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidAnnouncement {
            service_name: service_name.into(),
            reason: reason.into(),
        }
    }
}
