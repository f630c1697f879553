//! Configuration types for device discovery

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the mDNS discovery coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Enable automatic device discovery
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// DNS-SD service type the sensors advertise under
    #[serde(default = "default_service_type")]
    pub service_type: String,

    /// Value the `type` TXT attribute must carry for an announcement to be accepted
    #[serde(default = "default_device_type")]
    pub device_type: String,

    /// Delay before the first re-scan after start (seconds)
    #[serde(default = "default_initial_rescan_delay")]
    pub initial_rescan_delay_secs: u64,

    /// Interval between periodic re-scans (seconds)
    #[serde(default = "default_rescan_interval")]
    pub rescan_interval_secs: u64,

    /// Upper bound for a single hostname lookup (milliseconds)
    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            service_type: default_service_type(),
            device_type: default_device_type(),
            initial_rescan_delay_secs: default_initial_rescan_delay(),
            rescan_interval_secs: default_rescan_interval(),
            resolve_timeout_ms: default_resolve_timeout(),
        }
    }
}

impl DiscoveryConfig {
    /// Returns the initial re-scan delay as a Duration
    pub fn initial_rescan_delay(&self) -> Duration {
        Duration::from_secs(self.initial_rescan_delay_secs)
    }

    /// Returns the re-scan interval as a Duration
    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_interval_secs)
    }

    /// Returns the resolver timeout as a Duration
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    /// Returns the fully-qualified service type (with the trailing dot mdns-sd expects)
    pub fn service_type_fqdn(&self) -> String {
        let trimmed = self.service_type.trim();
        if trimmed.ends_with(".local.") {
            trimmed.to_string()
        } else if trimmed.ends_with(".local") {
            format!("{}.", trimmed)
        } else {
            format!("{}.local.", trimmed.trim_end_matches('.'))
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.device_type.trim().is_empty() {
            return Err("device_type cannot be empty".to_string());
        }

        if !self.service_type.contains("._tcp") && !self.service_type.contains("._udp") {
            return Err(format!(
                "service_type '{}' must name a _tcp or _udp service",
                self.service_type
            ));
        }

        if self.rescan_interval_secs == 0 {
            return Err("rescan_interval_secs cannot be 0".to_string());
        }

        if self.resolve_timeout_ms == 0 {
            return Err("resolve_timeout_ms cannot be 0".to_string());
        }

        Ok(())
    }
}

// Default configuration values
fn default_enabled() -> bool {
    true
}

fn default_service_type() -> String {
    "_oznu-platform._tcp.local.".to_string()
}

fn default_device_type() -> String {
    "pir".to_string()
}

fn default_initial_rescan_delay() -> u64 {
    5 // Catch devices that were mid-advertisement at launch
}

fn default_rescan_interval() -> u64 {
    60
}

fn default_resolve_timeout() -> u64 {
    3000
}
