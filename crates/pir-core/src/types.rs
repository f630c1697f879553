//! Core types for the PIR sensor bridge.
//!
//! This module defines the device identity, the configuration snapshot that is
//! handed to a device connection on every (re)discovery, and the accessory
//! handles exchanged with the host application.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Namespace for deriving device identities from hardware addresses.
const DEVICE_NAMESPACE: Uuid = Uuid::from_u128(0x6f7a_6e75_2d70_6972_8000_0000_0000_0001);

/// Default quiescence delay forwarded to a device (milliseconds).
pub const DEFAULT_NO_MOTION_DELAY_MS: u64 = 30_000;

/// Stable identifier for one physical device.
///
/// Derived deterministically from the device's hardware address and nothing
/// else, so the same sensor keeps its identity when its host or port changes.
///
/// # Examples
///
/// ```
/// use pir_core::types::DeviceId;
///
/// let a = DeviceId::from_hardware_id("AA:BB:CC:DD:EE:FF");
/// let b = DeviceId::from_hardware_id("AA:BB:CC:DD:EE:FF");
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// Derives the identity for a colon-delimited hardware address.
    ///
    /// The address is trimmed and upper-cased first, so differently cased
    /// advertisements of the same device collapse onto one identity.
    pub fn from_hardware_id(hardware_id: &str) -> Self {
        let normalized = normalize_hardware_id(hardware_id);
        Self(Uuid::new_v5(&DEVICE_NAMESPACE, normalized.as_bytes()))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DeviceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

fn normalize_hardware_id(hardware_id: &str) -> String {
    hardware_id.trim().to_ascii_uppercase()
}

/// Returns the accessory handle name for a hardware address (`AA:BB:..` → `AABB..`).
pub fn display_handle(hardware_id: &str) -> String {
    normalize_hardware_id(hardware_id).replace(':', "")
}

/// Configuration snapshot for one device connection.
///
/// Built fresh on every discovery announcement and pushed to the device's
/// connection, which forwards the quiescence delay to the device itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Resolved device address
    pub host: String,

    /// Advertised control port
    pub port: u16,

    /// Advertised instance name
    pub name: String,

    /// Hardware address the identity was derived from
    pub serial: String,

    /// Quiescence delay the device applies before reporting "motion cleared"
    #[serde(default = "default_no_motion_delay")]
    pub no_motion_delay_ms: u64,
}

fn default_no_motion_delay() -> u64 {
    DEFAULT_NO_MOTION_DELAY_MS
}

impl DeviceConfig {
    /// Creates a new builder for DeviceConfig.
    pub fn builder() -> DeviceConfigBuilder {
        DeviceConfigBuilder::default()
    }

    /// Returns the `host:port` endpoint of the device.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the websocket URL of the device's control endpoint.
    pub fn url(&self) -> String {
        format!("ws://{}", self.endpoint())
    }

    /// Returns true if `other` points at a different network endpoint.
    pub fn endpoint_differs(&self, other: &DeviceConfig) -> bool {
        self.host != other.host || self.port != other.port
    }

    /// Returns the device identity derived from the serial.
    pub fn device_id(&self) -> DeviceId {
        DeviceId::from_hardware_id(&self.serial)
    }

    /// Label used to tag log output for this device.
    pub fn label(&self) -> String {
        if self.name.is_empty() {
            display_handle(&self.serial)
        } else {
            self.name.clone()
        }
    }
}

/// Builder for DeviceConfig.
#[derive(Default)]
pub struct DeviceConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    name: Option<String>,
    serial: Option<String>,
    no_motion_delay_ms: Option<u64>,
}

impl DeviceConfigBuilder {
    /// Sets the resolved host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the control port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the advertised name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the hardware address.
    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Sets the quiescence delay in milliseconds.
    pub fn no_motion_delay_ms(mut self, delay: u64) -> Self {
        self.no_motion_delay_ms = Some(delay);
        self
    }

    /// Builds the DeviceConfig.
    pub fn build(self) -> DeviceConfig {
        DeviceConfig {
            host: self.host.unwrap_or_else(|| "localhost".to_string()),
            port: self.port.unwrap_or(80),
            name: self.name.unwrap_or_default(),
            serial: self.serial.unwrap_or_default(),
            no_motion_delay_ms: self.no_motion_delay_ms.unwrap_or(DEFAULT_NO_MOTION_DELAY_MS),
        }
    }
}

/// Handle of an accessory registered with the host application.
///
/// The host hands these back at startup for devices known from a previous run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessoryHandle {
    /// Device identity
    pub id: DeviceId,

    /// Accessory name derived from the hardware address
    pub display_handle: String,

    /// Hardware address, when known
    #[serde(default)]
    pub serial: Option<String>,
}

impl AccessoryHandle {
    /// Creates the handle for a hardware address.
    pub fn for_hardware_id(hardware_id: &str) -> Self {
        Self {
            id: DeviceId::from_hardware_id(hardware_id),
            display_handle: display_handle(hardware_id),
            serial: Some(normalize_hardware_id(hardware_id)),
        }
    }
}

/// Descriptive information the host exposes for each accessory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessoryInformation {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
}

impl AccessoryInformation {
    /// Information reported for a PIR sensor with the given hardware address.
    pub fn pir_sensor(serial: impl Into<String>) -> Self {
        Self {
            manufacturer: "oznu-platform".to_string(),
            model: "homebridge-esp-pir".to_string(),
            serial_number: serial.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_deterministic() {
        let a = DeviceId::from_hardware_id("AA:BB:CC:DD:EE:FF");
        let b = DeviceId::from_hardware_id("AA:BB:CC:DD:EE:FF");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_device_id_normalizes_case_and_whitespace() {
        let a = DeviceId::from_hardware_id("AA:BB:CC:DD:EE:FF");
        let b = DeviceId::from_hardware_id(" aa:bb:cc:dd:ee:ff ");
        assert_eq!(a, b);
    }

    #[test]
    fn test_device_id_distinct_per_hardware_id() {
        let a = DeviceId::from_hardware_id("AA:BB:CC:DD:EE:FF");
        let b = DeviceId::from_hardware_id("AA:BB:CC:DD:EE:00");
        assert_ne!(a, b);
    }

    #[test]
    fn test_display_handle() {
        assert_eq!(display_handle("aa:bb:cc:dd:ee:ff"), "AABBCCDDEEFF");
    }

    #[test]
    fn test_device_config_builder() {
        let config = DeviceConfig::builder()
            .host("10.0.0.5")
            .port(8080)
            .name("pir-hallway")
            .serial("AA:BB:CC:DD:EE:FF")
            .build();

        assert_eq!(config.endpoint(), "10.0.0.5:8080");
        assert_eq!(config.url(), "ws://10.0.0.5:8080");
        assert_eq!(config.no_motion_delay_ms, DEFAULT_NO_MOTION_DELAY_MS);
        assert_eq!(config.label(), "pir-hallway");
        assert_eq!(
            config.device_id(),
            DeviceId::from_hardware_id("AA:BB:CC:DD:EE:FF")
        );
    }

    #[test]
    fn test_endpoint_differs() {
        let a = DeviceConfig::builder().host("10.0.0.5").port(8080).build();
        let b = DeviceConfig::builder()
            .host("10.0.0.5")
            .port(8080)
            .no_motion_delay_ms(10_000)
            .build();
        let c = DeviceConfig::builder().host("10.0.0.9").port(8080).build();

        assert!(!a.endpoint_differs(&b));
        assert!(a.endpoint_differs(&c));
    }

    #[test]
    fn test_label_falls_back_to_handle() {
        let config = DeviceConfig::builder().serial("AA:BB:CC:DD:EE:FF").build();
        assert_eq!(config.label(), "AABBCCDDEEFF");
    }

    #[test]
    fn test_accessory_handle_roundtrip_identity() {
        let handle = AccessoryHandle::for_hardware_id("aa:bb:cc:dd:ee:ff");
        assert_eq!(handle.id, DeviceId::from_hardware_id("AA:BB:CC:DD:EE:FF"));
        assert_eq!(handle.display_handle, "AABBCCDDEEFF");

        let json = serde_json::to_string(&handle).unwrap();
        let back: AccessoryHandle = serde_json::from_str(&json).unwrap();
        assert_eq!(back, handle);
    }
}
