//! # PIR Bridge Core
//!
//! Core types, error handling, and configuration for the PIR sensor bridge.
//!
//! This crate provides the foundational building blocks shared by the connection
//! and discovery crates:
//!
//! - **Types**: Stable device identity derived from the hardware address, the
//!   per-device configuration snapshot, and accessory handles exchanged with the host.
//! - **Errors**: The failure taxonomy of the discovery-to-connection lifecycle,
//!   using `thiserror`. Every variant is locally contained; nothing here is fatal.
//! - **Configuration**: YAML files with environment variable overrides and validation.
//!
//! ## Example
//!
//! ```
//! use pir_core::types::{DeviceConfig, DeviceId};
//!
//! let id = DeviceId::from_hardware_id("AA:BB:CC:DD:EE:FF");
//! assert_eq!(id, DeviceId::from_hardware_id("aa:bb:cc:dd:ee:ff"));
//!
//! let config = DeviceConfig::builder()
//!     .host("10.0.0.5")
//!     .port(8080)
//!     .serial("AA:BB:CC:DD:EE:FF")
//!     .build();
//! assert_eq!(config.url(), "ws://10.0.0.5:8080");
//! ```

pub mod config;
pub mod discovery_config;
pub mod error;
pub mod types;

// Re-export commonly used types for convenience
pub use config::AppConfig;
pub use discovery_config::DiscoveryConfig;
pub use error::{PirError, Result};
pub use types::{AccessoryHandle, AccessoryInformation, DeviceConfig, DeviceId};
