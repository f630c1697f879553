//! # pir-client
//!
//! Persistent device connections for the PIR sensor bridge.
//!
//! Each discovered sensor gets one [`DeviceConnection`]: a supervisor task that
//! keeps a websocket open to the device's control endpoint and turns its status
//! reports into motion updates.
//!
//! - Bounded handshake timeout, auto-reconnect with exponential backoff
//! - Configuration pushed on every connection-open and every rediscovery
//! - Connection state tracking and metrics, observable through a watch channel
//! - Malformed payloads are counted and discarded, never fatal
//!
//! ## Example
//!
//! ```rust,no_run
//! use pir_client::{ConnectionOptions, DeviceConnection, MotionSink};
//! use pir_core::types::DeviceConfig;
//! use std::sync::Arc;
//!
//! struct LogSink;
//!
//! impl MotionSink for LogSink {
//!     fn update_motion_detected(&self, detected: bool) {
//!         tracing::info!(motion = detected, "Motion changed");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = DeviceConfig::builder()
//!         .host("10.0.0.5")
//!         .port(8080)
//!         .serial("AA:BB:CC:DD:EE:FF")
//!         .build();
//!
//!     let options = ConnectionOptions::default();
//!     let connection = DeviceConnection::connect(config, options, Arc::new(LogSink));
//!     println!("motion: {}", connection.motion_detected());
//!     connection.shutdown().await;
//! }
//! ```

pub mod backoff;
pub mod connection;
pub mod protocol;
pub mod sink;
pub mod state;

// Re-export commonly used types
pub use backoff::{ReconnectConfig, calculate_backoff};
pub use connection::{ConnectionOptions, DeviceConnection};
pub use protocol::{ConfigurePayload, DeviceStatus, parse_status};
pub use sink::MotionSink;
pub use state::{ConnectionMetrics, ConnectionState, ConnectionStatus, MetricsSnapshot};
