//! Device record: bookkeeping for one physical device.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use pir_client::{ConnectionOptions, ConnectionState, DeviceConnection, MetricsSnapshot, MotionSink};
use pir_core::types::{AccessoryHandle, DeviceConfig, DeviceId, display_handle};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// What applying a configuration snapshot did to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordUpdate {
    /// The record had no connection yet; one was created
    Materialized,
    /// The existing connection was reconfigured
    Reconfigured,
}

#[derive(Debug, Default)]
struct RecordState {
    config: Option<DeviceConfig>,
    connection: Option<Arc<DeviceConnection>>,
}

/// One physical device.
///
/// Created on first discovery (or restored from the host's cache as a
/// placeholder without a connection) and mutated in place on every rediscovery.
/// The record owns its connection exclusively.
#[derive(Debug)]
pub struct DeviceRecord {
    id: DeviceId,
    display_handle: String,
    state: Mutex<RecordState>,
    first_seen: DateTime<Utc>,
    last_seen: RwLock<Option<DateTime<Utc>>>,
    seen_count: AtomicU64,
}

impl DeviceRecord {
    /// Creates a record for a hardware address
    pub fn new(id: DeviceId, hardware_id: &str) -> Self {
        Self::with_handle(id, display_handle(hardware_id))
    }

    /// Creates a placeholder for an accessory restored by the host
    pub fn placeholder(handle: &AccessoryHandle) -> Self {
        Self::with_handle(handle.id, handle.display_handle.clone())
    }

    fn with_handle(id: DeviceId, display_handle: String) -> Self {
        Self {
            id,
            display_handle,
            state: Mutex::new(RecordState::default()),
            first_seen: Utc::now(),
            last_seen: RwLock::new(None),
            seen_count: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn display_handle(&self) -> &str {
        &self.display_handle
    }

    /// Returns true while the record has no live connection
    pub fn is_placeholder(&self) -> bool {
        self.state.lock().connection.is_none()
    }

    /// Current configuration snapshot, if the device has been discovered
    pub fn config(&self) -> Option<DeviceConfig> {
        self.state.lock().config.clone()
    }

    pub fn connection(&self) -> Option<Arc<DeviceConnection>> {
        self.state.lock().connection.clone()
    }

    /// Last known motion state; false for a record without a connection
    pub fn motion_detected(&self) -> bool {
        self.connection()
            .map(|connection| connection.motion_detected())
            .unwrap_or(false)
    }

    /// Records a discovery sighting
    pub fn mark_seen(&self) {
        *self.last_seen.write() = Some(Utc::now());
        self.seen_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn seen_count(&self) -> u64 {
        self.seen_count.load(Ordering::Relaxed)
    }

    /// Applies a fresh configuration snapshot.
    ///
    /// Reconfigures the existing connection, or creates the connection (with
    /// the sink returned by `sink`) when the record has none yet.
    pub fn apply<F>(
        &self,
        config: DeviceConfig,
        options: &ConnectionOptions,
        sink: F,
    ) -> RecordUpdate
    where
        F: FnOnce() -> Arc<dyn MotionSink>,
    {
        let mut state = self.state.lock();
        state.config = Some(config.clone());

        if let Some(connection) = &state.connection {
            connection.reconfigure(config);
            return RecordUpdate::Reconfigured;
        }

        let connection = DeviceConnection::connect(config, options.clone(), sink());
        state.connection = Some(Arc::new(connection));
        RecordUpdate::Materialized
    }

    /// Stops the record's connection, if any
    pub async fn shutdown(&self) {
        let connection = self.state.lock().connection.clone();
        if let Some(connection) = connection {
            connection.shutdown().await;
        }
    }

    /// Point-in-time summary for diagnostics
    pub fn summary(&self) -> DeviceSummary {
        let (config, connection) = {
            let state = self.state.lock();
            (state.config.clone(), state.connection.clone())
        };

        DeviceSummary {
            id: self.id,
            display_handle: self.display_handle.clone(),
            name: config.as_ref().map(|c| c.name.clone()),
            endpoint: config.as_ref().map(DeviceConfig::endpoint),
            state: connection.as_ref().map(|c| c.status().state()),
            motion_detected: connection
                .as_ref()
                .map(|c| c.motion_detected())
                .unwrap_or(false),
            first_seen: self.first_seen,
            last_seen: *self.last_seen.read(),
            seen_count: self.seen_count(),
            metrics: connection.as_ref().map(|c| c.status().metrics().snapshot()),
        }
    }
}

/// Serializable view of a device record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub id: DeviceId,
    pub display_handle: String,
    pub name: Option<String>,
    pub endpoint: Option<String>,
    pub state: Option<ConnectionState>,
    pub motion_detected: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    pub seen_count: u64,
    pub metrics: Option<MetricsSnapshot>,
}
