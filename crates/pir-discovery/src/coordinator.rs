//! Discovery coordinator.
//!
//! Reconciles the discovery feed against the set of known devices. Every
//! announcement for the target device class is resolved to an identity and a
//! fresh address, then either creates a new device record (and registers a new
//! accessory with the host) or re-applies the configuration to the existing one.
//!
//! Announcements for one identity are processed strictly in arrival order on a
//! per-identity worker; different identities proceed concurrently.

use crate::error::{DiscoveryError, Result};
use crate::feed::{DiscoveryFeed, ServiceAnnouncement};
use crate::host::AccessoryHost;
use crate::record::{DeviceRecord, DeviceSummary, RecordUpdate};
use crate::registry::DeviceRegistry;
use crate::resolver::AddressResolver;
use dashmap::DashMap;
use pir_client::ConnectionOptions;
use pir_core::config::AppConfig;
use pir_core::discovery_config::DiscoveryConfig;
use pir_core::types::{
    AccessoryHandle, AccessoryInformation, DeviceConfig, DeviceId, display_handle,
};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// What `on_device_found` did with an announcement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// Not the target device class
    Ignored,
    /// First sighting: record created and accessory registered
    Registered,
    /// Known device: fresh configuration applied to its connection
    Reconfigured,
    /// Device restored from the host cache: connection created on first sighting
    Materialized,
}

/// Settings the coordinator needs from the application configuration
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub discovery: DiscoveryConfig,
    /// Quiescence delay for devices that do not advertise their own
    pub default_no_motion_delay_ms: u64,
    pub connection: ConnectionOptions,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for CoordinatorSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            discovery: config.discovery.clone(),
            default_no_motion_delay_ms: config.devices.no_motion_delay_ms,
            connection: ConnectionOptions::from(&config.connection),
        }
    }
}

/// Owns the known device registry and drives the discovery feed.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct DiscoveryCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    settings: CoordinatorSettings,
    registry: DeviceRegistry,
    /// Serializes processing per identity (tokio's mutex is FIFO)
    lanes: DashMap<DeviceId, Arc<AsyncMutex<()>>>,
    resolver: Arc<dyn AddressResolver>,
    host: Arc<dyn AccessoryHost>,
    feed: parking_lot::Mutex<Option<Arc<dyn DiscoveryFeed>>>,
    running: AtomicBool,
    cancel: CancellationToken,
    tasks: DashMap<String, JoinHandle<()>>,
}

impl DiscoveryCoordinator {
    /// Creates a coordinator with injected resolver and host collaborators
    pub fn new(
        settings: CoordinatorSettings,
        resolver: Arc<dyn AddressResolver>,
        host: Arc<dyn AccessoryHost>,
    ) -> Result<Self> {
        settings
            .discovery
            .validate()
            .map_err(DiscoveryError::InvalidConfig)?;

        info!(
            service_type = %settings.discovery.service_type,
            device_type = %settings.discovery.device_type,
            default_no_motion_delay_ms = settings.default_no_motion_delay_ms,
            "Discovery coordinator created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                settings,
                registry: DeviceRegistry::new(),
                lanes: DashMap::new(),
                resolver,
                host,
                feed: parking_lot::Mutex::new(None),
                running: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                tasks: DashMap::new(),
            }),
        })
    }

    /// Subscribes to `feed` and schedules the periodic re-scans
    pub async fn start(&self, feed: Arc<dyn DiscoveryFeed>) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(DiscoveryError::AlreadyStarted);
        }

        if !self.inner.settings.discovery.enabled {
            info!("Discovery is disabled in configuration");
            return Ok(());
        }

        let announcements = match feed.subscribe() {
            Ok(rx) => rx,
            Err(e) => {
                self.inner.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        *self.inner.feed.lock() = Some(Arc::clone(&feed));

        self.spawn_dispatcher(announcements);
        self.spawn_rescan(feed);

        info!("Discovery coordinator started");
        Ok(())
    }

    /// Reconciles one announcement against the registry
    #[instrument(skip_all, fields(service = %announcement.name))]
    pub async fn on_device_found(
        &self,
        announcement: ServiceAnnouncement,
    ) -> Result<DiscoveryOutcome> {
        let settings = &self.inner.settings;

        if !announcement.is_device_type(&settings.discovery.device_type) {
            trace!("Ignoring announcement for another device type");
            return Ok(DiscoveryOutcome::Ignored);
        }

        let hardware_id = announcement
            .hardware_id()
            .ok_or_else(|| {
                DiscoveryError::invalid_announcement(&announcement.name, "missing mac attribute")
            })?
            .to_string();
        let id = DeviceId::from_hardware_id(&hardware_id);
        let handle = display_handle(&hardware_id);

        let lane = self.lane(id);
        let _guard = lane.lock().await;

        let address = match self.inner.resolver.resolve(&announcement.hostname).await {
            Ok(address) => address,
            Err(e) => {
                warn!(
                    device = %handle,
                    host = %announcement.hostname,
                    error = %e,
                    "Dropping announcement, hostname did not resolve"
                );
                return Err(e.into());
            }
        };

        // Checked under the lane so shutdown sees every connection created before it
        if self.inner.cancel.is_cancelled() {
            debug!(device = %handle, "Dropping announcement during shutdown");
            return Err(DiscoveryError::ShuttingDown);
        }

        let config = self.snapshot(&announcement, &hardware_id, address);
        let (record, created) = self
            .inner
            .registry
            .get_or_insert_with(id, || DeviceRecord::new(id, &hardware_id));
        record.mark_seen();

        let host = &self.inner.host;
        let update = record.apply(config, &settings.connection, || {
            host.characteristic_sink(id)
        });

        let outcome = if created {
            info!(
                device = %handle,
                address = %address,
                port = announcement.port,
                "New device discovered"
            );
            host.register_new_accessory(&AccessoryHandle::for_hardware_id(&hardware_id));
            DiscoveryOutcome::Registered
        } else {
            match update {
                RecordUpdate::Materialized => {
                    info!(device = %handle, address = %address, "Restored device is back online");
                    DiscoveryOutcome::Materialized
                }
                RecordUpdate::Reconfigured => {
                    debug!(device = %handle, address = %address, "Known device rediscovered");
                    DiscoveryOutcome::Reconfigured
                }
            }
        };

        host.configure_accessory(id, &AccessoryInformation::pir_sensor(hardware_id.as_str()));
        host.update_reachability(id, true);

        Ok(outcome)
    }

    /// Inserts a placeholder record for an accessory the host already knows.
    ///
    /// The connection is created on the next announcement for this identity.
    /// Returns false if the identity is already known.
    pub fn restore_cached_device(&self, handle: AccessoryHandle) -> bool {
        let (_, inserted) = self
            .inner
            .registry
            .get_or_insert_with(handle.id, || DeviceRecord::placeholder(&handle));

        if inserted {
            info!(device = %handle.display_handle, id = %handle.id, "Restored cached accessory");
        } else {
            debug!(device = %handle.display_handle, "Cached accessory already known");
        }
        inserted
    }

    /// Last known motion state of a device, read from cache without blocking
    pub fn motion_detected(&self, id: DeviceId) -> Result<bool> {
        self.inner
            .registry
            .get(&id)
            .map(|record| record.motion_detected())
            .ok_or(DiscoveryError::UnknownDevice(id))
    }

    pub fn device(&self, id: DeviceId) -> Option<Arc<DeviceRecord>> {
        self.inner.registry.get(&id)
    }

    /// Summaries of all known devices
    pub fn devices(&self) -> Vec<DeviceSummary> {
        self.inner
            .registry
            .records()
            .iter()
            .map(|record| record.summary())
            .collect()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.inner.registry
    }

    /// Returns whether `start` has been called
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Stops discovery and closes every device connection
    pub async fn shutdown(&self) {
        info!("Stopping discovery coordinator");
        self.inner.cancel.cancel();

        let feed = self.inner.feed.lock().take();
        if let Some(feed) = feed {
            feed.shutdown();
        }

        let tasks = self
            .inner
            .tasks
            .iter()
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        for task_name in tasks {
            if let Some((_, handle)) = self.inner.tasks.remove(&task_name) {
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        warn!(task = %task_name, error = %e, "Discovery task failed");
                    }
                }
            }
        }

        // Wait out announcements still being processed by direct callers
        let lanes = self
            .inner
            .lanes
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect::<Vec<_>>();
        for lane in lanes {
            drop(lane.lock().await);
        }

        for record in self.inner.registry.records() {
            record.shutdown().await;
        }

        self.inner.running.store(false, Ordering::SeqCst);
        info!("Discovery coordinator stopped");
    }

    fn lane(&self, id: DeviceId) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.inner.lanes.entry(id).or_default().value())
    }

    /// Builds the configuration snapshot for one announcement
    fn snapshot(
        &self,
        announcement: &ServiceAnnouncement,
        hardware_id: &str,
        address: Ipv4Addr,
    ) -> DeviceConfig {
        let no_motion_delay_ms = announcement
            .advertised_no_motion_delay()
            .unwrap_or(self.inner.settings.default_no_motion_delay_ms);

        DeviceConfig::builder()
            .host(address.to_string())
            .port(announcement.port)
            .name(announcement.name.clone())
            .serial(hardware_id)
            .no_motion_delay_ms(no_motion_delay_ms)
            .build()
    }

    /// Fans announcements out to per-identity workers
    fn spawn_dispatcher(&self, announcements: async_channel::Receiver<ServiceAnnouncement>) {
        let coordinator = self.clone();
        let cancel = self.inner.cancel.clone();
        let device_type = self.inner.settings.discovery.device_type.clone();

        let task = tokio::spawn(async move {
            let mut workers: HashMap<DeviceId, mpsc::UnboundedSender<ServiceAnnouncement>> =
                HashMap::new();

            loop {
                let announcement = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = announcements.recv() => match received {
                        Ok(announcement) => announcement,
                        Err(_) => {
                            debug!("Discovery feed closed");
                            break;
                        }
                    },
                };

                if !announcement.is_device_type(&device_type) {
                    trace!(
                        service = %announcement.name,
                        "Ignoring announcement for another device type"
                    );
                    continue;
                }

                let Some(id) = announcement.device_id() else {
                    warn!(
                        service = %announcement.name,
                        "Ignoring announcement without mac attribute"
                    );
                    continue;
                };

                let worker = workers
                    .entry(id)
                    .or_insert_with(|| coordinator.spawn_worker(id));
                if let Err(mpsc::error::SendError(announcement)) = worker.send(announcement) {
                    // Worker exited; replace it and keep the announcement.
                    let replacement = coordinator.spawn_worker(id);
                    let _ = replacement.send(announcement);
                    workers.insert(id, replacement);
                }
            }

            debug!("Discovery dispatcher stopped");
        });

        self.inner.tasks.insert("dispatcher".to_string(), task);
    }

    /// Processes the announcements of one identity in arrival order
    fn spawn_worker(&self, id: DeviceId) -> mpsc::UnboundedSender<ServiceAnnouncement> {
        let (tx, mut rx) = mpsc::unbounded_channel::<ServiceAnnouncement>();
        let coordinator = self.clone();
        let cancel = self.inner.cancel.clone();

        let task = tokio::spawn(async move {
            loop {
                let announcement = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = rx.recv() => match received {
                        Some(announcement) => announcement,
                        None => break,
                    },
                };

                if let Err(e) = coordinator.on_device_found(announcement).await {
                    debug!(id = %id, error = %e, "Announcement dropped");
                }
            }
        });

        self.inner.tasks.insert(format!("worker-{id}"), task);
        tx
    }

    /// Re-scans once after the initial delay, then on every interval
    fn spawn_rescan(&self, feed: Arc<dyn DiscoveryFeed>) {
        let cancel = self.inner.cancel.clone();
        let initial_delay = self.inner.settings.discovery.initial_rescan_delay();
        let interval = self.inner.settings.discovery.rescan_interval();

        let task = tokio::spawn(async move {
            let mut next = Instant::now() + initial_delay;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep_until(next) => {}
                }

                debug!("Re-scanning discovery feed");
                if let Err(e) = feed.rescan() {
                    warn!(error = %e, "Re-scan failed");
                }
                next = Instant::now() + interval;
            }

            debug!("Re-scan task stopped");
        });

        self.inner.tasks.insert("rescan".to_string(), task);
    }
}
