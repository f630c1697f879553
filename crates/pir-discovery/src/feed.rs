//! Discovery feed: the stream of service announcements the coordinator consumes.

use crate::error::{DiscoveryError, Result};
use async_channel::{Receiver, Sender};
use dashmap::DashMap;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use pir_core::types::DeviceId;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Maximum number of announcements to buffer in the channel
const ANNOUNCEMENT_CHANNEL_CAPACITY: usize = 256;

/// TXT attribute naming the device class
pub const TXT_TYPE: &str = "type";
/// TXT attribute carrying the colon-delimited hardware address
pub const TXT_MAC: &str = "mac";
/// Optional TXT attribute overriding the quiescence delay (milliseconds)
pub const TXT_NO_MOTION_DELAY: &str = "noMotionDelay";

/// One "service up" announcement, decoupled from the mDNS library types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAnnouncement {
    /// Advertised instance name
    pub name: String,

    /// Advertised hostname (e.g. `pir-hallway.local.`)
    pub hostname: String,

    /// Advertised control port
    pub port: u16,

    /// TXT record attributes
    pub txt: HashMap<String, String>,
}

impl ServiceAnnouncement {
    pub fn new(name: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            hostname: hostname.into(),
            port,
            txt: HashMap::new(),
        }
    }

    /// Adds a TXT attribute
    pub fn with_txt(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.txt.insert(key.into(), value.into());
        self
    }

    /// Looks up a TXT attribute
    pub fn txt(&self, key: &str) -> Option<&str> {
        self.txt.get(key).map(String::as_str)
    }

    /// Returns true if the `type` attribute equals `device_type`
    pub fn is_device_type(&self, device_type: &str) -> bool {
        self.txt(TXT_TYPE) == Some(device_type)
    }

    /// Hardware address advertised in the `mac` attribute
    pub fn hardware_id(&self) -> Option<&str> {
        self.txt(TXT_MAC)
            .map(str::trim)
            .filter(|mac| !mac.is_empty())
    }

    /// Device identity derived from the hardware address
    pub fn device_id(&self) -> Option<DeviceId> {
        self.hardware_id().map(DeviceId::from_hardware_id)
    }

    /// Quiescence delay advertised by the device itself, if any
    pub fn advertised_no_motion_delay(&self) -> Option<u64> {
        let raw = self.txt(TXT_NO_MOTION_DELAY)?;
        match raw.trim().parse::<u64>() {
            Ok(delay) if delay > 0 => Some(delay),
            _ => {
                warn!(
                    service = %self.name,
                    value = raw,
                    "Ignoring invalid noMotionDelay attribute"
                );
                None
            }
        }
    }

    /// Converts a resolved mDNS service
    pub fn from_service_info(info: &ServiceInfo) -> Self {
        let txt = info
            .get_properties()
            .iter()
            .map(|property| (property.key().to_string(), property.val_str().to_string()))
            .collect();

        Self {
            name: instance_name(info.get_fullname(), info.get_type()),
            hostname: info.get_hostname().to_string(),
            port: info.get_port(),
            txt,
        }
    }
}

/// Strips the service type suffix from a full service name
fn instance_name(fullname: &str, service_type: &str) -> String {
    fullname
        .strip_suffix(service_type)
        .map(|name| name.trim_end_matches('.'))
        .filter(|name| !name.is_empty())
        .unwrap_or(fullname)
        .to_string()
}

/// Source of service announcements
///
/// Announcements are repeatable, unordered and may be duplicated.
pub trait DiscoveryFeed: Send + Sync {
    /// Opens the subscription for the feed's service type
    fn subscribe(&self) -> Result<Receiver<ServiceAnnouncement>>;

    /// Re-queries the network so that every advertising device is announced again
    fn rescan(&self) -> Result<()>;

    /// Closes the subscription and releases network resources
    fn shutdown(&self);
}

/// Discovery feed browsing one DNS-SD service type over mDNS
pub struct MdnsFeed {
    /// mDNS service daemon
    mdns: Arc<ServiceDaemon>,

    /// Fully-qualified service type
    service_type: String,

    /// Announcement channel sender
    announcement_tx: Sender<ServiceAnnouncement>,

    /// Announcement channel receiver (handed to the subscriber)
    announcement_rx: Receiver<ServiceAnnouncement>,

    /// Running state
    running: Arc<AtomicBool>,

    /// Background task handles
    tasks: DashMap<String, JoinHandle<()>>,
}

impl MdnsFeed {
    /// Creates a feed on an existing daemon
    pub fn new(mdns: Arc<ServiceDaemon>, service_type: impl Into<String>) -> Self {
        let (announcement_tx, announcement_rx) =
            async_channel::bounded(ANNOUNCEMENT_CHANNEL_CAPACITY);

        Self {
            mdns,
            service_type: service_type.into(),
            announcement_tx,
            announcement_rx,
            running: Arc::new(AtomicBool::new(false)),
            tasks: DashMap::new(),
        }
    }

    /// Creates a new mDNS daemon to share between the feed and the resolver
    pub fn create_daemon() -> Result<Arc<ServiceDaemon>> {
        ServiceDaemon::new().map(Arc::new).map_err(|e| {
            DiscoveryError::MdnsInitFailed(format!("Failed to create mDNS daemon: {}", e))
        })
    }

    /// Returns whether the feed is browsing
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts (or restarts) the browse and its forwarding task
    fn start_browser(&self) -> Result<()> {
        let receiver = self
            .mdns
            .browse(&self.service_type)
            .map_err(|e| DiscoveryError::BrowseFailed {
                service_type: self.service_type.clone(),
                reason: e.to_string(),
            })?;

        let announcement_tx = self.announcement_tx.clone();
        let running = Arc::clone(&self.running);
        let service_type = self.service_type.clone();

        let task = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                match receiver.recv_async().await {
                    Ok(event) => {
                        if let Some(announcement) = Self::handle_mdns_event(event) {
                            if announcement_tx.send(announcement).await.is_err() {
                                debug!("Announcement channel closed");
                                break;
                            }
                        }
                    }
                    Err(_) => {
                        // Sender dropped by stop_browse or daemon shutdown
                        break;
                    }
                }
            }
            debug!(service_type = %service_type, "Browser task stopped");
        });

        if let Some(previous) = self.tasks.insert("browser".to_string(), task) {
            previous.abort();
        }

        Ok(())
    }

    fn handle_mdns_event(event: ServiceEvent) -> Option<ServiceAnnouncement> {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                debug!(
                    service = info.get_fullname(),
                    hostname = info.get_hostname(),
                    port = info.get_port(),
                    "Service resolved"
                );
                Some(ServiceAnnouncement::from_service_info(&info))
            }
            ServiceEvent::ServiceRemoved(typ, fullname) => {
                // Devices are never forgotten; removal is informational only.
                debug!(service = %fullname, typ = %typ, "Service removed");
                None
            }
            ServiceEvent::SearchStarted(typ) => {
                debug!(typ = %typ, "Search started");
                None
            }
            ServiceEvent::SearchStopped(typ) => {
                debug!(typ = %typ, "Search stopped");
                None
            }
            _ => None,
        }
    }
}

impl DiscoveryFeed for MdnsFeed {
    fn subscribe(&self) -> Result<Receiver<ServiceAnnouncement>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(DiscoveryError::AlreadyStarted);
        }

        info!(service_type = %self.service_type, "Starting mDNS browser");
        if let Err(e) = self.start_browser() {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        Ok(self.announcement_rx.clone())
    }

    fn rescan(&self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }

        debug!(service_type = %self.service_type, "Re-scanning");
        if let Err(e) = self.mdns.stop_browse(&self.service_type) {
            debug!(error = %e, "stop_browse failed before re-scan");
        }
        self.start_browser()
    }

    fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!(service_type = %self.service_type, "Stopping mDNS browser");
        let tasks = self
            .tasks
            .iter()
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        for task_name in tasks {
            if let Some((_, handle)) = self.tasks.remove(&task_name) {
                handle.abort();
            }
        }

        if let Err(e) = self.mdns.shutdown() {
            error!(error = %e, "Failed to shutdown mDNS daemon");
        }
        self.announcement_tx.close();
    }
}

impl Drop for MdnsFeed {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("mDNS feed dropped while still running");
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announcement() -> ServiceAnnouncement {
        ServiceAnnouncement::new("pir-hallway", "pir-hallway.local.", 8080)
            .with_txt("type", "pir")
            .with_txt("mac", "AA:BB:CC:DD:EE:FF")
    }

    #[test]
    fn test_device_type_filter() {
        assert!(announcement().is_device_type("pir"));
        assert!(!announcement().with_txt("type", "switch").is_device_type("pir"));
        assert!(
            !ServiceAnnouncement::new("x", "x.local.", 80).is_device_type("pir")
        );
    }

    #[test]
    fn test_hardware_id() {
        let a = announcement();
        assert_eq!(a.hardware_id(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(
            a.device_id(),
            Some(DeviceId::from_hardware_id("AA:BB:CC:DD:EE:FF"))
        );

        let blank = announcement().with_txt("mac", "  ");
        assert_eq!(blank.hardware_id(), None);
        assert_eq!(blank.device_id(), None);
    }

    #[test]
    fn test_advertised_no_motion_delay() {
        assert_eq!(announcement().advertised_no_motion_delay(), None);
        assert_eq!(
            announcement()
                .with_txt("noMotionDelay", "15000")
                .advertised_no_motion_delay(),
            Some(15_000)
        );
        assert_eq!(
            announcement()
                .with_txt("noMotionDelay", "soon")
                .advertised_no_motion_delay(),
            None
        );
        assert_eq!(
            announcement()
                .with_txt("noMotionDelay", "0")
                .advertised_no_motion_delay(),
            None
        );
    }

    #[test]
    fn test_instance_name() {
        assert_eq!(
            instance_name("pir-hallway._oznu-platform._tcp.local.", "_oznu-platform._tcp.local."),
            "pir-hallway"
        );
        assert_eq!(instance_name("odd-name", "_oznu-platform._tcp.local."), "odd-name");
    }

    #[test]
    fn test_service_info_conversion() {
        let mut properties = HashMap::new();
        properties.insert("type".to_string(), "pir".to_string());
        properties.insert("mac".to_string(), "AA:BB:CC:DD:EE:FF".to_string());

        let info = ServiceInfo::new(
            "_oznu-platform._tcp.local.",
            "pir-hallway",
            "pir-hallway.local.",
            "10.0.0.5",
            8080,
            properties,
        )
        .unwrap();

        let announcement = ServiceAnnouncement::from_service_info(&info);
        assert_eq!(announcement.name, "pir-hallway");
        assert_eq!(announcement.hostname, "pir-hallway.local.");
        assert_eq!(announcement.port, 8080);
        assert!(announcement.is_device_type("pir"));
        assert_eq!(announcement.hardware_id(), Some("AA:BB:CC:DD:EE:FF"));
    }
}
