//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use pir_client::{ConnectionOptions, MotionSink, ReconnectConfig};
use pir_core::error::ResolutionError;
use pir_core::types::{AccessoryHandle, AccessoryInformation, DeviceId};
use pir_discovery::error::Result as DiscoveryResult;
use pir_discovery::{
    AccessoryHost, AddressResolver, CoordinatorSettings, DiscoveryFeed, ServiceAnnouncement,
};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Upper bound for any single wait in the integration tests
pub const WAIT: Duration = Duration::from_secs(5);

/// Polls `condition` until it holds, panicking after [`WAIT`]
pub async fn eventually<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Coordinator settings with short timeouts and fast reconnects
pub fn test_settings() -> CoordinatorSettings {
    let mut settings = CoordinatorSettings::default();
    settings.discovery.initial_rescan_delay_secs = 0;
    settings.connection = ConnectionOptions {
        handshake_timeout: Duration::from_millis(500),
        keepalive_interval: None,
        reconnect: ReconnectConfig {
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(200),
            backoff_multiplier: 2.0,
        },
    };
    settings
}

/// PIR announcement as the sensors advertise it
pub fn pir_announcement(mac: &str, hostname: &str, port: u16) -> ServiceAnnouncement {
    ServiceAnnouncement::new("pir-hallway", hostname, port)
        .with_txt("type", "pir")
        .with_txt("mac", mac)
}

#[derive(Debug, Clone)]
enum DeviceCommand {
    Send(String),
    Close,
}

/// Websocket server standing in for a sensor's control endpoint
pub struct FakeDevice {
    port: u16,
    received: Arc<Mutex<Vec<String>>>,
    accepted: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
    commands: broadcast::Sender<DeviceCommand>,
}

impl FakeDevice {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake device");
        let port = listener.local_addr().expect("No local address").port();

        let received = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));
        let open = Arc::new(AtomicUsize::new(0));
        let (commands, _) = broadcast::channel(64);

        let device = Self {
            port,
            received: Arc::clone(&received),
            accepted: Arc::clone(&accepted),
            open: Arc::clone(&open),
            commands: commands.clone(),
        };

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let received = Arc::clone(&received);
                let open = Arc::clone(&open);
                let mut commands = commands.subscribe();
                accepted.fetch_add(1, Ordering::SeqCst);

                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(stream).await else {
                        return;
                    };
                    open.fetch_add(1, Ordering::SeqCst);

                    loop {
                        tokio::select! {
                            command = commands.recv() => match command {
                                Ok(DeviceCommand::Send(text)) => {
                                    if ws.send(Message::text(text)).await.is_err() {
                                        break;
                                    }
                                }
                                Ok(DeviceCommand::Close) | Err(_) => {
                                    let _ = ws.close(None).await;
                                    break;
                                }
                            },
                            message = ws.next() => match message {
                                Some(Ok(Message::Text(text))) => {
                                    received.lock().push(text.as_str().to_string());
                                }
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                Some(Ok(_)) => {}
                            },
                        }
                    }

                    open.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        device
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Pushes a text frame to every open connection
    pub fn push(&self, text: &str) {
        let _ = self.commands.send(DeviceCommand::Send(text.to_string()));
    }

    /// Closes every open connection from the device side
    pub fn drop_connections(&self) {
        let _ = self.commands.send(DeviceCommand::Close);
    }

    /// Text frames received so far, across all connections
    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    /// Completed websocket handshakes plus refused/failed ones
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Currently open websocket connections
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub async fn wait_for_received(&self, count: usize) -> Vec<String> {
        eventually("device frames", || self.received.lock().len() >= count).await;
        self.received()
    }

    pub async fn wait_for_open(&self, count: usize) {
        eventually("open connections", || self.open_connections() == count).await;
    }
}

/// Resolver answering from a fixed table
#[derive(Default)]
pub struct StaticResolver {
    table: Mutex<HashMap<String, Ipv4Addr>>,
    queries: AtomicUsize,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, hostname: &str, address: Ipv4Addr) -> Self {
        self.table.lock().insert(hostname.to_string(), address);
        self
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AddressResolver for StaticResolver {
    async fn resolve(&self, hostname: &str) -> Result<Ipv4Addr, ResolutionError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.table
            .lock()
            .get(hostname)
            .copied()
            .ok_or_else(|| ResolutionError::unresolvable(hostname, "no such host"))
    }
}

/// Host that records every call made into it
#[derive(Default)]
pub struct RecordingHost {
    registered: Mutex<Vec<AccessoryHandle>>,
    configured: Mutex<Vec<(DeviceId, AccessoryInformation)>>,
    reachable: Mutex<HashMap<DeviceId, bool>>,
    motion: Arc<Mutex<HashMap<DeviceId, Vec<bool>>>>,
}

impl RecordingHost {
    pub fn registered(&self) -> Vec<AccessoryHandle> {
        self.registered.lock().clone()
    }

    pub fn configured(&self) -> Vec<(DeviceId, AccessoryInformation)> {
        self.configured.lock().clone()
    }

    pub fn is_reachable(&self, id: DeviceId) -> bool {
        self.reachable.lock().get(&id).copied().unwrap_or(false)
    }

    /// Motion updates published for `id`, in order
    pub fn motion_updates(&self, id: DeviceId) -> Vec<bool> {
        self.motion.lock().get(&id).cloned().unwrap_or_default()
    }
}

impl AccessoryHost for RecordingHost {
    fn register_new_accessory(&self, handle: &AccessoryHandle) {
        self.registered.lock().push(handle.clone());
    }

    fn characteristic_sink(&self, id: DeviceId) -> Arc<dyn MotionSink> {
        Arc::new(RecordingSink {
            id,
            motion: Arc::clone(&self.motion),
        })
    }

    fn configure_accessory(&self, id: DeviceId, info: &AccessoryInformation) {
        self.configured.lock().push((id, info.clone()));
    }

    fn update_reachability(&self, id: DeviceId, reachable: bool) {
        self.reachable.lock().insert(id, reachable);
    }
}

struct RecordingSink {
    id: DeviceId,
    motion: Arc<Mutex<HashMap<DeviceId, Vec<bool>>>>,
}

impl MotionSink for RecordingSink {
    fn update_motion_detected(&self, detected: bool) {
        self.motion.lock().entry(self.id).or_default().push(detected);
    }
}

/// Discovery feed driven by the test
pub struct ManualFeed {
    tx: async_channel::Sender<ServiceAnnouncement>,
    rx: async_channel::Receiver<ServiceAnnouncement>,
    rescans: AtomicUsize,
    shut_down: AtomicUsize,
}

impl ManualFeed {
    pub fn new() -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self {
            tx,
            rx,
            rescans: AtomicUsize::new(0),
            shut_down: AtomicUsize::new(0),
        }
    }

    pub async fn announce(&self, announcement: ServiceAnnouncement) {
        self.tx
            .send(announcement)
            .await
            .expect("Feed channel closed");
    }

    pub fn rescans(&self) -> usize {
        self.rescans.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst) > 0
    }
}

impl DiscoveryFeed for ManualFeed {
    fn subscribe(&self) -> DiscoveryResult<async_channel::Receiver<ServiceAnnouncement>> {
        Ok(self.rx.clone())
    }

    fn rescan(&self) -> DiscoveryResult<()> {
        self.rescans.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&self) {
        self.shut_down.fetch_add(1, Ordering::SeqCst);
        self.tx.close();
    }
}
