//! Persistent websocket connection to one device.
//!
//! Each [`DeviceConnection`] owns a supervisor task that keeps exactly one socket
//! open to the device's control endpoint, reconnecting with exponential backoff
//! whenever the handshake stalls or the socket drops. Reconfiguration arrives on
//! a command queue so updates for one device are applied in the order they were
//! issued.

use crate::backoff::{ReconnectConfig, calculate_backoff};
use crate::protocol::{ConfigurePayload, DeviceStatus, parse_status};
use crate::sink::MotionSink;
use crate::state::{ConnectionState, ConnectionStatus};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use pir_core::config::ConnectionConfig;
use pir_core::error::ConnectionError;
use pir_core::types::DeviceConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, Interval, MissedTickBehavior, interval_at, timeout};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Transport options shared by all device connections
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Upper bound for the websocket handshake
    pub handshake_timeout: Duration,
    /// Keepalive ping interval (None disables keepalive)
    pub keepalive_interval: Option<Duration>,
    /// Auto-reconnect configuration
    pub reconnect: ReconnectConfig,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

impl From<&ConnectionConfig> for ConnectionOptions {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            handshake_timeout: config.handshake_timeout(),
            keepalive_interval: config.keepalive_interval(),
            reconnect: ReconnectConfig::from(&config.reconnect),
        }
    }
}

#[derive(Debug)]
enum Command {
    Reconfigure(DeviceConfig),
}

/// Handle to the persistent connection of one device.
///
/// Dropping the handle (or calling [`shutdown`](Self::shutdown)) stops the
/// supervisor and closes the socket.
pub struct DeviceConnection {
    label: String,
    commands: mpsc::UnboundedSender<Command>,
    config: Arc<RwLock<DeviceConfig>>,
    motion: Arc<AtomicBool>,
    status: ConnectionStatus,
    cancel: CancellationToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl DeviceConnection {
    /// Spawns the supervisor for `config` and starts connecting immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(
        config: DeviceConfig,
        options: ConnectionOptions,
        sink: Arc<dyn MotionSink>,
    ) -> Self {
        let label = config.label();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let shared_config = Arc::new(RwLock::new(config.clone()));
        let motion = Arc::new(AtomicBool::new(false));
        let status = ConnectionStatus::new();
        let cancel = CancellationToken::new();

        let supervisor = Supervisor {
            config,
            shared_config: Arc::clone(&shared_config),
            options,
            commands: command_rx,
            motion: Arc::clone(&motion),
            sink,
            status: status.clone(),
            cancel: cancel.clone(),
        };

        let span = info_span!("device", device = %label);
        let task = tokio::spawn(supervisor.run().instrument(span));

        Self {
            label,
            commands,
            config: shared_config,
            motion,
            status,
            cancel,
            task: parking_lot::Mutex::new(Some(task)),
        }
    }

    /// Applies a fresh configuration snapshot from a rediscovery.
    ///
    /// A changed endpoint closes the current socket and reconnects to the new
    /// one. An unchanged endpoint re-sends the configuration over the open socket.
    pub fn reconfigure(&self, config: DeviceConfig) {
        if self.commands.send(Command::Reconfigure(config)).is_err() {
            warn!(device = %self.label, "Reconfigure after connection shutdown ignored");
        }
    }

    /// Last motion state reported by the device (false until the first report).
    ///
    /// Never touches the network and keeps returning the cached value while the
    /// socket is down.
    pub fn motion_detected(&self) -> bool {
        self.motion.load(Ordering::Acquire)
    }

    /// Connection state and metrics
    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// Configuration snapshot most recently applied by the supervisor
    pub fn config(&self) -> DeviceConfig {
        self.config.read().clone()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Stops the supervisor and waits for the socket to close.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(device = %self.label, error = %e, "Connection task failed");
            }
        }
    }
}

impl Drop for DeviceConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for DeviceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConnection")
            .field("label", &self.label)
            .field("state", &self.status.state())
            .field("motion", &self.motion_detected())
            .finish()
    }
}

/// How an open session ended
enum SessionEnd {
    /// Shutdown requested
    Cancelled,
    /// Endpoint changed, reconnect without backoff
    Redirected,
    /// Socket failed or was closed by the device
    Dropped(ConnectionError),
}

struct Supervisor {
    config: DeviceConfig,
    shared_config: Arc<RwLock<DeviceConfig>>,
    options: ConnectionOptions,
    commands: mpsc::UnboundedReceiver<Command>,
    motion: Arc<AtomicBool>,
    sink: Arc<dyn MotionSink>,
    status: ConnectionStatus,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(mut self) {
        let mut attempt = 0u32;

        loop {
            self.status.set_state(ConnectionState::Connecting);

            let established = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.establish() => result,
            };

            match established {
                Ok(mut ws) => {
                    attempt = 0;
                    self.status.clear_error();
                    self.status.metrics().mark_connected();
                    self.status.set_state(ConnectionState::Open);
                    info!(endpoint = %self.config.endpoint(), "Device connection open");

                    let end = self.session(&mut ws).await;
                    close_quietly(&mut ws).await;
                    self.status.metrics().mark_disconnected();

                    match end {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Redirected => {
                            self.status.set_state(ConnectionState::Closed);
                            continue;
                        }
                        SessionEnd::Dropped(e) => {
                            warn!(error = %e, "Device connection lost");
                            self.status.set_error(e.to_string());
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Device connection attempt failed");
                    self.status.set_error(e.to_string());
                }
            }

            let delay = calculate_backoff(attempt, &self.options.reconnect);
            attempt = attempt.saturating_add(1);
            self.status.metrics().record_reconnect();
            debug!(
                attempt = attempt,
                backoff_ms = delay.as_millis() as u64,
                "Reconnecting after backoff"
            );

            if !self.wait_backoff(delay).await {
                break;
            }
        }

        self.status.set_state(ConnectionState::Closed);
        debug!("Device connection stopped");
    }

    /// Opens the websocket, bounded by the handshake timeout
    async fn establish(&self) -> Result<WsStream, ConnectionError> {
        let endpoint = self.config.endpoint();
        let url = self.config.url();
        debug!(url = %url, "Connecting to device");

        match timeout(self.options.handshake_timeout, connect_async(url.as_str())).await {
            Err(_) => Err(ConnectionError::HandshakeTimeout {
                endpoint,
                timeout_ms: self.options.handshake_timeout.as_millis() as u64,
            }),
            Ok(Err(e)) => Err(ConnectionError::failed(endpoint, e.to_string())),
            Ok(Ok((ws, response))) => {
                debug!(status = %response.status(), "Handshake complete");
                Ok(ws)
            }
        }
    }

    /// Drives one open socket until it ends
    async fn session(&mut self, ws: &mut WsStream) -> SessionEnd {
        if let Err(e) = self.send_configuration(ws).await {
            return SessionEnd::Dropped(e);
        }

        let mut keepalive = self.options.keepalive_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });
        let mut awaiting_pong = false;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return SessionEnd::Cancelled,

                command = self.commands.recv() => {
                    let Some(Command::Reconfigure(config)) = command else {
                        return SessionEnd::Cancelled;
                    };
                    let redirected = self.config.endpoint_differs(&config);
                    self.apply_config(config);
                    if redirected {
                        info!(
                            endpoint = %self.config.endpoint(),
                            "Device endpoint changed, reconnecting"
                        );
                        return SessionEnd::Redirected;
                    }
                    if let Err(e) = self.send_configuration(ws).await {
                        return SessionEnd::Dropped(e);
                    }
                }

                _ = next_tick(&mut keepalive) => {
                    if awaiting_pong {
                        return SessionEnd::Dropped(ConnectionError::closed(
                            "keepalive pong not received",
                        ));
                    }
                    if let Err(e) = ws.send(Message::Ping(Default::default())).await {
                        return SessionEnd::Dropped(send_failed(e));
                    }
                    awaiting_pong = true;
                }

                message = ws.next() => match message {
                    Some(Ok(Message::Text(text))) => self.handle_payload(text.as_str()),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => self.handle_payload(text),
                        Err(e) => {
                            self.status.metrics().record_malformed();
                            warn!(error = %e, "Discarding non UTF-8 device payload");
                        }
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = ws.send(Message::Pong(payload)).await {
                            return SessionEnd::Dropped(send_failed(e));
                        }
                    }
                    Some(Ok(Message::Pong(_))) => awaiting_pong = false,
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("closed by device ({})", u16::from(f.code)))
                            .unwrap_or_else(|| "closed by device".to_string());
                        return SessionEnd::Dropped(ConnectionError::closed(reason));
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        return SessionEnd::Dropped(ConnectionError::closed(e.to_string()));
                    }
                    None => return SessionEnd::Dropped(ConnectionError::closed("stream ended")),
                },
            }
        }
    }

    /// Waits out the backoff, cutting it short when the endpoint changes.
    ///
    /// Returns false on shutdown.
    async fn wait_backoff(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = &mut sleep => return true,
                command = self.commands.recv() => {
                    let Some(Command::Reconfigure(config)) = command else {
                        return false;
                    };
                    let redirected = self.config.endpoint_differs(&config);
                    self.apply_config(config);
                    if redirected {
                        debug!(
                            endpoint = %self.config.endpoint(),
                            "Endpoint changed during backoff"
                        );
                        return true;
                    }
                }
            }
        }
    }

    fn apply_config(&mut self, config: DeviceConfig) {
        *self.shared_config.write() = config.clone();
        self.config = config;
    }

    async fn send_configuration(&self, ws: &mut WsStream) -> Result<(), ConnectionError> {
        let payload = ConfigurePayload::new(self.config.no_motion_delay_ms);
        let body = payload.to_json().map_err(send_failed)?;
        ws.send(Message::text(body)).await.map_err(send_failed)?;

        self.status.metrics().record_message_sent();
        debug!(
            no_motion_delay_ms = payload.no_motion_delay_ms,
            "Sent device configuration"
        );
        Ok(())
    }

    fn handle_payload(&self, text: &str) {
        self.status.metrics().record_message_received();

        match parse_status(text) {
            Ok(DeviceStatus {
                motion: Some(detected),
            }) => {
                self.motion.store(detected, Ordering::Release);
                debug!(motion = detected, "Motion state reported");
                self.sink.update_motion_detected(detected);
            }
            Ok(_) => debug!("Status report without motion field"),
            Err(e) => {
                self.status.metrics().record_malformed();
                warn!(error = %e, payload = %text, "Discarding malformed device payload");
            }
        }
    }
}

async fn next_tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn send_failed(e: impl std::fmt::Display) -> ConnectionError {
    ConnectionError::SendFailed {
        reason: e.to_string(),
    }
}

async fn close_quietly(ws: &mut WsStream) {
    let _ = timeout(CLOSE_TIMEOUT, ws.close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio_tungstenite::accept_async;

    #[derive(Default)]
    struct RecordingSink {
        updates: Mutex<Vec<bool>>,
    }

    impl MotionSink for RecordingSink {
        fn update_motion_detected(&self, detected: bool) {
            self.updates.lock().push(detected);
        }
    }

    /// Accepts one websocket client, forwards its text frames to `received`
    /// and pushes every string from `outbound` to it.
    async fn fake_device() -> (
        u16,
        UnboundedReceiver<String>,
        mpsc::UnboundedSender<String>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            loop {
                tokio::select! {
                    Some(text) = outbound_rx.recv() => {
                        ws.send(Message::text(text)).await.unwrap();
                    }
                    message = ws.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            let _ = received_tx.send(text.as_str().to_string());
                        }
                        Some(Ok(_)) => {}
                        _ => break,
                    }
                }
            }
        });

        (port, received_rx, outbound_tx)
    }

    fn options() -> ConnectionOptions {
        ConnectionOptions {
            handshake_timeout: Duration::from_millis(500),
            keepalive_interval: None,
            reconnect: ReconnectConfig {
                initial_backoff: Duration::from_millis(20),
                max_backoff: Duration::from_millis(100),
                backoff_multiplier: 2.0,
            },
        }
    }

    fn device(port: u16) -> DeviceConfig {
        DeviceConfig::builder()
            .host("127.0.0.1")
            .port(port)
            .name("hallway")
            .serial("AA:BB:CC:DD:EE:FF")
            .build()
    }

    async fn recv_text(rx: &mut UnboundedReceiver<String>) -> String {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for device frame")
            .expect("fake device stopped")
    }

    #[tokio::test]
    async fn test_sends_configuration_on_open() {
        let (port, mut received, _outbound) = fake_device().await;
        let sink = Arc::new(RecordingSink::default());
        let connection = DeviceConnection::connect(device(port), options(), sink);

        assert_eq!(recv_text(&mut received).await, r#"{"noMotionDelay":30000}"#);
        connection.status().wait_for_state(ConnectionState::Open).await;
        assert_eq!(connection.status().metrics().connections_opened(), 1);

        connection.shutdown().await;
        assert_eq!(connection.status().state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_reconfigure_same_endpoint_resends() {
        let (port, mut received, _outbound) = fake_device().await;
        let sink = Arc::new(RecordingSink::default());
        let connection = DeviceConnection::connect(device(port), options(), sink);
        recv_text(&mut received).await;

        let mut updated = device(port);
        updated.no_motion_delay_ms = 12_000;
        connection.reconfigure(updated);

        assert_eq!(recv_text(&mut received).await, r#"{"noMotionDelay":12000}"#);
        assert_eq!(connection.config().no_motion_delay_ms, 12_000);
        assert_eq!(connection.status().metrics().connections_opened(), 1);

        connection.shutdown().await;
    }

    #[tokio::test]
    async fn test_motion_updates_and_malformed_payloads() {
        let (port, mut received, outbound) = fake_device().await;
        let sink = Arc::new(RecordingSink::default());
        let connection = DeviceConnection::connect(device(port), options(), sink.clone());
        recv_text(&mut received).await;
        assert!(!connection.motion_detected());

        outbound.send(r#"{"motion":true}"#.to_string()).unwrap();
        outbound.send("not json".to_string()).unwrap();
        outbound.send("[true]".to_string()).unwrap();
        outbound.send(r#"{"motion":false}"#.to_string()).unwrap();

        timeout(Duration::from_secs(5), async {
            while sink.updates.lock().len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(*sink.updates.lock(), vec![true, false]);
        assert!(!connection.motion_detected());
        assert_eq!(connection.status().metrics().malformed_messages(), 2);
        assert!(connection.status().is_open());

        connection.shutdown().await;
    }

    #[tokio::test]
    async fn test_handshake_timeout_retries() {
        // Accepts TCP but never completes the websocket handshake.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let mut opts = options();
        opts.handshake_timeout = Duration::from_millis(50);
        let sink = Arc::new(RecordingSink::default());
        let connection = DeviceConnection::connect(device(port), opts, sink);

        timeout(Duration::from_secs(5), async {
            while connection.status().metrics().errors() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let last_error = connection.status().last_error().unwrap();
        assert!(last_error.contains("timed out"), "{last_error}");
        assert_eq!(connection.status().metrics().connections_opened(), 0);

        connection.shutdown().await;
    }

    #[tokio::test]
    async fn test_redirect_during_backoff_skips_wait() {
        // Nothing listens on the first endpoint once the listener is gone.
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_port = unused.local_addr().unwrap().port();
        drop(unused);

        let mut opts = options();
        opts.reconnect.initial_backoff = Duration::from_secs(30);
        opts.reconnect.max_backoff = Duration::from_secs(30);
        let sink = Arc::new(RecordingSink::default());
        let connection = DeviceConnection::connect(device(dead_port), opts, sink);

        timeout(Duration::from_secs(5), async {
            while connection.status().metrics().errors() < 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(!connection.status().is_open());

        let (port, mut received, _outbound) = fake_device().await;
        connection.reconfigure(device(port));

        assert_eq!(recv_text(&mut received).await, r#"{"noMotionDelay":30000}"#);
        connection.status().wait_for_state(ConnectionState::Open).await;
        assert_eq!(connection.config().port, port);
        assert_eq!(connection.status().metrics().connections_opened(), 1);

        connection.shutdown().await;
    }
}
