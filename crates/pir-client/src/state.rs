use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;

/// Connection state of one device connection
///
/// `Connecting → Open → Closed → Connecting → …`, terminal only at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Handshake in progress (also the initial state)
    Connecting,
    /// Socket is open and the configuration has been sent
    Open,
    /// Socket closed or failed, waiting out the backoff
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Metrics for tracking connection statistics
#[derive(Debug, Clone)]
pub struct ConnectionMetrics {
    /// Total messages sent
    messages_sent: Arc<AtomicU64>,
    /// Total messages received
    messages_received: Arc<AtomicU64>,
    /// Inbound payloads discarded as malformed
    malformed_messages: Arc<AtomicU64>,
    /// Total errors encountered
    errors: Arc<AtomicU64>,
    /// Consecutive reconnection attempts since the last successful open
    reconnect_attempts: Arc<AtomicUsize>,
    /// Successful connection-open events
    connections_opened: Arc<AtomicU64>,
    /// Last activity timestamp
    last_activity: Arc<parking_lot::RwLock<SystemTime>>,
    /// Connection established timestamp
    connected_at: Arc<parking_lot::RwLock<Option<SystemTime>>>,
}

impl Default for ConnectionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMetrics {
    /// Create a new ConnectionMetrics instance
    pub fn new() -> Self {
        Self {
            messages_sent: Arc::new(AtomicU64::new(0)),
            messages_received: Arc::new(AtomicU64::new(0)),
            malformed_messages: Arc::new(AtomicU64::new(0)),
            errors: Arc::new(AtomicU64::new(0)),
            reconnect_attempts: Arc::new(AtomicUsize::new(0)),
            connections_opened: Arc::new(AtomicU64::new(0)),
            last_activity: Arc::new(parking_lot::RwLock::new(SystemTime::now())),
            connected_at: Arc::new(parking_lot::RwLock::new(None)),
        }
    }

    /// Record a message sent
    pub fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.update_last_activity();
    }

    /// Record a message received
    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.update_last_activity();
    }

    /// Record a discarded malformed payload
    pub fn record_malformed(&self) {
        self.malformed_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an error
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reconnection attempt
    pub fn record_reconnect(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Update last activity timestamp
    pub fn update_last_activity(&self) {
        *self.last_activity.write() = SystemTime::now();
    }

    /// Mark connection as established
    pub fn mark_connected(&self) {
        *self.connected_at.write() = Some(SystemTime::now());
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        self.reconnect_attempts.store(0, Ordering::Relaxed);
        self.update_last_activity();
    }

    /// Mark connection as disconnected
    pub fn mark_disconnected(&self) {
        *self.connected_at.write() = None;
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn malformed_messages(&self) -> u64 {
        self.malformed_messages.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn reconnect_attempts(&self) -> usize {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::Relaxed)
    }

    pub fn last_activity(&self) -> SystemTime {
        *self.last_activity.read()
    }

    pub fn connected_at(&self) -> Option<SystemTime> {
        *self.connected_at.read()
    }

    /// Get connection duration (if connected)
    pub fn connection_duration(&self) -> Option<Duration> {
        self.connected_at().and_then(|t| t.elapsed().ok())
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent(),
            messages_received: self.messages_received(),
            malformed_messages: self.malformed_messages(),
            errors: self.errors(),
            reconnect_attempts: self.reconnect_attempts(),
            connections_opened: self.connections_opened(),
            last_activity: self.last_activity(),
            connected_at: self.connected_at(),
        }
    }
}

/// Snapshot of connection metrics at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub malformed_messages: u64,
    pub errors: u64,
    pub reconnect_attempts: usize,
    pub connections_opened: u64,
    pub last_activity: SystemTime,
    pub connected_at: Option<SystemTime>,
}

/// Combined connection state and metrics
///
/// State changes are published on a watch channel so callers can await a
/// transition instead of polling.
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    state: Arc<watch::Sender<ConnectionState>>,
    metrics: ConnectionMetrics,
    last_error: Arc<parking_lot::RwLock<Option<String>>>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStatus {
    /// Create a new ConnectionStatus in the `Connecting` state
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            state: Arc::new(state),
            metrics: ConnectionMetrics::new(),
            last_error: Arc::new(parking_lot::RwLock::new(None)),
        }
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Set connection state
    pub fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Waits until the connection reaches `target`
    pub async fn wait_for_state(&self, target: ConnectionState) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = rx.wait_for(|state| *state == target).await;
    }

    /// Get metrics reference
    pub fn metrics(&self) -> &ConnectionMetrics {
        &self.metrics
    }

    /// Record a failure and move to `Closed`
    pub fn set_error(&self, error: String) {
        *self.last_error.write() = Some(error);
        self.metrics.record_error();
        self.metrics.mark_disconnected();
        self.set_state(ConnectionState::Closed);
    }

    /// Clear error message
    pub fn clear_error(&self) {
        *self.last_error.write() = None;
    }

    /// Most recent failure, if any
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Check if currently open
    pub fn is_open(&self) -> bool {
        matches!(self.state(), ConnectionState::Open)
    }
}
