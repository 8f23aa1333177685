//! WebSocket event broadcasting

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use ledepeche::{ProgressEmitter, ProgressEvent};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Maximum WebSocket message size (1MB) to prevent DoS attacks
pub const MAX_WS_MESSAGE_SIZE: usize = 1_000_000;

/// Maximum WebSocket frame size (16KB) to prevent memory exhaustion
pub const MAX_WS_FRAME_SIZE: usize = 16_384;

/// Heartbeat frame sent on the configured interval
pub fn heartbeat_frame() -> String {
    json!({
        "event": "heartbeat",
        "payload": { "timestamp": chrono::Utc::now().timestamp_millis() },
    })
    .to_string()
}

/// Client connection state
#[derive(Debug, Clone)]
pub struct ConnectionState {
    /// Unique connection ID
    pub id: String,

    /// Subscribed run IDs (empty = all runs)
    pub subscriptions: Vec<Uuid>,

    /// Client IP address
    pub ip_addr: Option<String>,
}

impl ConnectionState {
    /// Create new connection state
    pub fn new(id: String, ip_addr: Option<String>) -> Self {
        Self {
            id,
            subscriptions: Vec::new(),
            ip_addr,
        }
    }

    /// Check if connection is subscribed to a run
    pub fn is_subscribed_to(&self, run_id: Uuid) -> bool {
        // Empty subscriptions = all runs
        self.subscriptions.is_empty() || self.subscriptions.contains(&run_id)
    }

    /// Whether this session should receive `event`
    ///
    /// Events without a run (delivery statuses) go to everyone.
    pub fn wants(&self, event: &ProgressEvent) -> bool {
        event.run_id().map_or(true, |run_id| self.is_subscribed_to(run_id))
    }

    /// Add subscription
    pub fn subscribe(&mut self, run_id: Uuid) {
        if !self.subscriptions.contains(&run_id) {
            self.subscriptions.push(run_id);
        }
    }
}

/// WebSocket connection manager
///
/// Tracks all active connections and forwards progress events to them
#[derive(Clone)]
pub struct WsManager {
    /// Active connections: connection_id -> state
    pub connections: Arc<tokio::sync::RwLock<HashMap<String, ConnectionState>>>,

    /// Source of progress events
    pub emitter: ProgressEmitter,

    /// Interval between heartbeat frames
    pub heartbeat_interval: Duration,
}

impl WsManager {
    /// Create new WebSocket manager
    pub fn new(emitter: ProgressEmitter, heartbeat_interval: Duration) -> Self {
        Self {
            connections: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            emitter,
            heartbeat_interval,
        }
    }

    /// Reserve a slot for a new connection; `false` when `limit` is reached
    ///
    /// The check and the insert happen under one write lock, so concurrent
    /// upgrades cannot overshoot the limit.
    pub async fn try_register(&self, state: ConnectionState, limit: usize) -> bool {
        let mut connections = self.connections.write().await;
        if connections.len() >= limit {
            return false;
        }
        info!(
            "WebSocket connected: {} from {} (active: {})",
            state.id,
            state.ip_addr.as_deref().unwrap_or("unknown"),
            connections.len() + 1
        );
        connections.insert(state.id.clone(), state);
        true
    }

    /// Unregister a connection
    pub async fn unregister_connection(&self, conn_id: &str) {
        let mut connections = self.connections.write().await;
        connections.remove(conn_id);
        info!("WebSocket disconnected: {} (active: {})", conn_id, connections.len());
    }

    /// Get number of active connections
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Drive one registered socket until either side closes
    ///
    /// `events` is subscribed before the upgrade so nothing emitted while the
    /// handshake completes is missed. The connection is unregistered on exit.
    pub async fn serve_socket(
        self,
        socket: WebSocket,
        state: ConnectionState,
        mut events: broadcast::Receiver<ProgressEvent>,
    ) {
        let conn_id = state.id.clone();

        let (mut sender, mut receiver) = socket.split();
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        if !state.wants(&event) {
                            continue;
                        }
                        let frame = match event.to_wire().to_json() {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!("Failed to serialize {} event: {}", event.name(), e);
                                continue;
                            }
                        };
                        if sender.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("WebSocket {} lagged, skipped {} events", conn_id, skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
                incoming = receiver.next() => match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket {} receive error: {}", conn_id, e);
                        break;
                    }
                },
                _ = heartbeat.tick() => {
                    if sender.send(Message::Text(heartbeat_frame())).await.is_err() {
                        break;
                    }
                }
            }
        }

        self.unregister_connection(&conn_id).await;
    }
}
