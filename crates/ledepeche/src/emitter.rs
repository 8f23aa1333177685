//! Progress events
//!
//! *L'Émetteur* (The Emitter) - Best-effort broadcast of run progress to
//! whoever is listening right now. Nothing is buffered for late subscribers.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::error::ReconcileError;

/// Default capacity of the broadcast channel
pub const DEFAULT_EVENT_BUFFER: usize = 1000;

/// Delivery status reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Handed to the carrier
    Sent,
    /// Confirmed delivered
    Delivered,
    /// Provider could not send
    Failed,
    /// Carrier could not deliver
    DeliveryFailed,
}

impl DeliveryStatus {
    /// Wire name of the status
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::DeliveryFailed => "delivery_failed",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            "delivery_failed" => Ok(Self::DeliveryFailed),
            other => Err(ReconcileError::UnrecognizedStatus(other.to_string())),
        }
    }
}

/// One delivery callback, as shown on the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationStatus {
    /// Destination the callback refers to
    pub destination: String,
    /// Reported status
    pub status: DeliveryStatus,
}

/// Progress event published during and after a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Loading indicator: `Some(true)` at start, `Some(false)` at end, `None` after the reset delay
    Loading {
        /// Run the indicator belongs to
        run_id: Uuid,
        /// Indicator value
        status: Option<bool>,
    },

    /// Whether the whole destination list was exhausted
    AllSent {
        /// Run the flag belongs to
        run_id: Uuid,
        /// `true` only when the run completed
        all_sent: bool,
    },

    /// Delivery status for one destination; not tied to any run
    Status(DestinationStatus),
}

impl ProgressEvent {
    /// Event name on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Self::Loading { .. } => "loading",
            Self::AllSent { .. } => "allSent",
            Self::Status(_) => "status",
        }
    }

    /// Run the event belongs to, if any
    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            Self::Loading { run_id, .. } | Self::AllSent { run_id, .. } => Some(*run_id),
            Self::Status(_) => None,
        }
    }

    /// Event payload on the wire
    pub fn payload(&self) -> Value {
        match self {
            Self::Loading { status, .. } => json!({ "status": status }),
            Self::AllSent { all_sent, .. } => json!(all_sent),
            Self::Status(status) => json!(status),
        }
    }

    /// Frame sent to UI sessions
    pub fn to_wire(&self) -> WireEvent {
        WireEvent {
            event: self.name().to_string(),
            payload: self.payload(),
            run_id: self.run_id(),
        }
    }
}

/// `{"event": ..., "payload": ..., "runId": ...}` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    /// Event name
    pub event: String,
    /// Event payload
    pub payload: Value,
    /// Run the event belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
}

impl WireEvent {
    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Broadcast façade over the real-time transport
#[derive(Debug, Clone)]
pub struct ProgressEmitter {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressEmitter {
    /// Create an emitter whose slow subscribers lag after `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to every current subscriber; returns how many received it
    pub fn emit(&self, event: ProgressEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                trace!(event = event.name(), "No subscribers, progress event dropped");
                0
            }
        }
    }

    /// Receive events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for ProgressEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}
