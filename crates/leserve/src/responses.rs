//! API response types matching frontend contract

use ledepeche::{ReconcileOutcome, RunPhase};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Response for a started run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunResponse {
    /// Identifier of the spawned run
    pub run_id: Uuid,

    /// Number of destinations queued for dispatch
    pub destinations: usize,
}

/// Response for a cancel request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    /// Whether a run was signalled
    pub cancelled: bool,

    /// Run that was signalled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
}

impl CancelResponse {
    /// Build from the run that was signalled, if any
    pub fn from_signalled(run_id: Option<Uuid>) -> Self {
        Self {
            cancelled: run_id.is_some(),
            run_id,
        }
    }
}

/// Acknowledgement for a delivery webhook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookResponse {
    /// Human-readable summary
    pub response: String,
}

impl HookResponse {
    /// Summary for a whole webhook; recipients with untracked statuses are listed as ignored
    pub fn from_outcome(outcome: &ReconcileOutcome) -> Self {
        let published = outcome
            .published
            .iter()
            .map(|update| format!("Message to {} {}", update.destination, update.status));
        let ignored = outcome
            .ignored
            .iter()
            .map(|(destination, status)| format!("Ignored status {} for {}", status, destination));

        Self {
            response: published.chain(ignored).collect::<Vec<_>>().join("; "),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `ok` when the server answers
    pub status: String,

    /// Service name
    pub service: String,

    /// Crate version
    pub version: String,

    /// Live WebSocket sessions
    pub active_connections: usize,

    /// Dispatch slot phase
    pub phase: RunPhase,
}
