//! Run state
//!
//! *L'État* (The State) - The single dispatch slot shared between the run loop
//! and whoever asks for cancellation.
//!
//! At most one run is active per process. Each run owns its own
//! [`CancellationToken`], so a cancel request that arrives while nothing is
//! running touches nothing and cannot leak into the next run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DispatchError, Result};

/// Dispatch lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// No run in progress
    Idle,
    /// Iterating the destination list
    Dispatching,
    /// Stopped early on request
    Cancelled,
    /// Destination list exhausted
    Completed,
}

/// The run currently holding the slot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRun {
    /// Run identifier
    pub run_id: Uuid,
    /// Number of prepared destinations
    pub total: usize,
    /// When the slot was taken
    pub started_at: DateTime<Utc>,
    #[serde(skip)]
    token: CancellationToken,
}

/// Outcome of a finished run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Run identifier
    pub run_id: Uuid,
    /// Terminal phase reached
    pub phase: RunPhase,
    /// Submissions issued before the run ended
    pub submitted: usize,
    /// Number of prepared destinations
    pub total: usize,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run reached its terminal phase
    pub finished_at: DateTime<Utc>,
}

/// Point-in-time view of the slot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    /// `Dispatching` while a run holds the slot, `Idle` otherwise
    pub phase: RunPhase,
    /// Active run, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_run: Option<ActiveRun>,
    /// Most recently finished run, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<RunSummary>,
}

#[derive(Debug, Default)]
struct Slots {
    active: Option<ActiveRun>,
    last: Option<RunSummary>,
}

/// Process-wide dispatch slot
#[derive(Debug, Default)]
pub struct RunState {
    slots: Mutex<Slots>,
}

impl RunState {
    /// Create an idle run state
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // Slots stay consistent across a panic; every update is a single assignment.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the slot for a new run.
    ///
    /// # Errors
    ///
    /// `DispatchError::RunInProgress` if another run holds the slot.
    pub fn begin(self: &Arc<Self>, total: usize) -> Result<RunGuard> {
        let mut slots = self.lock();
        if let Some(active) = &slots.active {
            return Err(DispatchError::RunInProgress {
                run_id: active.run_id,
            });
        }

        let run = ActiveRun {
            run_id: Uuid::new_v4(),
            total,
            started_at: Utc::now(),
            token: CancellationToken::new(),
        };
        let guard = RunGuard {
            state: Arc::clone(self),
            run_id: run.run_id,
            started_at: run.started_at,
            total,
            token: run.token.clone(),
            finished: false,
        };
        slots.active = Some(run);
        debug!(run_id = %guard.run_id, total, "Run slot acquired");
        Ok(guard)
    }

    /// Ask the active run to stop.
    ///
    /// With `run_id`, only that run is signalled. Returns the run that was
    /// signalled, or `None` when nothing matched. Repeating the call is harmless.
    pub fn request_cancel(&self, run_id: Option<Uuid>) -> Option<Uuid> {
        let slots = self.lock();
        let active = slots.active.as_ref()?;
        if run_id.is_some_and(|id| id != active.run_id) {
            debug!(requested = ?run_id, active = %active.run_id, "Cancel ignored for inactive run");
            return None;
        }
        if !active.token.is_cancelled() {
            info!(run_id = %active.run_id, "Cancellation requested");
            active.token.cancel();
        }
        Some(active.run_id)
    }

    /// Current phase of the slot
    pub fn phase(&self) -> RunPhase {
        if self.lock().active.is_some() {
            RunPhase::Dispatching
        } else {
            RunPhase::Idle
        }
    }

    /// Identifier of the active run, if any
    pub fn active_run_id(&self) -> Option<Uuid> {
        self.lock().active.as_ref().map(|run| run.run_id)
    }

    /// Whether the slot is idle and `run_id` is the run that last held it
    pub fn is_latest_finished(&self, run_id: Uuid) -> bool {
        let slots = self.lock();
        slots.active.is_none() && slots.last.as_ref().map(|run| run.run_id) == Some(run_id)
    }

    /// Snapshot of the active and most recent runs
    pub fn snapshot(&self) -> RunSnapshot {
        let slots = self.lock();
        RunSnapshot {
            phase: if slots.active.is_some() {
                RunPhase::Dispatching
            } else {
                RunPhase::Idle
            },
            active_run: slots.active.clone(),
            last_run: slots.last.clone(),
        }
    }

    fn release(&self, run_id: Uuid, summary: Option<RunSummary>) {
        let mut slots = self.lock();
        if slots.active.as_ref().map(|run| run.run_id) == Some(run_id) {
            slots.active = None;
        }
        if let Some(summary) = summary {
            slots.last = Some(summary);
        }
    }
}

/// Ownership of the dispatch slot for one run.
///
/// Dropping the guard without [`RunGuard::finish`] still frees the slot, so a
/// panicking run cannot wedge the process.
#[derive(Debug)]
pub struct RunGuard {
    state: Arc<RunState>,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    total: usize,
    token: CancellationToken,
    finished: bool,
}

impl RunGuard {
    /// Identifier of this run
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Polled by the dispatch loop before each send; reading does not clear it
    pub fn is_cancel_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Record the terminal phase and free the slot
    pub fn finish(mut self, phase: RunPhase, submitted: usize) -> RunSummary {
        let summary = RunSummary {
            run_id: self.run_id,
            phase,
            submitted,
            total: self.total,
            started_at: self.started_at,
            finished_at: Utc::now(),
        };
        self.state.release(self.run_id, Some(summary.clone()));
        self.finished = true;
        summary
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.state.release(self.run_id, None);
        }
    }
}
