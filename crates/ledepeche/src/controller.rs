//! Dispatch controller
//!
//! *Le Contrôleur* (The Controller) - Owns the run state machine:
//!
//! ```text
//! Idle -> Dispatching -> { Cancelled, Completed } -> Idle
//! ```
//!
//! One submission is issued per destination, in order, followed by a fixed
//! pacing sleep that keeps the run under the provider's rate limit. The
//! cancellation token is checked before every send, and the pacing sleep wakes
//! early on cancellation.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::emitter::{ProgressEmitter, ProgressEvent};
use crate::error::{DispatchError, Result};
use crate::provider::{Credentials, MessageProvider, OutboundMessage};
use crate::run_state::{RunGuard, RunPhase, RunState, RunSummary};

/// Delay between consecutive submissions
pub const DEFAULT_PACING_INTERVAL: Duration = Duration::from_millis(110);

/// Delay before the loading indicator is reset to unknown
pub const DEFAULT_LOADING_RESET_DELAY: Duration = Duration::from_secs(5);

/// Upper bound on a single provider submission
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timing knobs for a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Sleep after each submission
    pub pacing_interval: Duration,
    /// How long after a run ends `loading` is reset to `null`
    pub loading_reset_delay: Duration,
    /// Submissions still pending after this are abandoned and logged
    pub submit_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            pacing_interval: DEFAULT_PACING_INTERVAL,
            loading_reset_delay: DEFAULT_LOADING_RESET_DELAY,
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
        }
    }
}

/// Everything needed to start a run
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Prepared destinations, in send order
    pub destinations: Vec<String>,
    /// Message body sent verbatim to every destination
    pub message: String,
    /// Provider credentials
    pub credentials: Credentials,
}

impl RunRequest {
    fn validate(&self) -> Result<()> {
        if self.destinations.is_empty() {
            return Err(DispatchError::EmptyDestinations);
        }
        if self.message.trim().is_empty() {
            return Err(DispatchError::EmptyMessage);
        }
        if self.credentials.api_key.trim().is_empty() {
            return Err(DispatchError::MissingCredential("apiKey"));
        }
        if self.credentials.messaging_profile_id.trim().is_empty() {
            return Err(DispatchError::MissingCredential("messagingProfileId"));
        }
        Ok(())
    }
}

/// Final report of a run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Slot summary (terminal phase, counts, timestamps)
    pub summary: RunSummary,
    /// Destinations submitted, in order
    pub submitted: Vec<String>,
    /// Wall time from first send to terminal phase
    pub elapsed: Duration,
}

/// Handle to a spawned run
#[derive(Debug)]
pub struct RunTicket {
    /// Run identifier
    pub run_id: Uuid,
    /// Number of destinations in the run
    pub destinations: usize,
    /// Resolves with the report when the run reaches a terminal phase
    pub handle: JoinHandle<RunReport>,
}

/// Orchestrates paced, cancellable dispatch runs
#[derive(Clone)]
pub struct DispatchController {
    run_state: Arc<RunState>,
    emitter: ProgressEmitter,
    provider: Arc<dyn MessageProvider>,
    settings: DispatchSettings,
}

impl DispatchController {
    /// Create a controller
    pub fn new(
        run_state: Arc<RunState>,
        emitter: ProgressEmitter,
        provider: Arc<dyn MessageProvider>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            run_state,
            emitter,
            provider,
            settings,
        }
    }

    /// Shared run state
    pub fn run_state(&self) -> &Arc<RunState> {
        &self.run_state
    }

    /// Emitter progress is published through
    pub fn emitter(&self) -> &ProgressEmitter {
        &self.emitter
    }

    /// Timing knobs in use
    pub fn settings(&self) -> DispatchSettings {
        self.settings
    }

    /// Validate the request, take the run slot, and spawn the dispatch loop.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Input errors when the request is empty or incomplete, and
    /// `DispatchError::RunInProgress` while another run is dispatching.
    pub fn start(&self, request: RunRequest) -> Result<RunTicket> {
        request.validate()?;

        let guard = self.run_state.begin(request.destinations.len())?;
        let run_id = guard.run_id();
        let destinations = request.destinations.len();
        info!(%run_id, destinations, "Starting dispatch run");

        let controller = self.clone();
        let handle = tokio::spawn(async move { controller.execute(guard, request).await });

        Ok(RunTicket {
            run_id,
            destinations,
            handle,
        })
    }

    /// Ask the active run (or the run `run_id`) to stop; idempotent
    pub fn cancel(&self, run_id: Option<Uuid>) -> Option<Uuid> {
        self.run_state.request_cancel(run_id)
    }

    async fn execute(self, guard: RunGuard, request: RunRequest) -> RunReport {
        let run_id = guard.run_id();
        let RunRequest {
            destinations,
            message,
            credentials,
        } = request;
        let credentials = Arc::new(credentials);

        self.emitter.emit(ProgressEvent::Loading {
            run_id,
            status: Some(true),
        });
        self.emitter.emit(ProgressEvent::AllSent {
            run_id,
            all_sent: false,
        });

        let started = Instant::now();
        let mut submitted = Vec::with_capacity(destinations.len());
        let mut phase = RunPhase::Completed;

        for destination in destinations {
            if guard.is_cancel_requested() {
                phase = RunPhase::Cancelled;
                break;
            }

            self.submit_detached(
                run_id,
                Arc::clone(&credentials),
                OutboundMessage {
                    to: destination.clone(),
                    text: message.clone(),
                },
            );
            submitted.push(destination);

            tokio::select! {
                _ = tokio::time::sleep(self.settings.pacing_interval) => {}
                _ = guard.cancelled() => {
                    debug!(%run_id, "Pacing interrupted by cancellation");
                }
            }
        }

        let elapsed = started.elapsed();
        // Free the slot first so a client reacting to `allSent` can start the next run.
        let summary = guard.finish(phase, submitted.len());

        self.emitter.emit(ProgressEvent::Loading {
            run_id,
            status: Some(false),
        });
        self.emitter.emit(ProgressEvent::AllSent {
            run_id,
            all_sent: phase == RunPhase::Completed,
        });
        self.schedule_loading_reset(run_id);

        info!(
            %run_id,
            phase = ?summary.phase,
            submitted = summary.submitted,
            total = summary.total,
            elapsed_ms = elapsed.as_millis() as u64,
            "Dispatch run finished"
        );

        RunReport {
            summary,
            submitted,
            elapsed,
        }
    }

    /// Fire one submission without awaiting it.
    ///
    /// Not awaited: the loop paces on the interval, not on provider completion.
    /// Failures are logged and the destination is not retried.
    fn submit_detached(&self, run_id: Uuid, credentials: Arc<Credentials>, message: OutboundMessage) {
        let provider = Arc::clone(&self.provider);
        let timeout = self.settings.submit_timeout;

        tokio::spawn(async move {
            let destination = message.to.clone();
            match tokio::time::timeout(timeout, provider.submit(&credentials, message)).await {
                Ok(Ok(receipt)) => {
                    debug!(%run_id, %destination, message_id = ?receipt.message_id, "Submitted");
                }
                Ok(Err(err)) => {
                    warn!(%run_id, %destination, error = %err, "Submission failed");
                }
                Err(_) => {
                    warn!(%run_id, %destination, timeout_ms = timeout.as_millis() as u64, "Submission timed out");
                }
            }
        });
    }

    /// Reset the loading indicator to unknown after the delay.
    ///
    /// Skipped when a newer run has started since, so the reset never lands
    /// in another run's progress stream.
    fn schedule_loading_reset(&self, run_id: Uuid) {
        let emitter = self.emitter.clone();
        let run_state = Arc::clone(&self.run_state);
        let delay = self.settings.loading_reset_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !run_state.is_latest_finished(run_id) {
                debug!(%run_id, "Loading reset skipped, a newer run took the slot");
                return;
            }
            emitter.emit(ProgressEvent::Loading {
                run_id,
                status: None,
            });
        });
    }
}
