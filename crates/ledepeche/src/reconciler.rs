//! Delivery status reconciliation
//!
//! *Le Rapprochement* (The Reconciliation) - Provider delivery callbacks arrive
//! on their own schedule, before, during or long after a run. Each recognized
//! callback becomes one `status` event. No deduplication, no run correlation,
//! and no shared state with the dispatch loop.

use serde::Deserialize;
use tracing::debug;

use crate::emitter::{DeliveryStatus, DestinationStatus, ProgressEmitter, ProgressEvent};
use crate::error::ReconcileError;

/// Telnyx message webhook envelope
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryWebhook {
    /// Event body
    pub data: WebhookData,
}

/// `data` member of the webhook
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    /// Provider event type, e.g. `message.finalized`
    #[serde(default)]
    pub event_type: Option<String>,
    /// Message details
    pub payload: WebhookPayload,
}

/// `data.payload` member of the webhook
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    /// Recipients and their statuses
    #[serde(default)]
    pub to: Vec<WebhookRecipient>,
}

/// One recipient entry
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookRecipient {
    /// Destination number
    pub phone_number: String,
    /// Provider status string
    pub status: String,
}

/// Result of reconciling one webhook
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Status events published
    pub published: Vec<DestinationStatus>,
    /// Recipients dropped for carrying an untracked status
    pub ignored: Vec<(String, String)>,
}

/// Turns delivery callbacks into `status` progress events
#[derive(Debug, Clone)]
pub struct DeliveryStatusReconciler {
    emitter: ProgressEmitter,
}

impl DeliveryStatusReconciler {
    /// Create a reconciler publishing through `emitter`
    pub fn new(emitter: ProgressEmitter) -> Self {
        Self { emitter }
    }

    /// Handle one callback for one destination.
    ///
    /// The destination is not checked against any run.
    ///
    /// # Errors
    ///
    /// `ReconcileError::UnrecognizedStatus` if `status` is not tracked; nothing is published.
    pub fn on_provider_callback(
        &self,
        destination: impl Into<String>,
        status: &str,
    ) -> Result<DestinationStatus, ReconcileError> {
        let status: DeliveryStatus = status.parse()?;
        let update = DestinationStatus {
            destination: destination.into(),
            status,
        };

        let receivers = self.emitter.emit(ProgressEvent::Status(update.clone()));
        debug!(destination = %update.destination, %status, receivers, "Delivery status published");
        Ok(update)
    }

    /// Handle every recipient of a provider webhook.
    ///
    /// # Errors
    ///
    /// `ReconcileError::MissingRecipient` if the webhook names no recipients.
    pub fn reconcile_webhook(&self, webhook: DeliveryWebhook) -> Result<ReconcileOutcome, ReconcileError> {
        let recipients = webhook.data.payload.to;
        if recipients.is_empty() {
            return Err(ReconcileError::MissingRecipient);
        }

        let mut outcome = ReconcileOutcome::default();
        for recipient in recipients {
            match self.on_provider_callback(recipient.phone_number.clone(), &recipient.status) {
                Ok(update) => outcome.published.push(update),
                Err(err) => {
                    debug!(
                        destination = %recipient.phone_number,
                        event_type = ?webhook.data.event_type,
                        error = %err,
                        "Delivery callback ignored"
                    );
                    outcome.ignored.push((recipient.phone_number, recipient.status));
                }
            }
        }
        Ok(outcome)
    }
}
