//! Error types
//!
//! *Les Erreurs* (The Errors) - One enum per failure boundary: starting a run,
//! talking to the provider, and reconciling delivery callbacks.

use thiserror::Error;
use uuid::Uuid;

/// Result type for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Reasons a run cannot be started
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Destination list was empty after preparation
    #[error("no destinations to dispatch")]
    EmptyDestinations,

    /// Message body was empty or whitespace
    #[error("message body is empty")]
    EmptyMessage,

    /// A required provider credential was blank
    #[error("missing provider credential: {0}")]
    MissingCredential(&'static str),

    /// Another run currently holds the dispatch slot
    #[error("run {run_id} already in progress")]
    RunInProgress {
        /// Identifier of the run that is still dispatching
        run_id: Uuid,
    },
}

impl DispatchError {
    /// Whether this error was caused by the request contents rather than server state
    pub fn is_input_error(&self) -> bool {
        !matches!(self, DispatchError::RunInProgress { .. })
    }
}

/// Failures surfaced by a message provider at submission time
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Provider answered with a non-success HTTP status
    #[error("provider rejected submission (status={status}): {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body, as returned
        body: String,
    },

    /// Request never produced a response
    #[error("provider transport error: {0}")]
    Transport(String),

    /// Submission exceeded its time budget
    #[error("provider submission timed out")]
    Timeout,

    /// Response could not be decoded
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// Failures while turning a provider callback into a status event
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// Status value is not one the dashboard tracks
    #[error("unrecognized delivery status: {0}")]
    UnrecognizedStatus(String),

    /// Webhook payload named no recipients
    #[error("delivery webhook has no recipients")]
    MissingRecipient,
}
