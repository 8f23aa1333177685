//! ledepeche - Bulk Dispatch
//!
//! *La Dépêche* (The Dispatch) - Turns a raw list of destinations into a paced,
//! cancellable sequence of provider submissions and republishes delivery callbacks
//! as live progress events.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

/// Error types for dispatch, provider and reconciliation failures
pub mod error;

/// Number-list parsing and destination preparation
pub mod parser;

/// Process-wide run slot and cancellation tokens
pub mod run_state;

/// Progress event types and the broadcast emitter
pub mod emitter;

/// Message provider abstraction and the Telnyx HTTP client
pub mod provider;

/// Dispatch state machine
pub mod controller;

/// Delivery callback reconciliation
pub mod reconciler;

pub use controller::{DispatchController, DispatchSettings, RunReport, RunRequest, RunTicket};
pub use emitter::{DeliveryStatus, DestinationStatus, ProgressEmitter, ProgressEvent, WireEvent};
pub use error::{DispatchError, ProviderError, ReconcileError};
pub use parser::{parse_numbers, prepare_destinations};
pub use provider::{Credentials, MessageProvider, OutboundMessage, SubmissionReceipt, TelnyxClient};
pub use reconciler::{DeliveryStatusReconciler, DeliveryWebhook, ReconcileOutcome};
pub use run_state::{RunGuard, RunPhase, RunSnapshot, RunState, RunSummary};
