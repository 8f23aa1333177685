//! Message provider
//!
//! *Le Fournisseur* (The Provider) - The capability to submit one message.
//! The dispatch loop only depends on [`MessageProvider`]; [`TelnyxClient`] is
//! the production implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::error::ProviderError;

/// Default Telnyx API root
pub const DEFAULT_TELNYX_BASE_URL: &str = "https://api.telnyx.com/v2";

/// Provider credentials, passed through unmodified
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    /// Provider API key
    pub api_key: String,
    /// Messaging profile the messages are sent from
    pub messaging_profile_id: String,
}

impl Credentials {
    /// Create credentials
    pub fn new(api_key: impl Into<String>, messaging_profile_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            messaging_profile_id: messaging_profile_id.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("messaging_profile_id", &self.messaging_profile_id)
            .finish()
    }
}

/// One message to one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination phone number
    pub to: String,
    /// Message body, verbatim
    pub text: String,
}

/// What the provider returned for an accepted submission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionReceipt {
    /// Provider-side message id, when the response carried one
    pub message_id: Option<String>,
}

/// Submits messages to a third-party provider
#[async_trait]
pub trait MessageProvider: Send + Sync {
    /// Submit one message.
    ///
    /// Resolving means the provider accepted or rejected the submission; delivery
    /// is reported later through the delivery webhook.
    async fn submit(
        &self,
        credentials: &Credentials,
        message: OutboundMessage,
    ) -> Result<SubmissionReceipt, ProviderError>;
}

#[derive(Debug, Serialize)]
struct CreateMessageRequest<'a> {
    to: &'a str,
    text: &'a str,
    messaging_profile_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateMessageResponse {
    data: Option<CreatedMessage>,
}

#[derive(Debug, Deserialize)]
struct CreatedMessage {
    id: Option<String>,
}

/// Telnyx messaging API client
#[derive(Debug, Clone)]
pub struct TelnyxClient {
    http: reqwest::Client,
    base_url: String,
}

impl TelnyxClient {
    /// Create a client against `base_url` (e.g. [`DEFAULT_TELNYX_BASE_URL`])
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProviderError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Endpoint messages are posted to
    pub fn messages_endpoint(&self) -> String {
        format!("{}/messages", self.base_url)
    }
}

#[async_trait]
impl MessageProvider for TelnyxClient {
    async fn submit(
        &self,
        credentials: &Credentials,
        message: OutboundMessage,
    ) -> Result<SubmissionReceipt, ProviderError> {
        let response = self
            .http
            .post(self.messages_endpoint())
            .bearer_auth(&credentials.api_key)
            .json(&CreateMessageRequest {
                to: &message.to,
                text: &message.text,
                messaging_profile_id: &credentials.messaging_profile_id,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: CreateMessageResponse = response.json().await?;
        let message_id = body.data.and_then(|data| data.id);
        debug!(to = %message.to, message_id = ?message_id, "Provider accepted submission");
        Ok(SubmissionReceipt { message_id })
    }
}
