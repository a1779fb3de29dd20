use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{ProviderError, Result};
use crate::types::{format_address, OutboundMessage, SendReceipt};

/// Submits the outbound message and returns the provider receipt on
/// success. The adapter owns any channel-specific address formatting.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn send(&self, message: OutboundMessage<'_>) -> Result<SendReceipt>;
}

/// Twilio Messages API client.
pub struct TwilioClient {
    http: reqwest::Client,
    base_url: String,
}

impl TwilioClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into() }
    }
}

#[derive(Debug, serde::Deserialize)]
struct TwilioMessageResponse {
    sid: String,
    #[serde(default)]
    body: String,
}

#[async_trait]
impl ProviderClient for TwilioClient {
    async fn send(&self, message: OutboundMessage<'_>) -> Result<SendReceipt> {
        if message.recipient.is_empty() || message.sender.is_empty() || message.body.is_empty() {
            return Err(ProviderError::InvalidInput(
                "recipient, sender, and body are all required".into(),
            ));
        }

        let to = format_address(message.channel, message.recipient);
        let from = format_address(message.channel, message.sender);

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url.trim_end_matches('/'),
            message.account_sid
        );

        info!(%to, channel = %message.channel, "sending outbound message");

        let resp = self
            .http
            .post(&url)
            .basic_auth(message.account_sid, Some(message.auth_token))
            .form(&[("To", to.as_str()), ("From", from.as_str()), ("Body", message.body)])
            .send()
            .await
            .map_err(|e| {
                warn!("transport error sending outbound message: {e}");
                ProviderError::Transient(e.to_string())
            })?;

        let status = resp.status();
        if status.is_server_error() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Transient(format!("provider returned {status}: {text}")));
        }
        if status.is_client_error() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::NonTransient(format!("provider returned {status}: {text}")));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            // Unexpected/unclassified responses default to transient: an
            // unrecognized failure from the send API is more often a blip
            // than a permanent rejection, so a retry is favored over
            // silently dropping a reply.
            return Err(ProviderError::Transient(format!("unexpected provider response {status}: {text}")));
        }

        let parsed: TwilioMessageResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("failed to parse provider response: {e}")))?;

        Ok(SendReceipt { message_sid: parsed.sid, body: parsed.body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchline_core::types::Channel;

    #[tokio::test]
    async fn missing_body_is_invalid_input() {
        let client = TwilioClient::new("http://localhost:9999");
        let message = OutboundMessage {
            channel: Channel::Whatsapp,
            recipient: "+15550000001",
            sender: "+15550000002",
            body: "",
            account_sid: "AC1",
            auth_token: "tok",
        };
        let err = client.send(message).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }
}
