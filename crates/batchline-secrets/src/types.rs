use serde::Deserialize;

use crate::error::{Result, SecretsError};

/// Provider account credentials (C9 input), parsed out of the JSON blob a
/// secret reference resolves to (SPEC_FULL.md §8: `{ "twilio_account_sid":
/// ..., "twilio_auth_token": ... }`).
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderCredentials {
    #[serde(rename = "twilio_account_sid")]
    pub account_sid: String,
    #[serde(rename = "twilio_auth_token")]
    pub auth_token: String,
}

/// AI assistant credentials (C8 input), parsed out of `{ "ai_api_key": ... }`.
#[derive(Debug, Clone, Deserialize)]
pub struct AiCredentials {
    #[serde(rename = "ai_api_key")]
    pub api_key: String,
}

/// Parse a raw secret payload into provider credentials. A payload that
/// parses but is missing `auth_token` is a permanent error — the secret
/// exists but is malformed, so retrying will not help.
pub fn parse_provider_credentials(raw: &serde_json::Value) -> Result<ProviderCredentials> {
    serde_json::from_value(raw.clone())
        .map_err(|e| SecretsError::Permanent(format!("malformed provider credentials: {e}")))
}

pub fn parse_ai_credentials(raw: &serde_json::Value) -> Result<AiCredentials> {
    serde_json::from_value(raw.clone())
        .map_err(|e| SecretsError::Permanent(format!("malformed ai credentials: {e}")))
}
