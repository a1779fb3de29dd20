use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{Result, SecretsError};

/// Resolves a secret reference to its JSON payload.
///
/// One call per reference; callers needing AI-then-provider fail-fast
/// ordering (see SPEC_FULL.md §4.9 C10 step 7) issue two calls and stop at
/// the first `Err`.
#[async_trait]
pub trait SecretsClient: Send + Sync {
    async fn fetch_secret(&self, secret_ref: &str) -> Result<serde_json::Value>;
}

/// HTTP-backed secrets client. Talks to a vault endpoint over `reqwest`,
/// classifying transport/status failures the way `secrets_manager_service.py`
/// classifies `ClientError` codes: 404 -> not found, 5xx/network -> transient,
/// everything else -> permanent.
pub struct HttpSecretsClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSecretsClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into() }
    }
}

#[async_trait]
impl SecretsClient for HttpSecretsClient {
    async fn fetch_secret(&self, secret_ref: &str) -> Result<serde_json::Value> {
        if secret_ref.is_empty() {
            return Err(SecretsError::InvalidInput("secret_ref is empty".into()));
        }

        let url = format!("{}/secrets/{}", self.base_url.trim_end_matches('/'), secret_ref);
        info!(%secret_ref, "fetching secret");

        let resp = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(%secret_ref, "transient error fetching secret: {e}");
                return Err(SecretsError::Transient(e.to_string()));
            }
        };

        match resp.status() {
            status if status.is_success() => resp
                .json::<serde_json::Value>()
                .await
                .map_err(|e| SecretsError::Permanent(format!("malformed secret payload: {e}"))),
            status if status.as_u16() == 404 => Err(SecretsError::NotFound(secret_ref.to_string())),
            status if status.is_server_error() => {
                Err(SecretsError::Transient(format!("secrets store returned {status}")))
            }
            status => Err(SecretsError::Permanent(format!("secrets store returned {status}"))),
        }
    }
}
