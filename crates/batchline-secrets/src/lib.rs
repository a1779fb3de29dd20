pub mod client;
pub mod error;
pub mod types;

pub use client::{HttpSecretsClient, SecretsClient};
pub use error::{Result, SecretsError};
pub use types::{parse_ai_credentials, parse_provider_credentials, AiCredentials, ProviderCredentials};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_provider_credentials() {
        let raw = json!({"twilio_account_sid": "AC123", "twilio_auth_token": "tok"});
        let creds = parse_provider_credentials(&raw).unwrap();
        assert_eq!(creds.account_sid, "AC123");
        assert_eq!(creds.auth_token, "tok");
    }

    #[test]
    fn malformed_provider_credentials_is_permanent() {
        let raw = json!({"twilio_account_sid": "AC123"});
        let err = parse_provider_credentials(&raw).unwrap_err();
        assert_eq!(err.code(), "PERMANENT");
    }

    #[test]
    fn empty_secret_ref_is_invalid_input() {
        let client = HttpSecretsClient::new("http://localhost:9999");
        let result = tokio_test_block_on(client.fetch_secret(""));
        assert_eq!(result.unwrap_err().code(), "INVALID_INPUT");
    }

    fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(f)
    }
}
