use std::collections::BTreeMap;

use batchline_core::types::Channel;

use crate::error::{Result, WebhookError};
use crate::types::{derive_provisional_conversation_id, DerivedContext, ParsedRequest};

/// Channel is derived from the path suffix (`/whatsapp`, `/sms`, `/email`).
pub fn channel_from_path(path: &str) -> Result<Channel> {
    let suffix = path.trim_start_matches('/').trim_end_matches('/');
    suffix
        .parse()
        .map_err(|_| WebhookError::UnknownChannel(path.to_string()))
}

/// `"https://" + host_header + "/" + stage + path`, matching the provider's
/// signature-input rules. `stage` is an empty-string path segment in
/// deployments with no API-gateway-style stage prefix; joining must not
/// introduce a double slash when `stage` is empty. Standard ports (none
/// present in a bare `Host` header) are elided by construction.
pub fn build_canonical_url(host: &str, stage: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if stage.is_empty() {
        format!("https://{host}/{path}")
    } else {
        let stage = stage.trim_matches('/');
        format!("https://{host}/{stage}/{path}")
    }
}

/// Parse an `application/x-www-form-urlencoded` body into a sorted map,
/// percent-decoding both keys and values.
fn parse_form_urlencoded(raw_body: &[u8]) -> Result<BTreeMap<String, String>> {
    let body = std::str::from_utf8(raw_body)
        .map_err(|e| WebhookError::MalformedBody(format!("body is not valid UTF-8: {e}")))?;

    let mut params = BTreeMap::new();
    if body.is_empty() {
        return Ok(params);
    }
    for pair in body.split('&') {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or("");
        let value = parts.next().unwrap_or("");
        // `+` means space and must be substituted before percent-decoding,
        // or a literal `+` that was escaped as `%2B` gets corrupted into a space.
        let key = urlencoding::decode(&key.replace('+', " "))
            .map_err(|e| WebhookError::MalformedBody(format!("invalid percent-encoding: {e}")))?
            .into_owned();
        let value = urlencoding::decode(&value.replace('+', " "))
            .map_err(|e| WebhookError::MalformedBody(format!("invalid percent-encoding: {e}")))?
            .into_owned();
        params.insert(key, value);
    }
    Ok(params)
}

/// Parse a telephony-channel (WhatsApp/SMS) webhook request. A request
/// missing any essential identifier fails parsing before any I/O is
/// attempted (SPEC_FULL.md §4.3).
pub fn parse_telephony_request(
    channel: Channel,
    host: &str,
    stage: &str,
    path: &str,
    signature_header: Option<&str>,
    raw_body: &[u8],
) -> Result<ParsedRequest> {
    let body_params = parse_form_urlencoded(raw_body)?;

    let from_id = require_field(&body_params, "From")?;
    let to_id = require_field(&body_params, "To")?;
    let message_sid = require_field(&body_params, "MessageSid")?;
    let body = require_field(&body_params, "Body")?;

    let canonical_url = build_canonical_url(host, stage, path);
    let provisional_conversation_id = derive_provisional_conversation_id(&from_id, &to_id);

    Ok(ParsedRequest {
        channel,
        signature: signature_header.map(|s| s.to_string()),
        canonical_url,
        body_params,
        derived_context: DerivedContext {
            from_id,
            to_id,
            message_sid,
            body,
            provisional_conversation_id,
        },
    })
}

fn require_field(params: &BTreeMap<String, String>, key: &'static str) -> Result<String> {
    params
        .get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or(WebhookError::MissingField(key))
}

/// JSON body fields for the email channel.
#[derive(Debug, serde::Deserialize)]
struct EmailBody {
    from_address: String,
    to_address: String,
    email_id: String,
    body: String,
}

/// Parse an email-channel webhook request. Email has no provider signature
/// scheme in scope here; `signature` is always `None` and authentication,
/// if any, is handled upstream of this parser.
pub fn parse_email_request(host: &str, stage: &str, path: &str, raw_body: &[u8]) -> Result<ParsedRequest> {
    let parsed: EmailBody = serde_json::from_slice(raw_body)
        .map_err(|e| WebhookError::MalformedBody(format!("invalid JSON body: {e}")))?;

    if parsed.from_address.is_empty() {
        return Err(WebhookError::MissingField("from_address"));
    }
    if parsed.to_address.is_empty() {
        return Err(WebhookError::MissingField("to_address"));
    }
    if parsed.email_id.is_empty() {
        return Err(WebhookError::MissingField("email_id"));
    }
    if parsed.body.is_empty() {
        return Err(WebhookError::MissingField("body"));
    }

    let canonical_url = build_canonical_url(host, stage, path);
    let provisional_conversation_id =
        derive_provisional_conversation_id(&parsed.from_address, &parsed.to_address);

    let mut body_params = BTreeMap::new();
    body_params.insert("from_address".to_string(), parsed.from_address.clone());
    body_params.insert("to_address".to_string(), parsed.to_address.clone());
    body_params.insert("email_id".to_string(), parsed.email_id.clone());
    body_params.insert("body".to_string(), parsed.body.clone());

    Ok(ParsedRequest {
        channel: Channel::Email,
        signature: None,
        canonical_url,
        body_params,
        derived_context: DerivedContext {
            from_id: parsed.from_address,
            to_id: parsed.to_address,
            message_sid: parsed.email_id,
            body: parsed.body,
            provisional_conversation_id,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_is_derived_from_path_suffix() {
        assert_eq!(channel_from_path("/whatsapp").unwrap(), Channel::Whatsapp);
        assert_eq!(channel_from_path("/sms").unwrap(), Channel::Sms);
        assert_eq!(channel_from_path("/email").unwrap(), Channel::Email);
        assert!(channel_from_path("/unknown").is_err());
    }

    #[test]
    fn canonical_url_has_no_double_slash_with_empty_stage() {
        let url = build_canonical_url("example.com", "", "/whatsapp");
        assert_eq!(url, "https://example.com/whatsapp");
    }

    #[test]
    fn canonical_url_includes_stage_when_present() {
        let url = build_canonical_url("example.com", "prod", "/whatsapp");
        assert_eq!(url, "https://example.com/prod/whatsapp");
    }

    #[test]
    fn telephony_request_missing_message_sid_fails_before_any_io() {
        let body = b"From=whatsapp%3A%2B1&To=whatsapp%3A%2B2&Body=Hi";
        let err = parse_telephony_request(
            Channel::Whatsapp,
            "example.com",
            "",
            "/whatsapp",
            Some("sig"),
            body,
        )
        .unwrap_err();
        assert_eq!(err.code(), "PERMANENT");
    }

    #[test]
    fn telephony_request_parses_required_fields() {
        let body = b"From=whatsapp%3A%2B15550000001&To=whatsapp%3A%2B15550000002&Body=Hi+there&MessageSid=SM1";
        let parsed = parse_telephony_request(
            Channel::Whatsapp,
            "example.com",
            "",
            "/whatsapp",
            Some("sig"),
            body,
        )
        .unwrap();
        assert_eq!(parsed.derived_context.from_id, "whatsapp:+15550000001");
        assert_eq!(parsed.derived_context.message_sid, "SM1");
        assert_eq!(parsed.derived_context.body, "Hi there");
        assert!(parsed.derived_context.provisional_conversation_id.starts_with("conv_"));
    }

    #[test]
    fn missing_signature_header_is_recorded_as_none() {
        let body = b"From=whatsapp%3A%2B1&To=whatsapp%3A%2B2&Body=Hi&MessageSid=SM1";
        let parsed =
            parse_telephony_request(Channel::Whatsapp, "example.com", "", "/whatsapp", None, body)
                .unwrap();
        assert!(parsed.signature.is_none());
    }
}
