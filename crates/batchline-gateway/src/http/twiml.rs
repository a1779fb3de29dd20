use axum::http::header;
use axum::response::{IntoResponse, Response};

/// Renders the two TwiML bodies Stage A's ack outcomes ever produce
/// (SPEC_FULL.md §8: empty ack, or the "please wait" lock message). Every
/// other classified error also renders as empty TwiML per the anti-oracle
/// policy in §7 — telephony users never see a structured error.
pub struct Twiml(pub String);

impl Twiml {
    pub fn empty() -> Self {
        Self("<Response/>".to_string())
    }

    pub fn message(body: &str) -> Self {
        Self(format!("<Response><Message>{}</Message></Response>", escape(body)))
    }
}

impl IntoResponse for Twiml {
    fn into_response(self) -> Response {
        (
            [(header::CONTENT_TYPE, "text/xml")],
            self.0,
        )
            .into_response()
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
