pub mod error;
pub mod parser;
pub mod signature;
pub mod types;

pub use error::{Result, WebhookError};
pub use parser::{build_canonical_url, channel_from_path, parse_email_request, parse_telephony_request};
pub use signature::verify_twilio_signature;
pub use types::{derive_provisional_conversation_id, DerivedContext, ParsedRequest};
