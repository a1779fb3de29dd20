pub mod client;
pub mod error;
pub mod types;

pub use client::{ProviderClient, TwilioClient};
pub use error::{ProviderError, Result};
pub use types::{format_address, OutboundMessage, SendReceipt};
