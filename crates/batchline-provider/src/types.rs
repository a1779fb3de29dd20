use batchline_core::types::Channel;

/// What C10 needs to submit one outbound message.
#[derive(Debug, Clone)]
pub struct OutboundMessage<'a> {
    pub channel: Channel,
    pub recipient: &'a str,
    pub sender: &'a str,
    pub body: &'a str,
    pub account_sid: &'a str,
    pub auth_token: &'a str,
}

/// `{message_sid, body}` on success (C9 success payload).
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_sid: String,
    pub body: String,
}

/// Channel-specific address formatting — e.g. the `whatsapp:` prefix Twilio
/// requires on both the recipient and sender for WhatsApp messages.
pub fn format_address(channel: Channel, address: &str) -> String {
    match channel {
        Channel::Whatsapp => {
            if address.starts_with("whatsapp:") {
                address.to_string()
            } else {
                format!("whatsapp:{address}")
            }
        }
        Channel::Sms | Channel::Email => address.to_string(),
    }
}
