/// Replaces exception-based control flow between Stage A and the transport
/// layer (REDESIGN FLAGS): the orchestrator never raises to force a
/// response, it always returns one of these two outcomes and lets the
/// transport adapter map it to an HTTP status and body.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Acknowledge the webhook (HTTP 200). Every non-transient error is
    /// surfaced this way so telephony providers don't retry on our behalf.
    Ack(AckOutcome),
    /// Let the transport adapter raise an HTTP 5xx so the provider retries.
    Retry(String),
}

#[derive(Debug, Clone)]
pub enum AckOutcome {
    /// The canonical success ack — for telephony channels, empty TwiML.
    Empty,
    /// `CONVERSATION_LOCKED`: the specific "please wait" reply.
    ConversationLocked,
    /// Any other non-transient failure, carrying a domain code for logs/JSON
    /// bodies. Telephony channels still render this as empty TwiML — the
    /// anti-oracle policy from SPEC_FULL.md §7 — while the email channel
    /// surfaces it as a structured JSON error body.
    Error { code: &'static str, message: String },
}
