use std::collections::BTreeMap;

use batchline_core::types::Channel;

/// A normalized, channel-agnostic view of one inbound provider request.
///
/// `conversation_id` is deliberately absent here — per SPEC_FULL.md §4.3 it
/// is never trusted from the request; `derived_context` carries only a
/// provisional id for the initial credential lookup.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub channel: Channel,
    pub signature: Option<String>,
    pub canonical_url: String,
    pub body_params: BTreeMap<String, String>,
    pub derived_context: DerivedContext,
}

/// Identifiers pulled out of the body before any I/O, used for the
/// credential-ref secondary-index lookup and to derive a provisional
/// conversation id.
#[derive(Debug, Clone)]
pub struct DerivedContext {
    pub from_id: String,
    pub to_id: String,
    pub message_sid: String,
    pub body: String,
    pub provisional_conversation_id: String,
}

/// `conv_<sorted user,company>` — a stand-in id used only to shape the
/// initial lookup; the authoritative id always comes back from C1.
pub fn derive_provisional_conversation_id(from_id: &str, to_id: &str) -> String {
    let mut pair = [from_id, to_id];
    pair.sort_unstable();
    format!("conv_{}_{}", pair[0], pair[1])
}
