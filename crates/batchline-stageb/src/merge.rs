use batchline_core::types::StagingFragment;

/// The result of merging every staged fragment of one batch.
pub struct MergedBatch {
    pub combined_body: String,
    pub first_message_sid: String,
    pub message_sids: Vec<String>,
}

/// Sort by `(received_at, message_sid)` ascending and concatenate `body`
/// with `"\n"` — the only ordering contract the system makes (SPEC_FULL.md
/// §5). Same input set in any arrival order yields the same `combined_body`.
///
/// Panics if `fragments` is empty; callers branch on `QueryStaging`
/// returning no rows before reaching this function.
pub fn merge_fragments(mut fragments: Vec<StagingFragment>) -> MergedBatch {
    assert!(!fragments.is_empty(), "merge_fragments called with no staged fragments");

    fragments.sort_by(|a, b| {
        (&a.received_at, &a.message_sid).cmp(&(&b.received_at, &b.message_sid))
    });

    let first_message_sid = fragments[0].message_sid.clone();
    let combined_body = fragments
        .iter()
        .map(|f| f.body.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let message_sids = fragments.into_iter().map(|f| f.message_sid).collect();

    MergedBatch { combined_body, first_message_sid, message_sids }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(sid: &str, received_at: &str, body: &str) -> StagingFragment {
        StagingFragment {
            conversation_id: "conv_1".into(),
            message_sid: sid.into(),
            primary_channel: "+20000".into(),
            body: body.into(),
            received_at: received_at.into(),
            expires_at: 0,
        }
    }

    #[test]
    fn merges_in_received_at_order_regardless_of_arrival_order() {
        let a = fragment("SM1", "2026-01-01T00:00:00Z", "Hello");
        let b = fragment("SM2", "2026-01-01T00:00:02Z", "there,");
        let c = fragment("SM3", "2026-01-01T00:00:04Z", "how are you?");

        let forward = merge_fragments(vec![a.clone(), b.clone(), c.clone()]);
        let shuffled = merge_fragments(vec![c, a, b]);

        assert_eq!(forward.combined_body, "Hello\nthere,\nhow are you?");
        assert_eq!(forward.combined_body, shuffled.combined_body);
        assert_eq!(forward.first_message_sid, "SM1");
    }

    #[test]
    fn ties_on_received_at_break_on_message_sid() {
        let a = fragment("SM2", "2026-01-01T00:00:00Z", "second");
        let b = fragment("SM1", "2026-01-01T00:00:00Z", "first");

        let merged = merge_fragments(vec![a, b]);
        assert_eq!(merged.combined_body, "first\nsecond");
        assert_eq!(merged.first_message_sid, "SM1");
    }
}
