//! Codecs between the canonical form and the three wire protocols
//!
//! Six directions total: each protocol module canonicalizes inbound
//! requests/responses and re-emits outbound ones, plus a stream state
//! machine per direction for SSE translation.

pub mod anthropic;
pub mod chat;
pub mod responses;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in epoch seconds
pub(crate) fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Generate a prefixed wire id (`chatcmpl-…`, `resp_…`, `msg_…`)
pub(crate) fn wire_id(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}{}", &suffix[..24])
}
