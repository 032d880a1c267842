use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Wire protocol spoken at an HTTP endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireProtocol {
    /// Chat-completions shape (`/v1/chat/completions`)
    Chat,
    /// Stateful responses shape (`/v1/responses`)
    Responses,
    /// Anthropic messages shape (`/v1/messages`)
    Anthropic,
}

impl WireProtocol {
    /// Name used in config documents and logs
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Responses => "responses",
            Self::Anthropic => "anthropic",
        }
    }
}

impl std::fmt::Display for WireProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request envelope created at the HTTP boundary
///
/// Owned exclusively by the boundary for the request's lifetime;
/// downstream components receive read-only views. Immutable after
/// construction.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    /// Gateway-issued request identifier
    pub request_id: String,
    /// Protocol the client spoke
    pub wire_protocol: WireProtocol,
    /// Endpoint path the request arrived on
    pub endpoint: String,
    /// Session binding, when the client supplied one
    pub session_id: Option<String>,
    /// Conversation binding (responses tool loops)
    pub conversation_id: Option<String>,
    /// Whether a server-tool pause is already in flight for this request
    pub server_tool_required: bool,
    /// Receive timestamp
    pub born_at: SystemTime,
}

impl RequestEnvelope {
    /// Create an envelope for a freshly received request
    pub fn new(request_id: String, wire_protocol: WireProtocol, endpoint: impl Into<String>) -> Self {
        Self {
            request_id,
            wire_protocol,
            endpoint: endpoint.into(),
            session_id: None,
            conversation_id: None,
            server_tool_required: false,
            born_at: SystemTime::now(),
        }
    }
}

/// Issues request identifiers: a process-monotonic counter plus a random
/// suffix so ids stay unique across restarts
#[derive(Debug, Default)]
pub struct RequestIdSource {
    counter: AtomicU64,
}

impl RequestIdSource {
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Issue the next request id
    pub fn next_id(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("req_{seq:08x}_{}", &suffix[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_unique() {
        let source = RequestIdSource::new();
        let a = source.next_id();
        let b = source.next_id();
        assert_ne!(a, b);
        assert!(a.starts_with("req_00000000_"));
        assert!(b.starts_with("req_00000001_"));
    }

    #[test]
    fn envelope_defaults() {
        let env = RequestEnvelope::new("req_1".to_owned(), WireProtocol::Chat, "/v1/chat/completions");
        assert!(env.session_id.is_none());
        assert!(!env.server_tool_required);
        assert_eq!(env.wire_protocol.as_str(), "chat");
    }
}
