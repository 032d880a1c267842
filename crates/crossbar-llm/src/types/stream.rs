use serde::{Deserialize, Serialize};

use super::response::{FinishReason, Usage};

/// Canonical streaming event
///
/// Each wire protocol's SSE frames translate to and from this sequence.
/// Ordering contract: for any tool call, `ToolCallStart` (carrying the
/// name) precedes every `ToolCallArgsDelta` for that index; `Finish`
/// precedes `Done`; `Done` is always last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamEvent {
    /// Assistant text fragment
    TextDelta {
        /// Text fragment
        text: String,
    },
    /// A tool call opened; the name is fully known here
    ToolCallStart {
        /// Sequential 0-based tool-call index within the turn
        index: u32,
        /// Call identifier
        id: String,
        /// Function name
        name: String,
    },
    /// Partial tool-call arguments, accumulated as raw JSON bytes
    ToolCallArgsDelta {
        /// Tool-call index the fragment belongs to
        index: u32,
        /// Arguments fragment
        arguments: String,
    },
    /// Generation finished
    Finish {
        /// Stop condition
        reason: FinishReason,
    },
    /// Usage totals, emitted at most once near the end of a stream
    Usage(Usage),
    /// Terminal event; nothing follows
    Done,
}

/// One server-sent-event frame on the wire
///
/// `event:` line is optional (chat streams use data-only frames);
/// `data` is the payload without the `data: ` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` line, when present
    pub event: Option<String>,
    /// Value of the `data:` line
    pub data: String,
}

impl SseFrame {
    /// Data-only frame
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    /// Named-event frame
    pub fn event(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }

    /// Serialize to the wire form, terminated by a blank line
    pub fn to_wire(&self) -> String {
        match &self.event {
            Some(event) => format!("event: {event}\ndata: {}\n\n", self.data),
            None => format!("data: {}\n\n", self.data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_with_event_name() {
        let frame = SseFrame::event("message_stop", "{}");
        assert_eq!(frame.to_wire(), "event: message_stop\ndata: {}\n\n");
    }

    #[test]
    fn wire_form_data_only() {
        let frame = SseFrame::data("[DONE]");
        assert_eq!(frame.to_wire(), "data: [DONE]\n\n");
    }
}
