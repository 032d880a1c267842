use serde::{Deserialize, Serialize};

use super::message::ToolCall;

/// Why generation stopped, in canonical terms
///
/// Per-protocol spellings live in the codecs:
///
/// | canonical | chat | responses | anthropic |
/// |---|---|---|---|
/// | `Stop` | `stop` | `completed` | `end_turn` |
/// | `ToolCalls` | `tool_calls` | `required_action` | `tool_use` |
/// | `Length` | `length` | `incomplete` | `max_tokens` |
/// | `ContentFilter` | `content_filter` | `incomplete` | `stop_sequence` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
}

/// Token usage reported by the upstream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The assistant's output within a canonical response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantOutput {
    /// Text content; `None` when the turn is tool calls only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool calls requested by the assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// Canonical completion: a single-choice, chat-shaped response
///
/// Upstream responses of any protocol canonicalize here before being
/// re-emitted in the client's wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalResponse {
    /// Upstream response id (or a gateway-issued one for synthesis)
    pub id: String,
    /// Model that produced the response
    pub model: String,
    /// Creation timestamp, epoch seconds
    pub created: u64,
    /// Assistant output
    pub output: AssistantOutput,
    /// Stop condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// Token usage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl CanonicalResponse {
    /// Whether the assistant asked for tools to be run
    pub fn wants_tools(&self) -> bool {
        self.finish_reason == Some(FinishReason::ToolCalls)
            || self.output.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }
}
