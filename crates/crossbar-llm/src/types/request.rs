use serde::{Deserialize, Serialize};

use super::message::{Content, Message, Role};
use super::tool::{AliasMap, ToolChoice, ToolDefinition};

/// Sampling parameters shared by all wire protocols
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Stop sequences
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

/// The switch's internal, protocol-agnostic request form
///
/// Invariants enforced by [`Self::enforce_invariants`]:
/// - assistant turns carrying tool calls have empty textual content
/// - every tool-role turn pairs a tool call seen earlier in the request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRequest {
    /// Requested model name
    pub model: String,
    /// System / instructions text, separated from the turn list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Conversation turns, oldest first
    pub messages: Vec<Message>,
    /// Normalized tool definitions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    /// Tool selection directive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Whether the client asked for SSE
    #[serde(default)]
    pub stream: bool,
    /// Sampling parameters
    #[serde(default)]
    pub params: GenerationParams,
    /// Opaque extended-thinking payload, forwarded untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_thinking: Option<serde_json::Value>,
    /// Tool rename map from normalization; reversed on output
    #[serde(default, skip_serializing_if = "AliasMap::is_empty")]
    pub tool_aliases: AliasMap,
}

impl CanonicalRequest {
    /// Minimal request with one user turn
    pub fn user_text(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            instructions: None,
            messages: vec![Message::user(text)],
            tools: Vec::new(),
            tool_choice: None,
            stream: false,
            params: GenerationParams::default(),
            extended_thinking: None,
            tool_aliases: AliasMap::default(),
        }
    }

    /// Enforce the canonical-form invariants, repairing in place
    ///
    /// Unmatched tool results are dropped with a warning; assistant turns
    /// that mixed text with tool calls lose the text.
    pub fn enforce_invariants(&mut self) {
        let mut seen_call_ids: Vec<String> = Vec::new();

        self.messages.retain_mut(|msg| {
            if msg.has_tool_calls() {
                if !msg.content.is_empty() {
                    msg.content = Content::Text(String::new());
                }
                if let Some(calls) = &msg.tool_calls {
                    seen_call_ids.extend(calls.iter().map(|c| c.id.clone()));
                }
                return true;
            }

            if msg.role == Role::Tool {
                let paired = msg
                    .tool_call_id
                    .as_ref()
                    .is_some_and(|id| seen_call_ids.iter().any(|seen| seen == id));
                if !paired {
                    tracing::warn!(
                        call_id = msg.tool_call_id.as_deref().unwrap_or("<missing>"),
                        "dropping tool result with no matching tool call"
                    );
                }
                return paired;
            }

            true
        });
    }

    /// Concatenated user-authored text, for classification
    pub fn user_text_concat(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Whether any turn carries an image part
    pub fn has_image_parts(&self) -> bool {
        self.messages.iter().any(|m| m.content.has_image())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::message::{ContentPart, FunctionCall, ToolCall};

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_owned(),
            function: FunctionCall {
                name: "shell".to_owned(),
                arguments: "{}".to_owned(),
            },
        }
    }

    #[test]
    fn unmatched_tool_result_is_dropped() {
        let mut req = CanonicalRequest::user_text("m", "hi");
        req.messages.push(Message::tool_result("call_ghost", "output"));
        req.enforce_invariants();
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn paired_tool_result_survives() {
        let mut req = CanonicalRequest::user_text("m", "hi");
        req.messages.push(Message::assistant_tool_calls(vec![call("call_1")]));
        req.messages.push(Message::tool_result("call_1", "output"));
        req.enforce_invariants();
        assert_eq!(req.messages.len(), 3);
    }

    #[test]
    fn result_before_its_call_is_dropped() {
        let mut req = CanonicalRequest::user_text("m", "hi");
        req.messages.push(Message::tool_result("call_1", "output"));
        req.messages.push(Message::assistant_tool_calls(vec![call("call_1")]));
        req.enforce_invariants();
        assert!(req.messages.iter().all(|m| m.role != Role::Tool));
    }

    #[test]
    fn mixed_assistant_turn_loses_text() {
        let mut msg = Message::assistant("let me check");
        msg.tool_calls = Some(vec![call("call_1")]);

        let mut req = CanonicalRequest::user_text("m", "hi");
        req.messages.push(msg);
        req.enforce_invariants();

        assert!(req.messages[1].content.is_empty());
        assert!(req.messages[1].has_tool_calls());
    }

    #[test]
    fn user_text_concat_skips_images() {
        let mut req = CanonicalRequest::user_text("m", "first");
        req.messages.push(Message {
            role: Role::User,
            content: Content::Parts(vec![
                ContentPart::Text { text: "second".to_owned() },
                ContentPart::Image {
                    url: "data:image/png;base64,xxxx".to_owned(),
                    detail: None,
                },
            ]),
            tool_calls: None,
            tool_call_id: None,
        });
        assert_eq!(req.user_text_concat(), "first\nsecond");
        assert!(req.has_image_parts());
    }
}
