use serde::{Deserialize, Serialize};

/// Role of a message participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message
    User,
    /// Assistant response
    Assistant,
    /// Tool result paired with a prior assistant tool call
    Tool,
}

/// One prior turn in a canonical conversation
///
/// System/instructions text is not a message; it lives on
/// [`super::CanonicalRequest`] directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Author of the turn
    pub role: Role,
    /// Message content
    pub content: Content,
    /// Tool calls made by the assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// ID of the tool call this (tool-role) message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Plain user text turn
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Content::Text(text.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Plain assistant text turn
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::Text(text.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Assistant turn carrying tool calls; textual content stays empty
    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::Text(String::new()),
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    /// Tool result turn answering `call_id`
    pub fn tool_result(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Content::Text(output.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }

    /// Whether this is an assistant turn with at least one tool call
    pub fn has_tool_calls(&self) -> bool {
        self.role == Role::Assistant && self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }
}

/// Message content, plain text or typed parts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Plain text
    Text(String),
    /// Mixed typed parts (text, images)
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Extract the textual content, joining text parts
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// Whether any part is an image
    pub fn has_image(&self) -> bool {
        matches!(self, Self::Parts(parts) if parts.iter().any(|p| matches!(p, ContentPart::Image { .. })))
    }

    /// Whether the content is empty text
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Parts(parts) => parts.is_empty(),
        }
    }
}

/// Typed part of a multipart message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text block
    Text {
        /// The text string
        text: String,
    },
    /// Image reference: URL or `data:` URI
    Image {
        /// URL or base64 data URI
        url: String,
        /// Detail hint ("auto", "low", "high")
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

/// Tool call requested by the assistant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call identifier, pairing the eventual result
    pub id: String,
    /// Called function
    pub function: FunctionCall,
}

/// Function name and JSON-encoded arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name (normalized, see the tool-schema normalizer)
    pub name: String,
    /// Arguments as a JSON string; kept as raw bytes until a consumer
    /// needs structure
    pub arguments: String,
}
