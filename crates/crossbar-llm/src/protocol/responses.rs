//! Responses wire format types
//!
//! The stateful, streaming-first protocol: requests carry `instructions`
//! plus a flattened `input` item list; server-tool pauses surface as
//! `required_action` and resume through `submit_tool_outputs`.

use serde::{Deserialize, Serialize};

// -- Request types --

/// Responses request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    /// Model identifier
    pub model: String,
    /// Instructions text (system prompt)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Input: string shorthand or typed item list
    pub input: ResponsesInput,
    /// Tool definitions; accepts flat and `function`-nested shapes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ResponsesTool>>,
    /// Tool choice: a mode string or a selector object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,
    /// Whether to stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Opaque extended-thinking payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<serde_json::Value>,
}

/// Request input: string shorthand or item list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesInput {
    /// Single user message shorthand
    Text(String),
    /// Typed items, including reconstructed prior turns
    Items(Vec<ResponsesInputItem>),
}

/// One item of a responses `input` array
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesInputItem {
    /// Conversation message
    Message {
        /// Role ("user", "assistant", "system")
        role: String,
        /// Content: string or typed parts
        content: ResponsesMessageContent,
    },
    /// Prior assistant tool call embedded in the transcript
    FunctionCall {
        /// Call identifier
        call_id: String,
        /// Function name
        name: String,
        /// JSON-encoded arguments
        arguments: String,
    },
    /// Tool output answering a prior call
    FunctionCallOutput {
        /// Call identifier being answered
        call_id: String,
        /// Tool output payload
        output: String,
    },
}

/// Message content within an input item
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesMessageContent {
    /// Plain text shorthand
    Text(String),
    /// Typed parts
    Parts(Vec<ResponsesContentPart>),
}

/// Typed content part
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesContentPart {
    /// User-authored text
    InputText {
        /// The text string
        text: String,
    },
    /// User-supplied image
    InputImage {
        /// Image URL or data URI
        image_url: String,
    },
    /// Assistant-authored text (prior turns)
    OutputText {
        /// The text string
        text: String,
    },
}

/// Tool definition; both the flat responses shape and the chat-style
/// `function` nesting arrive in the wild
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesTool {
    /// Tool type, normally "function"
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub tool_type: Option<String>,
    /// Flat name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Flat description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Flat parameters schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    /// Chat-style nested function wrapper
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<super::chat::ChatFunction>,
}

/// Body of `POST /v1/responses/{id}/submit_tool_outputs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitToolOutputsRequest {
    /// Outputs answering the pending tool calls
    pub tool_outputs: Vec<SubmittedToolOutput>,
    /// Whether to stream the resumed response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

/// One submitted tool output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedToolOutput {
    /// Call the output answers
    pub tool_call_id: String,
    /// Output payload
    pub output: String,
}

// -- Response types --

/// Responses response document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesResponse {
    /// Response identifier
    pub id: String,
    /// Object type (always "response")
    pub object: String,
    /// Creation timestamp, epoch seconds
    pub created_at: u64,
    /// Lifecycle status
    pub status: ResponsesStatus,
    /// Model used
    pub model: String,
    /// Output items
    #[serde(default)]
    pub output: Vec<ResponsesOutputItem>,
    /// Aggregated output text convenience field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_text: Option<String>,
    /// Pending server-tool action, present when status is
    /// `requires_action`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_action: Option<ResponsesRequiredAction>,
    /// Token usage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponsesUsage>,
}

/// Response lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsesStatus {
    /// Still generating (streaming `response.created` frames)
    InProgress,
    /// Generation finished normally
    Completed,
    /// Waiting on submitted tool outputs
    RequiresAction,
    /// Truncated (length or filter)
    Incomplete,
    /// Upstream failure
    Failed,
}

/// One output item
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesOutputItem {
    /// Assistant message
    Message {
        /// Item identifier
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Role (always "assistant")
        role: String,
        /// Content blocks
        content: Vec<ResponsesOutputContent>,
    },
    /// Tool call the client (or gateway) should run
    FunctionCall {
        /// Item identifier
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Call identifier, pairing the eventual output
        call_id: String,
        /// Function name
        name: String,
        /// JSON-encoded arguments
        arguments: String,
    },
}

/// Output content block
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesOutputContent {
    /// Assistant text
    OutputText {
        /// The text string
        text: String,
    },
}

/// Server-tool pause payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequiredAction {
    /// Action type (always "submit_tool_outputs")
    #[serde(rename = "type")]
    pub action_type: String,
    /// The pending tool calls
    pub submit_tool_outputs: ResponsesPendingToolCalls,
}

/// Tool calls awaiting outputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesPendingToolCalls {
    /// Calls the client must answer
    pub tool_calls: Vec<ResponsesPendingToolCall>,
}

/// One pending tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesPendingToolCall {
    /// Call identifier to echo back as `tool_call_id`
    pub id: String,
    /// Function name
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
}

/// Token usage
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResponsesUsage {
    /// Input tokens
    pub input_tokens: u32,
    /// Output tokens
    pub output_tokens: u32,
    /// Total tokens
    pub total_tokens: u32,
}

// -- Streaming types --

/// Responses SSE events
///
/// The `type` discriminator inside the data payload mirrors the SSE
/// `event:` line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponsesStreamEvent {
    /// Stream opened
    #[serde(rename = "response.created")]
    Created {
        /// Partial response document
        response: ResponsesResponse,
    },
    /// Incremental assistant text
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        /// Text fragment
        delta: String,
    },
    /// New output item (message or function call) opened
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        /// Index within the output array
        output_index: u32,
        /// The opened item
        item: ResponsesOutputItem,
    },
    /// Incremental function-call arguments
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        /// Index of the function-call item
        #[serde(default)]
        output_index: Option<u32>,
        /// Arguments fragment
        delta: String,
    },
    /// Function-call arguments complete
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        /// Index of the function-call item
        #[serde(default)]
        output_index: Option<u32>,
    },
    /// Server-tool pause; the stream ends after this
    #[serde(rename = "response.required_action")]
    RequiredAction {
        /// Response document with `required_action` populated
        response: ResponsesResponse,
    },
    /// Generation finished
    #[serde(rename = "response.completed")]
    Completed {
        /// Final response document
        response: ResponsesResponse,
    },
    /// Terminal frame after `response.completed`
    #[serde(rename = "response.done")]
    Done,
    /// Upstream failure
    #[serde(rename = "response.failed")]
    Failed {
        /// Response document carrying the error, when available
        #[serde(default)]
        response: Option<serde_json::Value>,
    },
}

impl ResponsesStreamEvent {
    /// SSE `event:` name for this payload
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "response.created",
            Self::OutputTextDelta { .. } => "response.output_text.delta",
            Self::OutputItemAdded { .. } => "response.output_item.added",
            Self::FunctionCallArgumentsDelta { .. } => "response.function_call_arguments.delta",
            Self::FunctionCallArgumentsDone { .. } => "response.function_call_arguments.done",
            Self::RequiredAction { .. } => "response.required_action",
            Self::Completed { .. } => "response.completed",
            Self::Done => "response.done",
            Self::Failed { .. } => "response.failed",
        }
    }
}
