//! Canonical, protocol-agnostic request/response model
//!
//! All three wire protocols canonicalize into these types; routing,
//! logging, and reverse translation only ever see this form.

pub mod message;
pub mod request;
pub mod response;
pub mod stream;
pub mod tool;

pub use message::{Content, ContentPart, FunctionCall, Message, Role, ToolCall};
pub use request::{CanonicalRequest, GenerationParams};
pub use response::{AssistantOutput, CanonicalResponse, FinishReason, Usage};
pub use stream::{SseFrame, StreamEvent};
pub use tool::{AliasMap, ToolChoice, ToolChoiceMode, ToolDefinition};
