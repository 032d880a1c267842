//! Conversion between the canonical form and the anthropic messages
//! wire format

use crate::protocol::anthropic::{
    AnthropicContent, AnthropicContentBlock, AnthropicImageSource, AnthropicMessage, AnthropicMessageDelta,
    AnthropicRequest, AnthropicResponse, AnthropicResponseBlock, AnthropicStreamBlock, AnthropicStreamDelta,
    AnthropicStreamEvent, AnthropicStreamMessage, AnthropicTool, AnthropicToolChoice, AnthropicUsage,
};
use crate::toolset::{self, RawTool};
use crate::types::{
    AliasMap, AssistantOutput, CanonicalRequest, CanonicalResponse, Content, ContentPart, FinishReason, FunctionCall,
    GenerationParams, Message, Role, SseFrame, StreamEvent, ToolCall, ToolChoice, ToolChoiceMode, Usage,
};

/// Max-tokens default applied when converting toward a protocol that
/// requires the field
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

// -- Inbound: anthropic wire format -> canonical --

/// Canonicalize an anthropic messages request
pub fn canonicalize_request(req: AnthropicRequest) -> CanonicalRequest {
    let mut messages = Vec::with_capacity(req.messages.len());
    for msg in req.messages {
        flatten_message(msg, &mut messages);
    }

    let raw_tools = req
        .tools
        .unwrap_or_default()
        .into_iter()
        .map(|t| RawTool {
            name: Some(t.name),
            description: t.description,
            parameters: Some(t.input_schema),
        })
        .collect();
    let (tools, tool_aliases) = toolset::normalize_tools(raw_tools);

    let mut canonical = CanonicalRequest {
        model: req.model,
        instructions: req.system,
        messages,
        tools,
        tool_choice: req.tool_choice.as_ref().map(parse_tool_choice),
        stream: req.stream.unwrap_or(false),
        params: GenerationParams {
            temperature: req.temperature,
            top_p: req.top_p,
            max_tokens: Some(req.max_tokens),
            stop: req.stop_sequences,
        },
        extended_thinking: req.thinking,
        tool_aliases,
    };
    canonical.enforce_invariants();
    canonical
}

/// Flatten one anthropic message into canonical turns
///
/// A user message mixing tool results with other blocks becomes one
/// tool turn per result plus a single user turn for the rest; an
/// assistant message folds its tool-use blocks into `tool_calls`.
fn flatten_message(msg: AnthropicMessage, out: &mut Vec<Message>) {
    let is_assistant = msg.role == "assistant";

    let blocks = match msg.content {
        AnthropicContent::Text(text) => {
            out.push(if is_assistant {
                Message::assistant(text)
            } else {
                Message::user(text)
            });
            return;
        }
        AnthropicContent::Blocks(blocks) => blocks,
    };

    let mut parts: Vec<ContentPart> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in blocks {
        match block {
            AnthropicContentBlock::Text { text } => parts.push(ContentPart::Text { text }),
            AnthropicContentBlock::Image { source } => parts.push(ContentPart::Image {
                url: image_source_to_url(source),
                detail: None,
            }),
            AnthropicContentBlock::ToolUse { id, name, input } => {
                let arguments = serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_owned());
                tool_calls.push(ToolCall {
                    id,
                    function: FunctionCall { name, arguments },
                });
            }
            AnthropicContentBlock::ToolResult {
                tool_use_id, content, ..
            } => out.push(Message::tool_result(tool_use_id, content.unwrap_or_default())),
        }
    }

    if !tool_calls.is_empty() {
        out.push(Message::assistant_tool_calls(tool_calls));
        return;
    }
    if parts.is_empty() {
        return;
    }

    let content = if parts.len() == 1
        && let Some(ContentPart::Text { text }) = parts.first()
    {
        Content::Text(text.clone())
    } else {
        Content::Parts(parts)
    };

    out.push(Message {
        role: if is_assistant { Role::Assistant } else { Role::User },
        content,
        tool_calls: None,
        tool_call_id: None,
    });
}

fn image_source_to_url(source: AnthropicImageSource) -> String {
    if source.source_type == "base64" {
        let mime = source.media_type.unwrap_or_else(|| "image/png".to_owned());
        format!("data:{mime};base64,{}", source.data)
    } else {
        source.data
    }
}

fn parse_tool_choice(tc: &AnthropicToolChoice) -> ToolChoice {
    match tc.choice_type.as_str() {
        "any" => ToolChoice::Mode(ToolChoiceMode::Required),
        "tool" => tc
            .name
            .clone()
            .map_or(ToolChoice::Mode(ToolChoiceMode::Auto), ToolChoice::Tool),
        _ => ToolChoice::Mode(ToolChoiceMode::Auto),
    }
}

// -- Outbound: canonical -> anthropic wire request --

/// Emit a canonical request in the anthropic wire shape
pub fn emit_request(req: &CanonicalRequest) -> AnthropicRequest {
    let messages = req.messages.iter().map(canonical_message_to_anthropic).collect();

    let tools = (!req.tools.is_empty()).then(|| {
        req.tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    });

    AnthropicRequest {
        model: req.model.clone(),
        max_tokens: req.params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system: req.instructions.clone(),
        messages,
        temperature: req.params.temperature,
        top_p: req.params.top_p,
        stop_sequences: req.params.stop.clone(),
        stream: req.stream.then_some(true),
        tools,
        tool_choice: req.tool_choice.as_ref().map(tool_choice_to_anthropic),
        thinking: req.extended_thinking.clone(),
    }
}

fn canonical_message_to_anthropic(msg: &Message) -> AnthropicMessage {
    // Tool results travel as user-role tool_result blocks
    if msg.role == Role::Tool {
        return AnthropicMessage {
            role: "user".to_owned(),
            content: AnthropicContent::Blocks(vec![AnthropicContentBlock::ToolResult {
                tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                content: Some(msg.content.as_text()),
                is_error: None,
            }]),
        };
    }

    let role = if msg.role == Role::Assistant { "assistant" } else { "user" };

    if let Some(tool_calls) = &msg.tool_calls {
        let mut blocks: Vec<AnthropicContentBlock> = Vec::new();
        let text = msg.content.as_text();
        if !text.is_empty() {
            blocks.push(AnthropicContentBlock::Text { text });
        }
        for tc in tool_calls {
            // Unparseable arguments degrade to an empty object rather
            // than poisoning the whole request
            let input = serde_json::from_str(&tc.function.arguments).unwrap_or_else(|_| serde_json::json!({}));
            blocks.push(AnthropicContentBlock::ToolUse {
                id: tc.id.clone(),
                name: tc.function.name.clone(),
                input,
            });
        }
        return AnthropicMessage {
            role: role.to_owned(),
            content: AnthropicContent::Blocks(blocks),
        };
    }

    let content = match &msg.content {
        Content::Text(text) => AnthropicContent::Text(text.clone()),
        Content::Parts(parts) => AnthropicContent::Blocks(parts.iter().map(part_to_block).collect()),
    };

    AnthropicMessage {
        role: role.to_owned(),
        content,
    }
}

fn part_to_block(part: &ContentPart) -> AnthropicContentBlock {
    match part {
        ContentPart::Text { text } => AnthropicContentBlock::Text { text: text.clone() },
        ContentPart::Image { url, .. } => {
            let source = url.strip_prefix("data:").map_or_else(
                || AnthropicImageSource {
                    source_type: "url".to_owned(),
                    media_type: None,
                    data: url.clone(),
                },
                |rest| {
                    let (mime_part, data) = rest.split_once(',').unwrap_or(("", rest));
                    AnthropicImageSource {
                        source_type: "base64".to_owned(),
                        media_type: Some(mime_part.strip_suffix(";base64").unwrap_or(mime_part).to_owned()),
                        data: data.to_owned(),
                    }
                },
            );
            AnthropicContentBlock::Image { source }
        }
    }
}

fn tool_choice_to_anthropic(choice: &ToolChoice) -> AnthropicToolChoice {
    match choice {
        ToolChoice::Mode(mode) => AnthropicToolChoice {
            // This protocol has no "none"; both None and Auto map to auto
            choice_type: match mode {
                ToolChoiceMode::Required => "any",
                ToolChoiceMode::None | ToolChoiceMode::Auto => "auto",
            }
            .to_owned(),
            name: None,
        },
        ToolChoice::Tool(name) => AnthropicToolChoice {
            choice_type: "tool".to_owned(),
            name: Some(name.clone()),
        },
    }
}

// -- Response canonicalization --

/// Canonicalize an anthropic response
pub fn canonicalize_response(resp: AnthropicResponse) -> CanonicalResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in &resp.content {
        match block {
            AnthropicResponseBlock::Text { text: t } => text.push_str(t),
            AnthropicResponseBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall {
                    id: id.clone(),
                    function: FunctionCall {
                        name: name.clone(),
                        arguments: serde_json::to_string(input).unwrap_or_else(|_| "{}".to_owned()),
                    },
                });
            }
        }
    }

    CanonicalResponse {
        id: resp.id,
        model: resp.model,
        created: super::now_epoch_secs(),
        output: AssistantOutput {
            content: (!text.is_empty() || tool_calls.is_empty()).then_some(text),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        },
        finish_reason: resp.stop_reason.as_deref().and_then(parse_stop_reason),
        usage: Some(Usage {
            prompt_tokens: resp.usage.input_tokens,
            completion_tokens: resp.usage.output_tokens,
            total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
        }),
    }
}

/// Emit a canonical response in the anthropic wire shape
pub fn emit_response(resp: &CanonicalResponse, aliases: &AliasMap) -> AnthropicResponse {
    let mut content = Vec::new();

    if let Some(text) = &resp.output.content
        && !text.is_empty()
    {
        content.push(AnthropicResponseBlock::Text { text: text.clone() });
    }
    for tc in resp.output.tool_calls.as_deref().unwrap_or_default() {
        let input = serde_json::from_str(&tc.function.arguments).unwrap_or_else(|_| serde_json::json!({}));
        content.push(AnthropicResponseBlock::ToolUse {
            id: tc.id.clone(),
            name: aliases.restore(&tc.function.name),
            input,
        });
    }

    let usage = resp.usage.unwrap_or_default();

    AnthropicResponse {
        id: resp.id.clone(),
        response_type: "message".to_owned(),
        role: "assistant".to_owned(),
        content,
        model: resp.model.clone(),
        stop_reason: resp.finish_reason.map(|fr| stop_reason_str(fr).to_owned()),
        stop_sequence: None,
        usage: AnthropicUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
    }
}

/// Anthropic spelling of a canonical finish reason
pub const fn stop_reason_str(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "end_turn",
        FinishReason::ToolCalls => "tool_use",
        FinishReason::Length => "max_tokens",
        FinishReason::ContentFilter => "stop_sequence",
    }
}

/// Parse an anthropic stop-reason string
pub fn parse_stop_reason(s: &str) -> Option<FinishReason> {
    match s {
        "end_turn" | "stop" => Some(FinishReason::Stop),
        "max_tokens" => Some(FinishReason::Length),
        "tool_use" => Some(FinishReason::ToolCalls),
        "stop_sequence" => Some(FinishReason::ContentFilter),
        _ => None,
    }
}

// -- Inbound stream: anthropic events -> canonical events --

/// State tracker for converting an anthropic SSE stream
///
/// The wire's content-block index is shared across text and tool blocks,
/// so tool calls get their own sequential index; a tool block following
/// a text block must not create phantom tool entries downstream.
#[derive(Debug, Default)]
pub struct AnthropicStreamState {
    in_tool_block: bool,
    current_tool_index: u32,
    next_tool_index: u32,
}

impl AnthropicStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert one wire event into canonical events
    pub fn convert_event(&mut self, event: &AnthropicStreamEvent) -> Vec<StreamEvent> {
        match event {
            AnthropicStreamEvent::MessageStart { .. }
            | AnthropicStreamEvent::ContentBlockStop { .. }
            | AnthropicStreamEvent::Ping => Vec::new(),

            AnthropicStreamEvent::ContentBlockStart { content_block, .. } => match content_block {
                AnthropicStreamBlock::Text { .. } => {
                    self.in_tool_block = false;
                    Vec::new()
                }
                AnthropicStreamBlock::ToolUse { id, name, .. } => {
                    self.in_tool_block = true;
                    self.current_tool_index = self.next_tool_index;
                    self.next_tool_index += 1;
                    vec![StreamEvent::ToolCallStart {
                        index: self.current_tool_index,
                        id: id.clone(),
                        name: name.clone(),
                    }]
                }
            },

            AnthropicStreamEvent::ContentBlockDelta { delta, .. } => match delta {
                AnthropicStreamDelta::TextDelta { text } => vec![StreamEvent::TextDelta { text: text.clone() }],
                AnthropicStreamDelta::InputJsonDelta { partial_json } => {
                    if !self.in_tool_block {
                        tracing::warn!("input_json_delta outside a tool_use block, dropping");
                        return Vec::new();
                    }
                    vec![StreamEvent::ToolCallArgsDelta {
                        index: self.current_tool_index,
                        arguments: partial_json.clone(),
                    }]
                }
            },

            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                let mut events = Vec::new();
                if let Some(reason) = delta.stop_reason.as_deref().and_then(parse_stop_reason) {
                    events.push(StreamEvent::Finish { reason });
                }
                if let Some(usage) = usage {
                    events.push(StreamEvent::Usage(Usage {
                        prompt_tokens: usage.input_tokens,
                        completion_tokens: usage.output_tokens,
                        total_tokens: usage.input_tokens + usage.output_tokens,
                    }));
                }
                events
            }

            AnthropicStreamEvent::MessageStop => vec![StreamEvent::Done],
        }
    }
}

// -- Outbound stream: canonical events -> anthropic frames --

/// Open content block on the emission side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    None,
    Text { index: u32 },
    Tool { index: u32 },
}

/// Emits canonical stream events as anthropic SSE frames
///
/// Tracks the block structure the protocol demands: `message_start`
/// first, every delta inside an open `content_block`, `message_delta`
/// carrying the stop reason, `message_stop` last.
pub struct AnthropicStreamEmitter {
    response_id: String,
    model: String,
    aliases: AliasMap,
    started: bool,
    open: OpenBlock,
    next_block_index: u32,
}

impl AnthropicStreamEmitter {
    pub fn new(model: impl Into<String>, aliases: AliasMap) -> Self {
        Self {
            response_id: super::wire_id("msg_"),
            model: model.into(),
            aliases,
            started: false,
            open: OpenBlock::None,
            next_block_index: 0,
        }
    }

    /// Translate one canonical event into zero or more wire frames
    pub fn emit(&mut self, event: &StreamEvent) -> Vec<SseFrame> {
        let mut frames = Vec::new();

        if !self.started {
            self.started = true;
            frames.push(frame(&AnthropicStreamEvent::MessageStart {
                message: AnthropicStreamMessage {
                    id: self.response_id.clone(),
                    message_type: "message".to_owned(),
                    role: "assistant".to_owned(),
                    model: self.model.clone(),
                    usage: None,
                },
            }));
        }

        match event {
            StreamEvent::TextDelta { text } => {
                let index = self.ensure_text_block(&mut frames);
                frames.push(frame(&AnthropicStreamEvent::ContentBlockDelta {
                    index,
                    delta: AnthropicStreamDelta::TextDelta { text: text.clone() },
                }));
            }
            StreamEvent::ToolCallStart { id, name, .. } => {
                self.close_open_block(&mut frames);
                let index = self.next_block_index;
                self.next_block_index += 1;
                self.open = OpenBlock::Tool { index };
                frames.push(frame(&AnthropicStreamEvent::ContentBlockStart {
                    index,
                    content_block: AnthropicStreamBlock::ToolUse {
                        id: id.clone(),
                        name: self.aliases.restore(name),
                        input: serde_json::json!({}),
                    },
                }));
            }
            StreamEvent::ToolCallArgsDelta { arguments, .. } => {
                if let OpenBlock::Tool { index } = self.open {
                    frames.push(frame(&AnthropicStreamEvent::ContentBlockDelta {
                        index,
                        delta: AnthropicStreamDelta::InputJsonDelta {
                            partial_json: arguments.clone(),
                        },
                    }));
                }
            }
            StreamEvent::Finish { reason } => {
                self.close_open_block(&mut frames);
                frames.push(frame(&AnthropicStreamEvent::MessageDelta {
                    delta: AnthropicMessageDelta {
                        stop_reason: Some(stop_reason_str(*reason).to_owned()),
                        stop_sequence: None,
                    },
                    usage: None,
                }));
            }
            StreamEvent::Usage(usage) => {
                frames.push(frame(&AnthropicStreamEvent::MessageDelta {
                    delta: AnthropicMessageDelta {
                        stop_reason: None,
                        stop_sequence: None,
                    },
                    usage: Some(AnthropicUsage {
                        input_tokens: usage.prompt_tokens,
                        output_tokens: usage.completion_tokens,
                    }),
                }));
            }
            StreamEvent::Done => {
                self.close_open_block(&mut frames);
                frames.push(frame(&AnthropicStreamEvent::MessageStop));
            }
        }

        frames
    }

    fn ensure_text_block(&mut self, frames: &mut Vec<SseFrame>) -> u32 {
        if let OpenBlock::Text { index } = self.open {
            return index;
        }
        self.close_open_block(frames);
        let index = self.next_block_index;
        self.next_block_index += 1;
        self.open = OpenBlock::Text { index };
        frames.push(frame(&AnthropicStreamEvent::ContentBlockStart {
            index,
            content_block: AnthropicStreamBlock::Text { text: String::new() },
        }));
        index
    }

    fn close_open_block(&mut self, frames: &mut Vec<SseFrame>) {
        let index = match self.open {
            OpenBlock::None => return,
            OpenBlock::Text { index } | OpenBlock::Tool { index } => index,
        };
        frames.push(frame(&AnthropicStreamEvent::ContentBlockStop { index }));
        self.open = OpenBlock::None;
    }
}

fn frame(event: &AnthropicStreamEvent) -> SseFrame {
    SseFrame::event(event.event_name(), serde_json::to_string(event).unwrap_or_default())
}
