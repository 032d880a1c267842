//! Conversion between the canonical form and the chat-completions wire
//! format

use crate::protocol::chat::{
    ChatChoice, ChatChoiceMessage, ChatContent, ChatContentPart, ChatFunction, ChatFunctionCall, ChatImageUrl,
    ChatMessage, ChatRequest, ChatResponse, ChatStreamChoice, ChatStreamChunk, ChatStreamDelta, ChatStreamFunction,
    ChatStreamToolCall, ChatTool, ChatToolCall, ChatUsage,
};
use crate::toolset::{self, RawTool};
use crate::types::{
    AliasMap, AssistantOutput, CanonicalRequest, CanonicalResponse, Content, ContentPart, FinishReason, FunctionCall,
    GenerationParams, Message, Role, SseFrame, StreamEvent, ToolCall, ToolChoice, ToolChoiceMode, Usage,
};

// -- Inbound: chat wire format -> canonical --

/// Canonicalize a chat-completions request
pub fn canonicalize_request(req: ChatRequest) -> CanonicalRequest {
    let mut instructions: Option<String> = None;
    let mut messages = Vec::with_capacity(req.messages.len());

    for msg in req.messages {
        match msg.role.as_str() {
            // System text is hoisted out of the turn list; later system
            // messages append
            "system" | "developer" => {
                let text = msg.content.as_ref().map(chat_content_text).unwrap_or_default();
                match &mut instructions {
                    Some(existing) => {
                        existing.push('\n');
                        existing.push_str(&text);
                    }
                    None => instructions = Some(text),
                }
            }
            _ => messages.push(chat_message_to_canonical(msg)),
        }
    }

    let raw_tools = req
        .tools
        .unwrap_or_default()
        .into_iter()
        .map(|t| RawTool {
            name: Some(t.function.name),
            description: t.function.description,
            parameters: t.function.parameters,
        })
        .collect();
    let (tools, tool_aliases) = toolset::normalize_tools(raw_tools);

    let mut canonical = CanonicalRequest {
        model: req.model,
        instructions,
        messages,
        tools,
        tool_choice: req.tool_choice.as_ref().and_then(parse_tool_choice_value),
        stream: req.stream.unwrap_or(false),
        params: GenerationParams {
            temperature: req.temperature,
            top_p: req.top_p,
            max_tokens: req.max_tokens,
            stop: req.stop,
        },
        extended_thinking: req.thinking,
        tool_aliases,
    };
    canonical.enforce_invariants();
    canonical
}

fn chat_message_to_canonical(msg: ChatMessage) -> Message {
    let role = match msg.role.as_str() {
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    };

    let content = match msg.content {
        Some(ChatContent::Text(text)) => Content::Text(text),
        Some(ChatContent::Parts(parts)) => Content::Parts(
            parts
                .into_iter()
                .map(|p| match p {
                    ChatContentPart::Text { text } => ContentPart::Text { text },
                    ChatContentPart::ImageUrl { image_url } => ContentPart::Image {
                        url: image_url.url,
                        detail: image_url.detail,
                    },
                })
                .collect(),
        ),
        None => Content::Text(String::new()),
    };

    let tool_calls = msg.tool_calls.map(|calls| {
        calls
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                function: FunctionCall {
                    name: tc.function.name,
                    arguments: tc.function.arguments,
                },
            })
            .collect()
    });

    Message {
        role,
        content,
        tool_calls,
        tool_call_id: msg.tool_call_id,
    }
}

/// Parse the flexible `tool_choice` field (shared with the responses
/// codec, which uses the same encoding)
pub(crate) fn parse_tool_choice_value(value: &serde_json::Value) -> Option<ToolChoice> {
    match value {
        serde_json::Value::String(s) => match s.as_str() {
            "none" => Some(ToolChoice::Mode(ToolChoiceMode::None)),
            "auto" => Some(ToolChoice::Mode(ToolChoiceMode::Auto)),
            "required" => Some(ToolChoice::Mode(ToolChoiceMode::Required)),
            _ => None,
        },
        serde_json::Value::Object(_) => value
            .pointer("/function/name")
            .and_then(|n| n.as_str())
            .map(|name| ToolChoice::Tool(name.to_owned())),
        _ => None,
    }
}

// -- Outbound: canonical -> chat wire request --

/// Emit a canonical request in the chat wire shape, for chat-protocol
/// upstreams
pub fn emit_request(req: &CanonicalRequest) -> ChatRequest {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    if let Some(instructions) = &req.instructions {
        messages.push(ChatMessage {
            role: "system".to_owned(),
            content: Some(ChatContent::Text(instructions.clone())),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    for msg in &req.messages {
        messages.push(canonical_message_to_chat(msg));
    }

    let tools = (!req.tools.is_empty()).then(|| {
        req.tools
            .iter()
            .map(|t| ChatTool {
                tool_type: "function".to_owned(),
                function: ChatFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: Some(t.parameters.clone()),
                },
            })
            .collect()
    });

    ChatRequest {
        model: req.model.clone(),
        messages,
        temperature: req.params.temperature,
        top_p: req.params.top_p,
        max_tokens: req.params.max_tokens,
        stop: req.params.stop.clone(),
        stream: req.stream.then_some(true),
        tools,
        tool_choice: req.tool_choice.as_ref().map(tool_choice_to_wire_value),
        thinking: req.extended_thinking.clone(),
    }
}

fn canonical_message_to_chat(msg: &Message) -> ChatMessage {
    let role = match msg.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let content = match &msg.content {
        Content::Text(text) if text.is_empty() && msg.has_tool_calls() => None,
        Content::Text(text) => Some(ChatContent::Text(text.clone())),
        Content::Parts(parts) => Some(ChatContent::Parts(
            parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => ChatContentPart::Text { text: text.clone() },
                    ContentPart::Image { url, detail } => ChatContentPart::ImageUrl {
                        image_url: ChatImageUrl {
                            url: url.clone(),
                            detail: detail.clone(),
                        },
                    },
                })
                .collect(),
        )),
    };

    ChatMessage {
        role: role.to_owned(),
        content,
        tool_calls: msg.tool_calls.as_ref().map(|calls| calls.iter().map(tool_call_to_chat).collect()),
        tool_call_id: msg.tool_call_id.clone(),
    }
}

fn tool_call_to_chat(tc: &ToolCall) -> ChatToolCall {
    ChatToolCall {
        id: tc.id.clone(),
        tool_type: "function".to_owned(),
        function: ChatFunctionCall {
            name: tc.function.name.clone(),
            arguments: tc.function.arguments.clone(),
        },
    }
}

pub(crate) fn tool_choice_to_wire_value(choice: &ToolChoice) -> serde_json::Value {
    match choice {
        ToolChoice::Mode(mode) => {
            let s = match mode {
                ToolChoiceMode::None => "none",
                ToolChoiceMode::Auto => "auto",
                ToolChoiceMode::Required => "required",
            };
            serde_json::Value::String(s.to_owned())
        }
        ToolChoice::Tool(name) => serde_json::json!({
            "type": "function",
            "function": {"name": name}
        }),
    }
}

// -- Response canonicalization --

/// Canonicalize a chat-completions response (first choice)
pub fn canonicalize_response(resp: ChatResponse) -> CanonicalResponse {
    let choice = resp.choices.into_iter().next();

    let (output, finish_reason) = choice.map_or_else(
        || (AssistantOutput::default(), None),
        |c| {
            let tool_calls = c.message.tool_calls.map(|calls| {
                calls
                    .into_iter()
                    .map(|tc| ToolCall {
                        id: tc.id,
                        function: FunctionCall {
                            name: tc.function.name,
                            arguments: tc.function.arguments,
                        },
                    })
                    .collect()
            });
            (
                AssistantOutput {
                    content: c.message.content,
                    tool_calls,
                },
                c.finish_reason.as_deref().and_then(parse_finish_reason),
            )
        },
    );

    CanonicalResponse {
        id: resp.id,
        model: resp.model,
        created: resp.created,
        output,
        finish_reason,
        usage: resp.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    }
}

/// Emit a canonical response in the chat wire shape
///
/// Tool names renamed during normalization are restored from the alias
/// map before they reach the client.
pub fn emit_response(resp: &CanonicalResponse, aliases: &AliasMap) -> ChatResponse {
    let tool_calls = resp.output.tool_calls.as_ref().map(|calls| {
        calls
            .iter()
            .map(|tc| ChatToolCall {
                id: tc.id.clone(),
                tool_type: "function".to_owned(),
                function: ChatFunctionCall {
                    name: aliases.restore(&tc.function.name),
                    arguments: tc.function.arguments.clone(),
                },
            })
            .collect()
    });

    ChatResponse {
        id: resp.id.clone(),
        object: "chat.completion".to_owned(),
        created: resp.created,
        model: resp.model.clone(),
        choices: vec![ChatChoice {
            index: 0,
            message: ChatChoiceMessage {
                role: "assistant".to_owned(),
                content: resp.output.content.clone(),
                tool_calls,
            },
            finish_reason: resp.finish_reason.map(|fr| finish_reason_str(fr).to_owned()),
        }],
        usage: resp.usage.map(|u| ChatUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    }
}

/// Chat spelling of a canonical finish reason
pub const fn finish_reason_str(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::Length => "length",
        FinishReason::ContentFilter => "content_filter",
    }
}

/// Parse a chat finish-reason string (anthropic spellings tolerated for
/// lenient upstreams)
pub fn parse_finish_reason(s: &str) -> Option<FinishReason> {
    match s {
        "stop" | "end_turn" => Some(FinishReason::Stop),
        "length" | "max_tokens" => Some(FinishReason::Length),
        "tool_calls" | "tool_use" => Some(FinishReason::ToolCalls),
        "content_filter" => Some(FinishReason::ContentFilter),
        _ => None,
    }
}

// -- Inbound stream: chat chunks -> canonical events --

/// State tracker for converting a chat-completions SSE stream
///
/// Chat chunks interleave tool-call ids, names, and argument fragments;
/// the tracker turns the first sighting of each wire index into a
/// `ToolCallStart` and everything after into argument deltas.
#[derive(Debug, Default)]
pub struct ChatStreamState {
    started_tool_indexes: Vec<u32>,
    /// (wire index, pending id) for calls whose name has not arrived yet
    pending_ids: Vec<(u32, String)>,
}

impl ChatStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert one parsed chunk into canonical events
    pub fn convert_chunk(&mut self, chunk: &ChatStreamChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        for choice in &chunk.choices {
            if let Some(content) = &choice.delta.content
                && !content.is_empty()
            {
                events.push(StreamEvent::TextDelta { text: content.clone() });
            }

            for tc in choice.delta.tool_calls.as_deref().unwrap_or_default() {
                self.convert_tool_call(tc, &mut events);
            }

            if let Some(reason) = choice.finish_reason.as_deref().and_then(parse_finish_reason) {
                events.push(StreamEvent::Finish { reason });
            }
        }

        if let Some(usage) = &chunk.usage {
            events.push(StreamEvent::Usage(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            }));
        }

        events
    }

    fn convert_tool_call(&mut self, tc: &ChatStreamToolCall, events: &mut Vec<StreamEvent>) {
        let already_started = self.started_tool_indexes.contains(&tc.index);

        if !already_started {
            if let Some(id) = &tc.id {
                self.pending_ids.retain(|(i, _)| *i != tc.index);
                self.pending_ids.push((tc.index, id.clone()));
            }

            // The start event needs both id and name; emit once both are in
            if let Some(name) = tc.function.as_ref().and_then(|f| f.name.clone()) {
                let id = self
                    .pending_ids
                    .iter()
                    .find(|(i, _)| *i == tc.index)
                    .map_or_else(|| format!("call_{}", tc.index), |(_, id)| id.clone());
                self.started_tool_indexes.push(tc.index);
                events.push(StreamEvent::ToolCallStart {
                    index: tc.index,
                    id,
                    name,
                });
            }
        }

        if let Some(arguments) = tc.function.as_ref().and_then(|f| f.arguments.clone())
            && !arguments.is_empty()
        {
            events.push(StreamEvent::ToolCallArgsDelta {
                index: tc.index,
                arguments,
            });
        }
    }
}

// -- Outbound stream: canonical events -> chat frames --

/// Emits canonical stream events as chat-completions SSE frames
pub struct ChatStreamEmitter {
    id: String,
    model: String,
    created: u64,
    aliases: AliasMap,
    sent_role: bool,
}

impl ChatStreamEmitter {
    pub fn new(model: impl Into<String>, aliases: AliasMap) -> Self {
        Self {
            id: super::wire_id("chatcmpl-"),
            model: model.into(),
            created: super::now_epoch_secs(),
            aliases,
            sent_role: false,
        }
    }

    /// Translate one canonical event into zero or more wire frames
    pub fn emit(&mut self, event: &StreamEvent) -> Vec<SseFrame> {
        let mut frames = Vec::new();

        // The first content-bearing frame opens with the assistant role
        if !self.sent_role && !matches!(event, StreamEvent::Done | StreamEvent::Usage(_)) {
            self.sent_role = true;
            frames.push(self.chunk_frame(
                ChatStreamDelta {
                    role: Some("assistant".to_owned()),
                    ..ChatStreamDelta::default()
                },
                None,
            ));
        }

        match event {
            StreamEvent::TextDelta { text } => {
                frames.push(self.chunk_frame(
                    ChatStreamDelta {
                        content: Some(text.clone()),
                        ..ChatStreamDelta::default()
                    },
                    None,
                ));
            }
            StreamEvent::ToolCallStart { index, id, name } => {
                frames.push(self.chunk_frame(
                    ChatStreamDelta {
                        tool_calls: Some(vec![ChatStreamToolCall {
                            index: *index,
                            id: Some(id.clone()),
                            tool_type: Some("function".to_owned()),
                            function: Some(ChatStreamFunction {
                                name: Some(self.aliases.restore(name)),
                                arguments: None,
                            }),
                        }]),
                        ..ChatStreamDelta::default()
                    },
                    None,
                ));
            }
            StreamEvent::ToolCallArgsDelta { index, arguments } => {
                frames.push(self.chunk_frame(
                    ChatStreamDelta {
                        tool_calls: Some(vec![ChatStreamToolCall {
                            index: *index,
                            id: None,
                            tool_type: None,
                            function: Some(ChatStreamFunction {
                                name: None,
                                arguments: Some(arguments.clone()),
                            }),
                        }]),
                        ..ChatStreamDelta::default()
                    },
                    None,
                ));
            }
            StreamEvent::Finish { reason } => {
                frames.push(self.chunk_frame(ChatStreamDelta::default(), Some(finish_reason_str(*reason))));
            }
            StreamEvent::Usage(usage) => {
                let chunk = ChatStreamChunk {
                    id: self.id.clone(),
                    object: "chat.completion.chunk".to_owned(),
                    created: self.created,
                    model: self.model.clone(),
                    choices: vec![],
                    usage: Some(ChatUsage {
                        prompt_tokens: usage.prompt_tokens,
                        completion_tokens: usage.completion_tokens,
                        total_tokens: usage.total_tokens,
                    }),
                };
                frames.push(SseFrame::data(serde_json::to_string(&chunk).unwrap_or_default()));
            }
            StreamEvent::Done => {
                frames.push(SseFrame::data("[DONE]"));
            }
        }

        frames
    }

    fn chunk_frame(&self, delta: ChatStreamDelta, finish_reason: Option<&str>) -> SseFrame {
        let chunk = ChatStreamChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_owned(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatStreamChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(str::to_owned),
            }],
            usage: None,
        };
        SseFrame::data(serde_json::to_string(&chunk).unwrap_or_default())
    }
}

fn chat_content_text(content: &ChatContent) -> String {
    match content {
        ChatContent::Text(text) => text.clone(),
        ChatContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ChatContentPart::Text { text } => Some(text.as_str()),
                ChatContentPart::ImageUrl { .. } => None,
            })
            .collect::<Vec<_>>()
            .join(""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_request(json: serde_json::Value) -> ChatRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn system_message_becomes_instructions() {
        let req = chat_request(serde_json::json!({
            "model": "glm-4.6",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hello"}
            ]
        }));
        let canonical = canonicalize_request(req);
        assert_eq!(canonical.instructions.as_deref(), Some("be brief"));
        assert_eq!(canonical.messages.len(), 1);
        assert_eq!(canonical.messages[0].role, Role::User);
    }

    #[test]
    fn tool_messages_pair_with_calls() {
        let req = chat_request(serde_json::json!({
            "model": "glm-4.6",
            "messages": [
                {"role": "user", "content": "list files"},
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function",
                     "function": {"name": "shell", "arguments": "{\"command\":[\"ls\"]}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "README.md"}
            ]
        }));
        let canonical = canonicalize_request(req);
        assert_eq!(canonical.messages.len(), 3);
        assert!(canonical.messages[1].has_tool_calls());
        assert_eq!(canonical.messages[2].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn unmatched_tool_message_is_dropped() {
        let req = chat_request(serde_json::json!({
            "model": "glm-4.6",
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "tool", "tool_call_id": "call_ghost", "content": "orphan"}
            ]
        }));
        let canonical = canonicalize_request(req);
        assert_eq!(canonical.messages.len(), 1);
    }

    #[test]
    fn request_round_trip_preserves_semantics() {
        let req = chat_request(serde_json::json!({
            "model": "glm-4.6",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hello"}
            ],
            "temperature": 0.5,
            "max_tokens": 128,
            "stream": true,
            "tools": [{"type": "function", "function": {
                "name": "shell",
                "parameters": {"type": "object", "properties": {"command": {"type": "array"}}}
            }}],
            "tool_choice": "auto"
        }));

        let canonical = canonicalize_request(req);
        let out = emit_request(&canonical);

        assert_eq!(out.model, "glm-4.6");
        assert_eq!(out.messages[0].role, "system");
        assert_eq!(out.messages[1].role, "user");
        assert_eq!(out.temperature, Some(0.5));
        assert_eq!(out.max_tokens, Some(128));
        assert_eq!(out.stream, Some(true));
        assert_eq!(out.tools.as_ref().unwrap()[0].function.name, "shell");
        assert_eq!(out.tool_choice, Some(serde_json::Value::String("auto".to_owned())));
    }

    #[test]
    fn response_round_trip() {
        let wire: ChatResponse = serde_json::from_value(serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": "glm-4.6",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hi there"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
        }))
        .unwrap();

        let canonical = canonicalize_response(wire);
        assert_eq!(canonical.output.content.as_deref(), Some("hi there"));
        assert_eq!(canonical.finish_reason, Some(FinishReason::Stop));

        let out = emit_response(&canonical, &AliasMap::default());
        assert_eq!(out.choices[0].message.content.as_deref(), Some("hi there"));
        assert_eq!(out.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn emit_restores_tool_aliases() {
        let canonical = CanonicalResponse {
            id: "r1".to_owned(),
            model: "m".to_owned(),
            created: 0,
            output: AssistantOutput {
                content: None,
                tool_calls: Some(vec![ToolCall {
                    id: "call_1".to_owned(),
                    function: FunctionCall {
                        name: "my_tool".to_owned(),
                        arguments: "{}".to_owned(),
                    },
                }]),
            },
            finish_reason: Some(FinishReason::ToolCalls),
            usage: None,
        };

        let mut aliases = AliasMap::default();
        aliases.insert("my_tool", "my.tool");

        let out = emit_response(&canonical, &aliases);
        let calls = out.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "my.tool");
        assert_eq!(out.choices[0].finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn stream_state_orders_tool_events() {
        let mut state = ChatStreamState::new();

        let start: ChatStreamChunk = serde_json::from_value(serde_json::json!({
            "id": "c", "object": "chat.completion.chunk", "created": 0, "model": "m",
            "choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "type": "function",
                 "function": {"name": "shell"}}
            ]}, "finish_reason": null}]
        }))
        .unwrap();
        let events = state.convert_chunk(&start);
        assert_eq!(
            events,
            vec![StreamEvent::ToolCallStart {
                index: 0,
                id: "call_1".to_owned(),
                name: "shell".to_owned()
            }]
        );

        let args: ChatStreamChunk = serde_json::from_value(serde_json::json!({
            "id": "c", "object": "chat.completion.chunk", "created": 0, "model": "m",
            "choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "{\"command\""}}
            ]}, "finish_reason": null}]
        }))
        .unwrap();
        let events = state.convert_chunk(&args);
        assert_eq!(
            events,
            vec![StreamEvent::ToolCallArgsDelta {
                index: 0,
                arguments: "{\"command\"".to_owned()
            }]
        );

        let finish: ChatStreamChunk = serde_json::from_value(serde_json::json!({
            "id": "c", "object": "chat.completion.chunk", "created": 0, "model": "m",
            "choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]
        }))
        .unwrap();
        let events = state.convert_chunk(&finish);
        assert_eq!(
            events,
            vec![StreamEvent::Finish {
                reason: FinishReason::ToolCalls
            }]
        );
    }

    #[test]
    fn emitter_terminates_with_done() {
        let mut emitter = ChatStreamEmitter::new("m", AliasMap::default());

        let frames = emitter.emit(&StreamEvent::TextDelta { text: "hi".to_owned() });
        // role chunk + content chunk
        assert_eq!(frames.len(), 2);
        assert!(frames[0].data.contains("\"assistant\""));

        let frames = emitter.emit(&StreamEvent::Finish {
            reason: FinishReason::Stop,
        });
        assert!(frames[0].data.contains("\"finish_reason\":\"stop\""));

        let frames = emitter.emit(&StreamEvent::Done);
        assert_eq!(frames.last().unwrap().data, "[DONE]");
    }
}
