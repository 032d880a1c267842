//! Conversion between the canonical form and the responses wire format
//!
//! The responses protocol flattens the conversation into a typed `input`
//! item list and pauses on server tools via `required_action`; both
//! directions reconstruct full conversations from those items.

use crate::protocol::responses::{
    ResponsesContentPart, ResponsesInput, ResponsesInputItem, ResponsesMessageContent, ResponsesOutputContent,
    ResponsesOutputItem, ResponsesPendingToolCall, ResponsesPendingToolCalls, ResponsesRequest,
    ResponsesRequiredAction, ResponsesResponse, ResponsesStatus, ResponsesStreamEvent, ResponsesTool, ResponsesUsage,
};
use crate::toolset::{self, RawTool};
use crate::types::{
    AliasMap, AssistantOutput, CanonicalRequest, CanonicalResponse, Content, ContentPart, FinishReason, FunctionCall,
    GenerationParams, Message, Role, SseFrame, StreamEvent, ToolCall, Usage,
};

// -- Inbound: responses wire format -> canonical --

/// Canonicalize a responses request
pub fn canonicalize_request(req: ResponsesRequest) -> CanonicalRequest {
    let mut instructions = req.instructions;
    let mut messages = Vec::new();

    match req.input {
        ResponsesInput::Text(text) => messages.push(Message::user(text)),
        ResponsesInput::Items(items) => {
            let mut pending_calls: Vec<ToolCall> = Vec::new();

            for item in items {
                // Consecutive function_call items fold into one assistant turn
                if !matches!(item, ResponsesInputItem::FunctionCall { .. }) && !pending_calls.is_empty() {
                    messages.push(Message::assistant_tool_calls(std::mem::take(&mut pending_calls)));
                }

                match item {
                    ResponsesInputItem::Message { role, content } => match role.as_str() {
                        "system" | "developer" => {
                            let text = message_content_text(&content);
                            match &mut instructions {
                                Some(existing) => {
                                    existing.push('\n');
                                    existing.push_str(&text);
                                }
                                None => instructions = Some(text),
                            }
                        }
                        _ => messages.push(input_message_to_canonical(&role, content)),
                    },
                    ResponsesInputItem::FunctionCall {
                        call_id,
                        name,
                        arguments,
                    } => pending_calls.push(ToolCall {
                        id: call_id,
                        function: FunctionCall { name, arguments },
                    }),
                    ResponsesInputItem::FunctionCallOutput { call_id, output } => {
                        messages.push(Message::tool_result(call_id, output));
                    }
                }
            }

            if !pending_calls.is_empty() {
                messages.push(Message::assistant_tool_calls(pending_calls));
            }
        }
    }

    let raw_tools = req
        .tools
        .unwrap_or_default()
        .into_iter()
        .map(raw_tool_from_wire)
        .collect();
    let (tools, tool_aliases) = toolset::normalize_tools(raw_tools);

    let mut canonical = CanonicalRequest {
        model: req.model,
        instructions,
        messages,
        tools,
        tool_choice: req.tool_choice.as_ref().and_then(super::chat::parse_tool_choice_value),
        stream: req.stream.unwrap_or(false),
        params: GenerationParams {
            temperature: req.temperature,
            top_p: req.top_p,
            max_tokens: req.max_output_tokens,
            stop: None,
        },
        extended_thinking: req.reasoning,
        tool_aliases,
    };
    canonical.enforce_invariants();
    canonical
}

/// Accept both the flat responses tool shape and chat-style nesting
fn raw_tool_from_wire(tool: ResponsesTool) -> RawTool {
    tool.function.map_or(
        RawTool {
            name: tool.name,
            description: tool.description,
            parameters: tool.parameters,
        },
        |f| RawTool {
            name: Some(f.name),
            description: f.description,
            parameters: f.parameters,
        },
    )
}

fn input_message_to_canonical(role: &str, content: ResponsesMessageContent) -> Message {
    let canonical_role = if role == "assistant" { Role::Assistant } else { Role::User };

    let content = match content {
        ResponsesMessageContent::Text(text) => Content::Text(text),
        ResponsesMessageContent::Parts(parts) => {
            let mapped: Vec<ContentPart> = parts
                .into_iter()
                .map(|p| match p {
                    ResponsesContentPart::InputText { text } | ResponsesContentPart::OutputText { text } => {
                        ContentPart::Text { text }
                    }
                    ResponsesContentPart::InputImage { image_url } => ContentPart::Image {
                        url: image_url,
                        detail: None,
                    },
                })
                .collect();
            Content::Parts(mapped)
        }
    };

    Message {
        role: canonical_role,
        content,
        tool_calls: None,
        tool_call_id: None,
    }
}

fn message_content_text(content: &ResponsesMessageContent) -> String {
    match content {
        ResponsesMessageContent::Text(text) => text.clone(),
        ResponsesMessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ResponsesContentPart::InputText { text } | ResponsesContentPart::OutputText { text } => {
                    Some(text.as_str())
                }
                ResponsesContentPart::InputImage { .. } => None,
            })
            .collect::<Vec<_>>()
            .join(""),
    }
}

// -- Outbound: canonical -> responses wire request --

/// Emit a canonical request in the responses wire shape, for
/// responses-protocol upstreams
pub fn emit_request(req: &CanonicalRequest) -> ResponsesRequest {
    let mut items = Vec::with_capacity(req.messages.len());

    for msg in &req.messages {
        match (msg.role, &msg.tool_calls) {
            (Role::Assistant, Some(calls)) if !calls.is_empty() => {
                for tc in calls {
                    items.push(ResponsesInputItem::FunctionCall {
                        call_id: tc.id.clone(),
                        name: tc.function.name.clone(),
                        arguments: tc.function.arguments.clone(),
                    });
                }
            }
            (Role::Tool, _) => items.push(ResponsesInputItem::FunctionCallOutput {
                call_id: msg.tool_call_id.clone().unwrap_or_default(),
                output: msg.content.as_text(),
            }),
            (role, _) => {
                let wire_role = if role == Role::Assistant { "assistant" } else { "user" };
                items.push(ResponsesInputItem::Message {
                    role: wire_role.to_owned(),
                    content: ResponsesMessageContent::Parts(message_parts_to_wire(&msg.content, role)),
                });
            }
        }
    }

    let tools = (!req.tools.is_empty()).then(|| {
        req.tools
            .iter()
            .map(|t| ResponsesTool {
                tool_type: Some("function".to_owned()),
                name: Some(t.name.clone()),
                description: t.description.clone(),
                parameters: Some(t.parameters.clone()),
                function: None,
            })
            .collect()
    });

    ResponsesRequest {
        model: req.model.clone(),
        instructions: req.instructions.clone(),
        input: ResponsesInput::Items(items),
        tools,
        tool_choice: req.tool_choice.as_ref().map(super::chat::tool_choice_to_wire_value),
        stream: req.stream.then_some(true),
        max_output_tokens: req.params.max_tokens,
        temperature: req.params.temperature,
        top_p: req.params.top_p,
        reasoning: req.extended_thinking.clone(),
    }
}

fn message_parts_to_wire(content: &Content, role: Role) -> Vec<ResponsesContentPart> {
    let text_part = |text: String| {
        if role == Role::Assistant {
            ResponsesContentPart::OutputText { text }
        } else {
            ResponsesContentPart::InputText { text }
        }
    };

    match content {
        Content::Text(text) => vec![text_part(text.clone())],
        Content::Parts(parts) => parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => text_part(text.clone()),
                ContentPart::Image { url, .. } => ResponsesContentPart::InputImage { image_url: url.clone() },
            })
            .collect(),
    }
}

// -- Response canonicalization --

/// Canonicalize a responses response document
pub fn canonicalize_response(resp: ResponsesResponse) -> CanonicalResponse {
    let mut text = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for item in &resp.output {
        match item {
            ResponsesOutputItem::Message { content, .. } => {
                for block in content {
                    let ResponsesOutputContent::OutputText { text: t } = block;
                    text.push_str(t);
                }
            }
            ResponsesOutputItem::FunctionCall {
                call_id, name, arguments, ..
            } => tool_calls.push(ToolCall {
                id: call_id.clone(),
                function: FunctionCall {
                    name: name.clone(),
                    arguments: arguments.clone(),
                },
            }),
        }
    }

    // required_action may list calls the output array omitted
    if let Some(action) = &resp.required_action {
        for pending in &action.submit_tool_outputs.tool_calls {
            if tool_calls.iter().all(|tc| tc.id != pending.id) {
                tool_calls.push(ToolCall {
                    id: pending.id.clone(),
                    function: FunctionCall {
                        name: pending.name.clone(),
                        arguments: pending.arguments.clone(),
                    },
                });
            }
        }
    }

    if text.is_empty()
        && let Some(aggregated) = &resp.output_text
    {
        text = aggregated.clone();
    }

    let finish_reason = match resp.status {
        ResponsesStatus::Completed => Some(FinishReason::Stop),
        ResponsesStatus::RequiresAction => Some(FinishReason::ToolCalls),
        ResponsesStatus::Incomplete => Some(FinishReason::Length),
        ResponsesStatus::Failed | ResponsesStatus::InProgress => None,
    };

    CanonicalResponse {
        id: resp.id,
        model: resp.model,
        created: resp.created_at,
        output: AssistantOutput {
            content: (!text.is_empty() || tool_calls.is_empty()).then_some(text),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        },
        finish_reason,
        usage: resp.usage.map(|u| Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.total_tokens,
        }),
    }
}

/// Emit a canonical response as a responses document under `response_id`
///
/// Tool-call finishes become a `requires_action` document whose pending
/// calls carry alias-restored names.
pub fn emit_response(resp: &CanonicalResponse, aliases: &AliasMap, response_id: &str) -> ResponsesResponse {
    let mut output = Vec::new();

    if let Some(content) = &resp.output.content
        && !content.is_empty()
    {
        output.push(ResponsesOutputItem::Message {
            id: None,
            role: "assistant".to_owned(),
            content: vec![ResponsesOutputContent::OutputText { text: content.clone() }],
        });
    }

    let pending = pending_tool_calls(resp, aliases);
    for call in &pending {
        output.push(ResponsesOutputItem::FunctionCall {
            id: None,
            call_id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        });
    }

    let wants_tools = resp.wants_tools() && !pending.is_empty();
    let status = if wants_tools {
        ResponsesStatus::RequiresAction
    } else {
        match resp.finish_reason {
            Some(FinishReason::Length | FinishReason::ContentFilter) => ResponsesStatus::Incomplete,
            _ => ResponsesStatus::Completed,
        }
    };

    ResponsesResponse {
        id: response_id.to_owned(),
        object: "response".to_owned(),
        created_at: resp.created,
        status,
        model: resp.model.clone(),
        output,
        output_text: resp.output.content.clone().filter(|t| !t.is_empty()),
        required_action: wants_tools.then(|| ResponsesRequiredAction {
            action_type: "submit_tool_outputs".to_owned(),
            submit_tool_outputs: ResponsesPendingToolCalls { tool_calls: pending },
        }),
        usage: resp.usage.map(|u| ResponsesUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    }
}

/// Pending tool calls of a canonical response, names restored
pub fn pending_tool_calls(resp: &CanonicalResponse, aliases: &AliasMap) -> Vec<ResponsesPendingToolCall> {
    resp.output
        .tool_calls
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|tc| ResponsesPendingToolCall {
            id: tc.id.clone(),
            name: aliases.restore(&tc.function.name),
            arguments: tc.function.arguments.clone(),
        })
        .collect()
}

// -- Inbound stream: responses events -> canonical events --

/// State tracker for converting a responses SSE stream
///
/// Function-call items surface over several event kinds; the tracker
/// assigns each wire `output_index` a sequential tool index and
/// deduplicates calls that reappear in the final document.
#[derive(Debug, Default)]
pub struct ResponsesStreamState {
    /// wire output_index -> (tool index, call id)
    seen: Vec<(u32, u32, String)>,
    next_tool_index: u32,
    current_tool_index: Option<u32>,
}

impl ResponsesStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert one wire event into canonical events
    pub fn convert_event(&mut self, event: &ResponsesStreamEvent) -> Vec<StreamEvent> {
        match event {
            ResponsesStreamEvent::Created { .. }
            | ResponsesStreamEvent::FunctionCallArgumentsDone { .. }
            | ResponsesStreamEvent::Failed { .. } => Vec::new(),

            ResponsesStreamEvent::OutputTextDelta { delta } => {
                vec![StreamEvent::TextDelta { text: delta.clone() }]
            }

            ResponsesStreamEvent::OutputItemAdded { output_index, item } => {
                let ResponsesOutputItem::FunctionCall {
                    call_id, name, arguments, ..
                } = item
                else {
                    return Vec::new();
                };
                self.start_tool(*output_index, call_id, name, arguments)
            }

            ResponsesStreamEvent::FunctionCallArgumentsDelta { output_index, delta } => {
                let index = output_index
                    .and_then(|wire| self.seen.iter().find(|(w, ..)| *w == wire).map(|(_, idx, _)| *idx))
                    .or(self.current_tool_index);
                index.map_or_else(Vec::new, |index| {
                    vec![StreamEvent::ToolCallArgsDelta {
                        index,
                        arguments: delta.clone(),
                    }]
                })
            }

            ResponsesStreamEvent::RequiredAction { response } => {
                let mut events = self.emit_missing_calls(response);
                events.push(StreamEvent::Finish {
                    reason: FinishReason::ToolCalls,
                });
                events
            }

            ResponsesStreamEvent::Completed { response } => {
                let mut events = self.emit_missing_calls(response);
                if let Some(usage) = &response.usage {
                    events.push(StreamEvent::Usage(Usage {
                        prompt_tokens: usage.input_tokens,
                        completion_tokens: usage.output_tokens,
                        total_tokens: usage.total_tokens,
                    }));
                }
                let reason = if self.seen.is_empty() {
                    FinishReason::Stop
                } else {
                    FinishReason::ToolCalls
                };
                events.push(StreamEvent::Finish { reason });
                events
            }

            ResponsesStreamEvent::Done => vec![StreamEvent::Done],
        }
    }

    fn start_tool(&mut self, wire_index: u32, call_id: &str, name: &str, arguments: &str) -> Vec<StreamEvent> {
        if self.seen.iter().any(|(_, _, id)| id == call_id) {
            return Vec::new();
        }

        let index = self.next_tool_index;
        self.next_tool_index += 1;
        self.seen.push((wire_index, index, call_id.to_owned()));
        self.current_tool_index = Some(index);

        let mut events = vec![StreamEvent::ToolCallStart {
            index,
            id: call_id.to_owned(),
            name: name.to_owned(),
        }];
        if !arguments.is_empty() {
            events.push(StreamEvent::ToolCallArgsDelta {
                index,
                arguments: arguments.to_owned(),
            });
        }
        events
    }

    /// Final documents may carry calls that never got item events
    fn emit_missing_calls(&mut self, response: &ResponsesResponse) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for (wire_index, item) in response.output.iter().enumerate() {
            if let ResponsesOutputItem::FunctionCall {
                call_id, name, arguments, ..
            } = item
            {
                events.extend(self.start_tool(
                    u32::try_from(wire_index).unwrap_or(u32::MAX),
                    call_id,
                    name,
                    arguments,
                ));
            }
        }
        events
    }
}

// -- Outbound stream: canonical events -> responses frames --

/// Emits canonical stream events as responses SSE frames
///
/// Accumulates text and tool calls so the terminal `response.completed`
/// / `response.required_action` frames carry the full document.
pub struct ResponsesStreamEmitter {
    response_id: String,
    model: String,
    created: u64,
    aliases: AliasMap,
    sent_created: bool,
    text: String,
    tools: Vec<ResponsesPendingToolCall>,
    usage: Option<Usage>,
}

impl ResponsesStreamEmitter {
    pub fn new(model: impl Into<String>, aliases: AliasMap, response_id: impl Into<String>) -> Self {
        Self {
            response_id: response_id.into(),
            model: model.into(),
            created: super::now_epoch_secs(),
            aliases,
            sent_created: false,
            text: String::new(),
            tools: Vec::new(),
            usage: None,
        }
    }

    /// Translate one canonical event into zero or more wire frames
    pub fn emit(&mut self, event: &StreamEvent) -> Vec<SseFrame> {
        let mut frames = Vec::new();

        if !self.sent_created && !matches!(event, StreamEvent::Done) {
            self.sent_created = true;
            frames.push(frame(&ResponsesStreamEvent::Created {
                response: self.document(ResponsesStatus::InProgress, false),
            }));
        }

        match event {
            StreamEvent::TextDelta { text } => {
                self.text.push_str(text);
                frames.push(frame(&ResponsesStreamEvent::OutputTextDelta { delta: text.clone() }));
            }
            StreamEvent::ToolCallStart { index, id, name } => {
                let restored = self.aliases.restore(name);
                self.tools.push(ResponsesPendingToolCall {
                    id: id.clone(),
                    name: restored.clone(),
                    arguments: String::new(),
                });
                frames.push(frame(&ResponsesStreamEvent::OutputItemAdded {
                    output_index: *index,
                    item: ResponsesOutputItem::FunctionCall {
                        id: None,
                        call_id: id.clone(),
                        name: restored,
                        arguments: String::new(),
                    },
                }));
            }
            StreamEvent::ToolCallArgsDelta { index, arguments } => {
                if let Some(tool) = self.tools.get_mut(*index as usize) {
                    tool.arguments.push_str(arguments);
                }
                frames.push(frame(&ResponsesStreamEvent::FunctionCallArgumentsDelta {
                    output_index: Some(*index),
                    delta: arguments.clone(),
                }));
            }
            StreamEvent::Finish { reason } => match reason {
                FinishReason::ToolCalls if !self.tools.is_empty() => {
                    frames.push(frame(&ResponsesStreamEvent::RequiredAction {
                        response: self.document(ResponsesStatus::RequiresAction, true),
                    }));
                }
                FinishReason::Length | FinishReason::ContentFilter => {
                    frames.push(frame(&ResponsesStreamEvent::Completed {
                        response: self.document(ResponsesStatus::Incomplete, false),
                    }));
                }
                _ => {
                    frames.push(frame(&ResponsesStreamEvent::Completed {
                        response: self.document(ResponsesStatus::Completed, false),
                    }));
                }
            },
            StreamEvent::Usage(usage) => {
                self.usage = Some(*usage);
            }
            StreamEvent::Done => {
                frames.push(frame(&ResponsesStreamEvent::Done));
            }
        }

        frames
    }

    /// Tool calls accumulated so far; the tool-loop controller stores
    /// these when a stream pauses on `required_action`
    pub fn accumulated_tool_calls(&self) -> &[ResponsesPendingToolCall] {
        &self.tools
    }

    fn document(&self, status: ResponsesStatus, with_action: bool) -> ResponsesResponse {
        let mut output = Vec::new();
        if !self.text.is_empty() {
            output.push(ResponsesOutputItem::Message {
                id: None,
                role: "assistant".to_owned(),
                content: vec![ResponsesOutputContent::OutputText { text: self.text.clone() }],
            });
        }
        for tool in &self.tools {
            output.push(ResponsesOutputItem::FunctionCall {
                id: None,
                call_id: tool.id.clone(),
                name: tool.name.clone(),
                arguments: tool.arguments.clone(),
            });
        }

        ResponsesResponse {
            id: self.response_id.clone(),
            object: "response".to_owned(),
            created_at: self.created,
            status,
            model: self.model.clone(),
            output,
            output_text: (!self.text.is_empty()).then(|| self.text.clone()),
            required_action: with_action.then(|| ResponsesRequiredAction {
                action_type: "submit_tool_outputs".to_owned(),
                submit_tool_outputs: ResponsesPendingToolCalls {
                    tool_calls: self.tools.clone(),
                },
            }),
            usage: self.usage.map(|u| ResponsesUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        }
    }
}

fn frame(event: &ResponsesStreamEvent) -> SseFrame {
    SseFrame::event(event.event_name(), serde_json::to_string(event).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_input_becomes_user_turn() {
        let req: ResponsesRequest = serde_json::from_value(serde_json::json!({
            "model": "m",
            "instructions": "be helpful",
            "input": "hello"
        }))
        .unwrap();
        let canonical = canonicalize_request(req);
        assert_eq!(canonical.instructions.as_deref(), Some("be helpful"));
        assert_eq!(canonical.messages.len(), 1);
        assert_eq!(canonical.messages[0].content.as_text(), "hello");
    }

    #[test]
    fn prior_turns_reconstruct_from_items() {
        let req: ResponsesRequest = serde_json::from_value(serde_json::json!({
            "model": "m",
            "input": [
                {"type": "message", "role": "user",
                 "content": [{"type": "input_text", "text": "list files"}]},
                {"type": "function_call", "call_id": "call_1", "name": "list_local_files",
                 "arguments": "{}"},
                {"type": "function_call_output", "call_id": "call_1", "output": "[\"README.md\"]"},
                {"type": "message", "role": "user",
                 "content": [{"type": "input_text", "text": "thanks"}]}
            ]
        }))
        .unwrap();
        let canonical = canonicalize_request(req);

        assert_eq!(canonical.messages.len(), 4);
        assert!(canonical.messages[1].has_tool_calls());
        assert_eq!(canonical.messages[2].role, Role::Tool);
        assert_eq!(canonical.messages[2].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn nested_function_tools_unwrap() {
        let req: ResponsesRequest = serde_json::from_value(serde_json::json!({
            "model": "m",
            "input": "go",
            "tools": [{"function": {"name": "list_local_files"}}]
        }))
        .unwrap();
        let canonical = canonicalize_request(req);
        assert_eq!(canonical.tools.len(), 1);
        assert_eq!(canonical.tools[0].name, "list_local_files");
    }

    #[test]
    fn request_round_trip_preserves_tool_turns() {
        let mut canonical = CanonicalRequest::user_text("m", "list files");
        canonical.messages.push(Message::assistant_tool_calls(vec![ToolCall {
            id: "call_1".to_owned(),
            function: FunctionCall {
                name: "shell".to_owned(),
                arguments: r#"{"command":["ls"]}"#.to_owned(),
            },
        }]));
        canonical.messages.push(Message::tool_result("call_1", "README.md"));

        let wire = emit_request(&canonical);
        let ResponsesInput::Items(items) = &wire.input else {
            panic!("expected items");
        };
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[1], ResponsesInputItem::FunctionCall { call_id, .. } if call_id == "call_1"));
        assert!(
            matches!(&items[2], ResponsesInputItem::FunctionCallOutput { call_id, .. } if call_id == "call_1")
        );

        let back = canonicalize_request(wire);
        assert_eq!(back.messages.len(), 3);
        assert!(back.messages[1].has_tool_calls());
        assert_eq!(back.messages[2].role, Role::Tool);
    }

    #[test]
    fn requires_action_document_round_trip() {
        let canonical = CanonicalResponse {
            id: "up_1".to_owned(),
            model: "m".to_owned(),
            created: 1,
            output: AssistantOutput {
                content: None,
                tool_calls: Some(vec![ToolCall {
                    id: "call_1".to_owned(),
                    function: FunctionCall {
                        name: "list_local_files".to_owned(),
                        arguments: "{}".to_owned(),
                    },
                }]),
            },
            finish_reason: Some(FinishReason::ToolCalls),
            usage: None,
        };

        let wire = emit_response(&canonical, &AliasMap::default(), "resp_abc");
        assert_eq!(wire.status, ResponsesStatus::RequiresAction);
        assert_eq!(wire.id, "resp_abc");
        let action = wire.required_action.as_ref().unwrap();
        assert_eq!(action.submit_tool_outputs.tool_calls.len(), 1);
        assert_eq!(action.submit_tool_outputs.tool_calls[0].name, "list_local_files");

        let back = canonicalize_response(wire);
        assert_eq!(back.finish_reason, Some(FinishReason::ToolCalls));
        assert!(back.wants_tools());
    }

    #[test]
    fn completed_document_carries_output_text() {
        let canonical = CanonicalResponse {
            id: "up_1".to_owned(),
            model: "m".to_owned(),
            created: 1,
            output: AssistantOutput {
                content: Some("done".to_owned()),
                tool_calls: None,
            },
            finish_reason: Some(FinishReason::Stop),
            usage: Some(Usage {
                prompt_tokens: 4,
                completion_tokens: 2,
                total_tokens: 6,
            }),
        };

        let wire = emit_response(&canonical, &AliasMap::default(), "resp_abc");
        assert_eq!(wire.status, ResponsesStatus::Completed);
        assert_eq!(wire.output_text.as_deref(), Some("done"));
        assert!(wire.required_action.is_none());
    }

    #[test]
    fn stream_state_translates_function_call_events() {
        let mut state = ResponsesStreamState::new();

        let added: ResponsesStreamEvent = serde_json::from_value(serde_json::json!({
            "type": "response.output_item.added",
            "output_index": 0,
            "item": {"type": "function_call", "call_id": "call_1", "name": "shell", "arguments": ""}
        }))
        .unwrap();
        let events = state.convert_event(&added);
        assert_eq!(
            events,
            vec![StreamEvent::ToolCallStart {
                index: 0,
                id: "call_1".to_owned(),
                name: "shell".to_owned()
            }]
        );

        let delta: ResponsesStreamEvent = serde_json::from_value(serde_json::json!({
            "type": "response.function_call_arguments.delta",
            "output_index": 0,
            "delta": "{\"command\":[\"ls\"]}"
        }))
        .unwrap();
        let events = state.convert_event(&delta);
        assert_eq!(
            events,
            vec![StreamEvent::ToolCallArgsDelta {
                index: 0,
                arguments: "{\"command\":[\"ls\"]}".to_owned()
            }]
        );
    }

    #[test]
    fn completed_without_tools_finishes_stop() {
        let mut state = ResponsesStreamState::new();
        let completed: ResponsesStreamEvent = serde_json::from_value(serde_json::json!({
            "type": "response.completed",
            "response": {
                "id": "r", "object": "response", "created_at": 0, "status": "completed",
                "model": "m", "output": [],
                "usage": {"input_tokens": 3, "output_tokens": 1, "total_tokens": 4}
            }
        }))
        .unwrap();
        let events = state.convert_event(&completed);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StreamEvent::Usage(_)));
        assert_eq!(
            events[1],
            StreamEvent::Finish {
                reason: FinishReason::Stop
            }
        );
    }

    #[test]
    fn emitter_terminal_frames_for_stop() {
        let mut emitter = ResponsesStreamEmitter::new("m", AliasMap::default(), "resp_1");

        let frames = emitter.emit(&StreamEvent::TextDelta { text: "hi".to_owned() });
        let names: Vec<_> = frames.iter().filter_map(|f| f.event.as_deref()).collect();
        assert_eq!(names, vec!["response.created", "response.output_text.delta"]);

        let frames = emitter.emit(&StreamEvent::Finish {
            reason: FinishReason::Stop,
        });
        assert_eq!(frames[0].event.as_deref(), Some("response.completed"));
        assert!(frames[0].data.contains("\"output_text\":\"hi\""));

        let frames = emitter.emit(&StreamEvent::Done);
        assert_eq!(frames[0].event.as_deref(), Some("response.done"));
    }

    #[test]
    fn emitter_required_action_accumulates_arguments() {
        let mut emitter = ResponsesStreamEmitter::new("m", AliasMap::default(), "resp_1");
        emitter.emit(&StreamEvent::ToolCallStart {
            index: 0,
            id: "call_1".to_owned(),
            name: "shell".to_owned(),
        });
        emitter.emit(&StreamEvent::ToolCallArgsDelta {
            index: 0,
            arguments: "{\"command\"".to_owned(),
        });
        emitter.emit(&StreamEvent::ToolCallArgsDelta {
            index: 0,
            arguments: ":[\"ls\"]}".to_owned(),
        });

        let frames = emitter.emit(&StreamEvent::Finish {
            reason: FinishReason::ToolCalls,
        });
        assert_eq!(frames[0].event.as_deref(), Some("response.required_action"));
        assert_eq!(emitter.accumulated_tool_calls()[0].arguments, "{\"command\":[\"ls\"]}");
    }
}
