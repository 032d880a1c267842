//! Axum route handlers for the three wire protocols
//!
//! Each endpoint canonicalizes the inbound request, classifies it, runs
//! the pipeline, and re-emits the result in the caller's wire shape —
//! JSON or SSE. Errors are translated into the protocol's error body;
//! internal identifiers (credential aliases) never leave the process.
//! Every handler snapshots the state core once, so a mid-request config
//! reload never changes its view.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json, Router, routing};
use crossbar_core::{HttpError, RequestEnvelope};
use futures_util::{Stream, StreamExt};

use crate::convert;
use crate::error::GatewayError;
use crate::pipeline::UpstreamResult;
use crate::protocol::anthropic::AnthropicRequest;
use crate::protocol::chat::{ChatModel, ChatModelList, ChatRequest};
use crate::protocol::responses::{ResponsesRequest, SubmitToolOutputsRequest};
use crate::provider::EventStream;
use crate::router::RoutingDecision;
use crate::sessions::SessionStore;
use crate::state::{GatewayCore, GatewayState};
use crate::stream::{collect_response, ensure_done, synthesize_events};
use crate::types::{CanonicalRequest, FinishReason, FunctionCall, Message, SseFrame, StreamEvent, ToolCall};

/// Build the gateway router with all wire endpoints
pub fn gateway_router(state: GatewayState) -> Router {
    Router::new()
        .route("/v1/chat/completions", routing::post(chat_completions))
        .route("/v1/responses", routing::post(responses_create))
        .route("/v1/responses/{id}/submit_tool_outputs", routing::post(responses_submit))
        .route("/v1/messages", routing::post(anthropic_messages))
        .route("/v1/models", routing::get(list_models))
        .with_state(state)
}

/// Run the pipeline under the optional request deadline
async fn execute(
    core: &GatewayCore,
    request: &CanonicalRequest,
    classification: &crossbar_classify::Classification,
    request_id: &str,
    want_stream: bool,
) -> Result<(RoutingDecision, UpstreamResult), GatewayError> {
    let call = core.pipeline().execute(request, classification, request_id, want_stream);
    match core.request_deadline {
        Some(deadline) => tokio::time::timeout(deadline, call)
            .await
            .map_err(|_| GatewayError::ServerError("request deadline exceeded".to_owned()))?,
        None => call.await,
    }
}

fn request_id_for(state: &GatewayState, envelope: Option<&RequestEnvelope>) -> String {
    envelope.map_or_else(|| state.next_request_id(), |e| e.request_id.clone())
}

/// Normalize the pipeline outcome into a canonical event stream
fn into_event_stream(result: UpstreamResult) -> EventStream {
    match result {
        UpstreamResult::Stream(stream) => ensure_done(stream),
        UpstreamResult::Json(resp) => {
            let events = synthesize_events(&resp);
            Box::pin(futures_util::stream::iter(events.into_iter().map(Ok)))
        }
    }
}

fn frame_to_event(frame: SseFrame) -> Event {
    match frame.event {
        Some(name) => Event::default().event(name).data(frame.data),
        None => Event::default().data(frame.data),
    }
}

fn sse_response<S>(frames: S) -> Response
where
    S: Stream<Item = Result<Event, axum::Error>> + Send + 'static,
{
    Sse::new(frames).keep_alive(KeepAlive::default()).into_response()
}

// -- Chat-completions endpoint --

/// Handle `POST /v1/chat/completions`
async fn chat_completions(
    State(state): State<GatewayState>,
    envelope: Option<Extension<RequestEnvelope>>,
    Json(wire): Json<ChatRequest>,
) -> Response {
    let core = state.core();
    let request_id = request_id_for(&state, envelope.as_ref().map(|e| &e.0));
    let canonical = convert::chat::canonicalize_request(wire);
    let aliases = canonical.tool_aliases.clone();
    let client_stream = canonical.stream;
    let classification = core.classify(&canonical);

    tracing::info!(
        request_id,
        route = %classification.route,
        confidence = classification.confidence,
        stream = client_stream,
        "chat request classified"
    );

    match execute(&core, &canonical, &classification, &request_id, client_stream).await {
        Err(e) => chat_error_response(&e),
        Ok((decision, result)) if !client_stream => {
            let response = match result {
                UpstreamResult::Json(resp) => Ok(resp),
                UpstreamResult::Stream(stream) => collect_response(stream, &decision.target.model).await,
            };
            match response {
                Ok(resp) => Json(convert::chat::emit_response(&resp, &aliases)).into_response(),
                Err(e) => chat_error_response(&e),
            }
        }
        Ok((decision, result)) => {
            let mut emitter = convert::chat::ChatStreamEmitter::new(decision.target.model.clone(), aliases);
            let frames = into_event_stream(result).flat_map(move |item| {
                let frames = match item {
                    Ok(event) => emitter.emit(&event),
                    Err(e) => vec![chat_error_frame(&e)],
                };
                futures_util::stream::iter(frames.into_iter().map(|f| Ok(frame_to_event(f))))
            });
            sse_response(frames)
        }
    }
}

fn chat_error_body(error: &GatewayError) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "message": error.client_message(),
            "type": error.error_type(),
            "code": serde_json::Value::Null,
        }
    })
}

fn chat_error_response(error: &GatewayError) -> Response {
    (error.status_code(), Json(chat_error_body(error))).into_response()
}

fn chat_error_frame(error: &GatewayError) -> SseFrame {
    SseFrame::data(chat_error_body(error).to_string())
}

// -- Anthropic messages endpoint --

/// Handle `POST /v1/messages`
async fn anthropic_messages(
    State(state): State<GatewayState>,
    envelope: Option<Extension<RequestEnvelope>>,
    Json(wire): Json<AnthropicRequest>,
) -> Response {
    let core = state.core();
    let request_id = request_id_for(&state, envelope.as_ref().map(|e| &e.0));
    let canonical = convert::anthropic::canonicalize_request(wire);
    let aliases = canonical.tool_aliases.clone();
    let client_stream = canonical.stream;
    let classification = core.classify(&canonical);

    tracing::info!(
        request_id,
        route = %classification.route,
        confidence = classification.confidence,
        stream = client_stream,
        "messages request classified"
    );

    match execute(&core, &canonical, &classification, &request_id, client_stream).await {
        Err(e) => anthropic_error_response(&e),
        Ok((decision, result)) if !client_stream => {
            let response = match result {
                UpstreamResult::Json(resp) => Ok(resp),
                UpstreamResult::Stream(stream) => collect_response(stream, &decision.target.model).await,
            };
            match response {
                Ok(resp) => Json(convert::anthropic::emit_response(&resp, &aliases)).into_response(),
                Err(e) => anthropic_error_response(&e),
            }
        }
        Ok((decision, result)) => {
            let mut emitter = convert::anthropic::AnthropicStreamEmitter::new(decision.target.model.clone(), aliases);
            let frames = into_event_stream(result).flat_map(move |item| {
                let frames = match item {
                    Ok(event) => emitter.emit(&event),
                    Err(e) => vec![anthropic_error_frame(&e)],
                };
                futures_util::stream::iter(frames.into_iter().map(|f| Ok(frame_to_event(f))))
            });
            sse_response(frames)
        }
    }
}

fn anthropic_error_body(error: &GatewayError) -> serde_json::Value {
    serde_json::json!({
        "type": "error",
        "error": {
            "type": error.error_type(),
            "message": error.client_message(),
        }
    })
}

fn anthropic_error_response(error: &GatewayError) -> Response {
    (error.status_code(), Json(anthropic_error_body(error))).into_response()
}

fn anthropic_error_frame(error: &GatewayError) -> SseFrame {
    SseFrame::event("error", anthropic_error_body(error).to_string())
}

// -- Responses endpoint --

/// Handle `POST /v1/responses`
async fn responses_create(
    State(state): State<GatewayState>,
    envelope: Option<Extension<RequestEnvelope>>,
    Json(wire): Json<ResponsesRequest>,
) -> Response {
    let request_id = request_id_for(&state, envelope.as_ref().map(|e| &e.0));
    let canonical = convert::responses::canonicalize_request(wire);
    run_responses_turn(&state, canonical, request_id, 0, None).await
}

/// Handle `POST /v1/responses/{id}/submit_tool_outputs`
async fn responses_submit(
    State(state): State<GatewayState>,
    Path(response_id): Path<String>,
    envelope: Option<Extension<RequestEnvelope>>,
    Json(wire): Json<SubmitToolOutputsRequest>,
) -> Response {
    let request_id = request_id_for(&state, envelope.as_ref().map(|e| &e.0));

    let (mut canonical, prior_decision, loops) = match state.sessions().resume(&response_id, &wire.tool_outputs) {
        Ok(resumed) => resumed,
        Err(e) => return responses_error_response(&e),
    };
    canonical.stream = wire.stream.unwrap_or(false);

    run_responses_turn(&state, canonical, request_id, loops, Some(prior_decision)).await
}

/// One responses round trip: a fresh request or a resumed tool loop
async fn run_responses_turn(
    state: &GatewayState,
    canonical: CanonicalRequest,
    request_id: String,
    loops: u32,
    prior_decision: Option<RoutingDecision>,
) -> Response {
    let core = state.core();
    let aliases = canonical.tool_aliases.clone();
    let client_stream = canonical.stream;
    let classification = core.classify(&canonical);
    let response_id = convert::wire_id("resp_");

    tracing::info!(
        request_id,
        route = %classification.route,
        loops,
        stream = client_stream,
        "responses request classified"
    );

    // Resumed loops keep their original decision while the key stays
    // eligible; otherwise the router picks fresh
    let outcome = match prior_decision {
        Some(decision) if core.pipeline().key_still_eligible(&decision.key) => {
            match core
                .pipeline()
                .call_with_decision(&decision, &canonical, &request_id, client_stream)
                .await
            {
                Ok(result) => Ok((decision, result)),
                Err(e) if e.is_retryable() => {
                    execute(&core, &canonical, &classification, &request_id, client_stream).await
                }
                Err(e) => Err(e),
            }
        }
        _ => execute(&core, &canonical, &classification, &request_id, client_stream).await,
    };

    match outcome {
        Err(e) => responses_error_response(&e),
        Ok((decision, result)) if !client_stream => {
            let response = match result {
                UpstreamResult::Json(resp) => Ok(resp),
                UpstreamResult::Stream(stream) => collect_response(stream, &decision.target.model).await,
            };
            let resp = match response {
                Ok(resp) => resp,
                Err(e) => return responses_error_response(&e),
            };

            let wire = convert::responses::emit_response(&resp, &aliases, &response_id);
            if let Some(calls) = resp.output.tool_calls.clone().filter(|_| resp.wants_tools()) {
                park_tool_loop(state.sessions(), &canonical, decision, &response_id, calls, loops);
            }
            Json(wire).into_response()
        }
        Ok((decision, result)) => {
            let mut emitter = convert::responses::ResponsesStreamEmitter::new(
                decision.target.model.clone(),
                aliases,
                response_id.clone(),
            );
            let mut recorder = ToolLoopRecorder {
                sessions: Arc::clone(state.sessions()),
                base_request: canonical,
                decision,
                response_id,
                loops,
                calls: Vec::new(),
            };

            let frames = into_event_stream(result).flat_map(move |item| {
                let frames = match item {
                    Ok(event) => {
                        recorder.observe(&event);
                        emitter.emit(&event)
                    }
                    Err(e) => vec![responses_error_frame(&e)],
                };
                futures_util::stream::iter(frames.into_iter().map(|f| Ok(frame_to_event(f))))
            });
            sse_response(frames)
        }
    }
}

/// Park a conversation that paused on tool calls
fn park_tool_loop(
    sessions: &Arc<SessionStore>,
    canonical: &CanonicalRequest,
    decision: RoutingDecision,
    response_id: &str,
    calls: Vec<ToolCall>,
    loops: u32,
) {
    let mut parked = canonical.clone();
    parked.messages.push(Message::assistant_tool_calls(calls.clone()));
    sessions.park(response_id, parked, decision, calls, loops);
}

/// Watches a responses stream for tool-call pauses and parks the
/// session the moment the pause is certain
struct ToolLoopRecorder {
    sessions: Arc<SessionStore>,
    base_request: CanonicalRequest,
    decision: RoutingDecision,
    response_id: String,
    loops: u32,
    calls: Vec<ToolCall>,
}

impl ToolLoopRecorder {
    fn observe(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::ToolCallStart { id, name, .. } => self.calls.push(ToolCall {
                id: id.clone(),
                function: FunctionCall {
                    name: name.clone(),
                    arguments: String::new(),
                },
            }),
            StreamEvent::ToolCallArgsDelta { index, arguments } => {
                if let Some(call) = self.calls.get_mut(*index as usize) {
                    call.function.arguments.push_str(arguments);
                }
            }
            StreamEvent::Finish {
                reason: FinishReason::ToolCalls,
            } if !self.calls.is_empty() => {
                park_tool_loop(
                    &self.sessions,
                    &self.base_request,
                    self.decision.clone(),
                    &self.response_id,
                    self.calls.clone(),
                    self.loops,
                );
            }
            _ => {}
        }
    }
}

fn responses_error_body(error: &GatewayError) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "type": error.error_type(),
            "message": error.client_message(),
        }
    })
}

fn responses_error_response(error: &GatewayError) -> Response {
    (error.status_code(), Json(responses_error_body(error))).into_response()
}

fn responses_error_frame(error: &GatewayError) -> SseFrame {
    SseFrame::event("response.failed", responses_error_body(error).to_string())
}

// -- Models listing --

/// Handle `GET /v1/models`
async fn list_models(State(state): State<GatewayState>) -> Response {
    let core = state.core();
    let created = convert::now_epoch_secs();
    let data = core
        .models
        .iter()
        .map(|(provider, model)| ChatModel {
            id: format!("{provider}/{model}"),
            object: "model".to_owned(),
            created,
            owned_by: provider.clone(),
        })
        .collect();

    Json(ChatModelList {
        object: "list".to_owned(),
        data,
    })
    .into_response()
}
