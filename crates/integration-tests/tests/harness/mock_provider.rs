//! Mock upstream provider for integration tests
//!
//! Speaks all three wire protocols with canned responses and scripted
//! failures, and records the credentials it was called with so tests
//! can assert key rotation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Json, Router, routing};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// Mock upstream returning predictable responses
pub struct MockProvider {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

#[derive(Default)]
pub struct MockOptions {
    /// 429 this many requests before succeeding
    pub rate_limit_first: u32,
    /// Responses endpoint keeps demanding tools on every turn
    pub always_require_tools: bool,
    /// Override the canned completion text
    pub response_text: Option<String>,
}

struct MockState {
    request_count: AtomicU32,
    rate_limit_remaining: AtomicU32,
    always_require_tools: bool,
    response_text: String,
    /// Credential presented on each call, in arrival order
    seen_credentials: std::sync::Mutex<Vec<String>>,
}

impl MockProvider {
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(MockOptions::default()).await
    }

    pub async fn start_with(options: MockOptions) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            request_count: AtomicU32::new(0),
            rate_limit_remaining: AtomicU32::new(options.rate_limit_first),
            always_require_tools: options.always_require_tools,
            response_text: options
                .response_text
                .unwrap_or_else(|| "Hello from the mock provider".to_owned()),
            seen_credentials: std::sync::Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/v1/chat/completions", routing::post(handle_chat))
            .route("/v1/responses", routing::post(handle_responses))
            .route("/v1/messages", routing::post(handle_messages))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Base URL for chat/responses providers (paths append under /v1)
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// Base URL for anthropic providers (they append /v1/messages)
    pub fn base_url_root(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn request_count(&self) -> u32 {
        self.state.request_count.load(Ordering::Relaxed)
    }

    /// Credentials observed so far, normalized to the bare key value
    pub fn seen_credentials(&self) -> Vec<String> {
        self.state.seen_credentials.lock().unwrap().clone()
    }
}

impl Drop for MockProvider {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Record the call; returns a 429 response while the script demands it
fn gate(state: &MockState, headers: &HeaderMap) -> Option<axum::response::Response> {
    state.request_count.fetch_add(1, Ordering::Relaxed);

    let credential = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| headers.get("x-api-key").and_then(|v| v.to_str().ok()))
        .unwrap_or("<none>")
        .to_owned();
    state.seen_credentials.lock().unwrap().push(credential);

    let remaining = state.rate_limit_remaining.load(Ordering::Relaxed);
    if remaining > 0 {
        state.rate_limit_remaining.fetch_sub(1, Ordering::Relaxed);
        return Some(
            (
                StatusCode::TOO_MANY_REQUESTS,
                [("retry-after", "1")],
                Json(json!({"error": {"message": "mock rate limit", "type": "rate_limit_error"}})),
            )
                .into_response(),
        );
    }

    None
}

fn sse_body(frames: &[(Option<&str>, String)]) -> impl IntoResponse + use<> {
    let mut body = String::new();
    for (event, data) in frames {
        if let Some(event) = event {
            body.push_str(&format!("event: {event}\n"));
        }
        body.push_str(&format!("data: {data}\n\n"));
    }
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/event-stream")],
        body,
    )
}

// -- Chat protocol --

async fn handle_chat(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> axum::response::Response {
    if let Some(rejection) = gate(&state, &headers) {
        return rejection;
    }

    let model = body["model"].as_str().unwrap_or("mock-model").to_owned();
    let stream = body["stream"].as_bool().unwrap_or(false);
    let has_tools = body["tools"].as_array().is_some_and(|t| !t.is_empty());
    let has_tool_result = body["messages"]
        .as_array()
        .is_some_and(|msgs| msgs.iter().any(|m| m["role"] == "tool"));

    // A turn answering tool output completes; a turn offering tools calls one
    let wants_tool_call = has_tools && !has_tool_result;

    if stream {
        return chat_stream_response(&state, &model, wants_tool_call).into_response();
    }

    let (content, tool_calls, finish) = if wants_tool_call {
        (
            Value::Null,
            json!([{
                "id": "call_mock_1",
                "type": "function",
                "function": {"name": "shell", "arguments": "{\"command\":[\"ls\"]}"}
            }]),
            "tool_calls",
        )
    } else if has_tool_result {
        (json!("Command output received"), Value::Null, "stop")
    } else {
        (json!(state.response_text.clone()), Value::Null, "stop")
    };

    let mut message = json!({"role": "assistant", "content": content});
    if !tool_calls.is_null() {
        message["tool_calls"] = tool_calls;
    }

    Json(json!({
        "id": "chatcmpl-mock-1",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": model,
        "choices": [{"index": 0, "message": message, "finish_reason": finish}],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    }))
    .into_response()
}

fn chat_stream_response(state: &MockState, model: &str, wants_tool_call: bool) -> impl IntoResponse {
    let chunk = |delta: Value, finish: Value| {
        json!({
            "id": "chatcmpl-mock-stream",
            "object": "chat.completion.chunk",
            "created": 1_700_000_000,
            "model": model,
            "choices": [{"index": 0, "delta": delta, "finish_reason": finish}]
        })
        .to_string()
    };

    let mut frames: Vec<(Option<&str>, String)> = Vec::new();
    frames.push((None, chunk(json!({"role": "assistant"}), Value::Null)));

    if wants_tool_call {
        frames.push((
            None,
            chunk(
                json!({"tool_calls": [{"index": 0, "id": "call_mock_stream", "type": "function",
                       "function": {"name": "shell"}}]}),
                Value::Null,
            ),
        ));
        frames.push((
            None,
            chunk(
                json!({"tool_calls": [{"index": 0, "function": {"arguments": "{\"command\":[\"ls\"]}"}}]}),
                Value::Null,
            ),
        ));
        frames.push((None, chunk(json!({}), json!("tool_calls"))));
    } else {
        for word in state.response_text.split_whitespace() {
            frames.push((None, chunk(json!({"content": format!("{word} ")}), Value::Null)));
        }
        frames.push((None, chunk(json!({}), json!("stop"))));
    }

    frames.push((None, "[DONE]".to_owned()));
    sse_body(&frames)
}

// -- Responses protocol --

async fn handle_responses(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> axum::response::Response {
    if let Some(rejection) = gate(&state, &headers) {
        return rejection;
    }

    let model = body["model"].as_str().unwrap_or("mock-model").to_owned();
    let has_tools = body["tools"].as_array().is_some_and(|t| !t.is_empty());
    let has_tool_output = body["input"]
        .as_array()
        .is_some_and(|items| items.iter().any(|i| i["type"] == "function_call_output"));

    let wants_tool_call = has_tools && (state.always_require_tools || !has_tool_output);

    if wants_tool_call {
        return Json(json!({
            "id": "resp-mock-1",
            "object": "response",
            "created_at": 1_700_000_000,
            "status": "requires_action",
            "model": model,
            "output": [{
                "type": "function_call",
                "call_id": "call_mock_1",
                "name": "list_local_files",
                "arguments": "{}"
            }],
            "required_action": {
                "type": "submit_tool_outputs",
                "submit_tool_outputs": {"tool_calls": [{
                    "id": "call_mock_1",
                    "name": "list_local_files",
                    "arguments": "{}"
                }]}
            },
            "usage": {"input_tokens": 12, "output_tokens": 6, "total_tokens": 18}
        }))
        .into_response();
    }

    let text = if has_tool_output {
        "All files listed".to_owned()
    } else {
        state.response_text.clone()
    };

    Json(json!({
        "id": "resp-mock-2",
        "object": "response",
        "created_at": 1_700_000_000,
        "status": "completed",
        "model": model,
        "output": [{
            "type": "message",
            "role": "assistant",
            "content": [{"type": "output_text", "text": text}]
        }],
        "output_text": text,
        "usage": {"input_tokens": 12, "output_tokens": 6, "total_tokens": 18}
    }))
    .into_response()
}

// -- Anthropic protocol --

async fn handle_messages(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> axum::response::Response {
    if let Some(rejection) = gate(&state, &headers) {
        return rejection;
    }

    let model = body["model"].as_str().unwrap_or("mock-model").to_owned();
    let stream = body["stream"].as_bool().unwrap_or(false);

    if stream {
        let frames: Vec<(Option<&str>, String)> = vec![
            (
                Some("message_start"),
                json!({"type": "message_start", "message": {
                    "id": "msg_mock_1", "type": "message", "role": "assistant", "model": model
                }})
                .to_string(),
            ),
            (
                Some("content_block_start"),
                json!({"type": "content_block_start", "index": 0,
                       "content_block": {"type": "text", "text": ""}})
                .to_string(),
            ),
            (
                Some("content_block_delta"),
                json!({"type": "content_block_delta", "index": 0,
                       "delta": {"type": "text_delta", "text": state.response_text.clone()}})
                .to_string(),
            ),
            (
                Some("content_block_stop"),
                json!({"type": "content_block_stop", "index": 0}).to_string(),
            ),
            (
                Some("message_delta"),
                json!({"type": "message_delta",
                       "delta": {"stop_reason": "end_turn"},
                       "usage": {"input_tokens": 8, "output_tokens": 4}})
                .to_string(),
            ),
            (Some("message_stop"), json!({"type": "message_stop"}).to_string()),
        ];
        return sse_body(&frames).into_response();
    }

    Json(json!({
        "id": "msg_mock_1",
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": [{"type": "text", "text": state.response_text.clone()}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 8, "output_tokens": 4}
    }))
    .into_response()
}
