use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use crossbar_core::{RequestEnvelope, WireProtocol};
use crossbar_llm::GatewayState;

/// Middleware that issues the request id and attaches the envelope
///
/// The envelope is immutable from here on; handlers receive it through
/// request extensions, and the id travels upstream as `x-request-id`.
pub async fn envelope_middleware(state: GatewayState, mut request: Request, next: Next) -> Response {
    let path = request.uri().path().to_owned();
    let request_id = state.next_request_id();

    let mut envelope = RequestEnvelope::new(request_id.clone(), protocol_for_path(&path), path.clone());
    envelope.conversation_id = conversation_for_path(&path);
    envelope.server_tool_required = envelope.conversation_id.is_some();
    request.extensions_mut().insert(envelope);

    let mut response = next.run(request).await;
    if let Ok(value) = http::HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// The response id inside `/v1/responses/{id}/submit_tool_outputs`
fn conversation_for_path(path: &str) -> Option<String> {
    let rest = path.strip_prefix("/v1/responses/")?;
    let (id, tail) = rest.split_once('/')?;
    (tail == "submit_tool_outputs" && !id.is_empty()).then(|| id.to_owned())
}

/// Endpoint-to-protocol mapping
fn protocol_for_path(path: &str) -> WireProtocol {
    if path.starts_with("/v1/responses") {
        WireProtocol::Responses
    } else if path.starts_with("/v1/messages") {
        WireProtocol::Anthropic
    } else {
        WireProtocol::Chat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_binding_from_submit_path() {
        assert_eq!(
            conversation_for_path("/v1/responses/resp_abc/submit_tool_outputs").as_deref(),
            Some("resp_abc")
        );
        assert_eq!(conversation_for_path("/v1/responses"), None);
        assert_eq!(conversation_for_path("/v1/chat/completions"), None);
    }

    #[test]
    fn endpoint_protocol_mapping() {
        assert_eq!(protocol_for_path("/v1/chat/completions"), WireProtocol::Chat);
        assert_eq!(protocol_for_path("/v1/responses"), WireProtocol::Responses);
        assert_eq!(
            protocol_for_path("/v1/responses/resp_1/submit_tool_outputs"),
            WireProtocol::Responses
        );
        assert_eq!(protocol_for_path("/v1/messages"), WireProtocol::Anthropic);
    }
}
