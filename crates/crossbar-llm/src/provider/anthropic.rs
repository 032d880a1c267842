//! Anthropic-protocol upstream client

use std::time::Duration;

use async_trait::async_trait;
use crossbar_config::{ProviderConfig, ProviderProtocol};
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use secrecy::SecretString;

use super::{DefaultAuth, EventStream, Provider, UpstreamHttp, parse_success_json};
use crate::convert::anthropic::{AnthropicStreamState, canonicalize_response, emit_request};
use crate::error::GatewayError;
use crate::protocol::anthropic::{AnthropicResponse, AnthropicStreamEvent};
use crate::types::{CanonicalRequest, CanonicalResponse};

/// Upstream speaking the anthropic messages protocol
pub struct AnthropicProvider {
    http: UpstreamHttp,
}

impl AnthropicProvider {
    pub fn new(name: &str, config: &ProviderConfig, connect_timeout: Duration) -> Self {
        Self {
            http: UpstreamHttp::new(name, config, connect_timeout, DefaultAuth::XApiKey),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.http.name
    }

    fn protocol(&self) -> ProviderProtocol {
        ProviderProtocol::Anthropic
    }

    async fn complete(
        &self,
        request: &CanonicalRequest,
        secret: &SecretString,
        request_id: &str,
    ) -> Result<CanonicalResponse, GatewayError> {
        let mut wire = emit_request(request);
        wire.stream = None;

        let response = self.http.post_json("/v1/messages", &wire, secret, request_id).await?;
        let wire_response: AnthropicResponse = parse_success_json(response).await?;
        Ok(canonicalize_response(wire_response))
    }

    async fn complete_stream(
        &self,
        request: &CanonicalRequest,
        secret: &SecretString,
        request_id: &str,
    ) -> Result<EventStream, GatewayError> {
        let mut wire = emit_request(request);
        wire.stream = Some(true);

        let response = self.http.post_json("/v1/messages", &wire, secret, request_id).await?;

        let mut state = AnthropicStreamState::new();
        let provider = self.http.name.clone();

        let events = response
            .bytes_stream()
            .eventsource()
            .map(move |result| match result {
                Ok(event) => {
                    if !super::frame_within_limit(&provider, &event.data) {
                        return vec![];
                    }
                    match serde_json::from_str::<AnthropicStreamEvent>(&event.data) {
                        Ok(wire_event) => state.convert_event(&wire_event).into_iter().map(Ok).collect(),
                        Err(e) => {
                            tracing::debug!(provider = %provider, error = %e, "skipping unparseable SSE event");
                            vec![]
                        }
                    }
                }
                Err(e) => vec![Err(GatewayError::ServerError(format!("stream read failed: {e}")))],
            })
            .flat_map(futures_util::stream::iter);

        Ok(Box::pin(events))
    }
}
