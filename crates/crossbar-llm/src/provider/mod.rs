//! Upstream provider clients
//!
//! One client per configured provider, speaking that provider's wire
//! protocol. The only component that performs network I/O to upstreams.
//! No retry logic lives here; the pipeline above re-enters the router on
//! retryable failures.

pub mod anthropic;
pub mod chat;
pub mod responses;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use crossbar_config::{ProviderConfig, ProviderProtocol};
use futures_util::Stream;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};

use crate::error::GatewayError;
use crate::types::{CanonicalRequest, CanonicalResponse, StreamEvent};

/// Stream of canonical events bound to an upstream connection
///
/// Dropping the stream drops the connection; client cancellation
/// propagates within one read cycle.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, GatewayError>> + Send>>;

/// Upper bound on a single buffered SSE frame
pub(crate) const MAX_SSE_FRAME_BYTES: usize = 64 * 1024;

/// Drop oversized frames instead of buffering them
pub(crate) fn frame_within_limit(provider: &str, data: &str) -> bool {
    if data.len() > MAX_SSE_FRAME_BYTES {
        tracing::warn!(provider, bytes = data.len(), "dropping oversized SSE frame");
        return false;
    }
    true
}

/// One upstream provider client
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider id from config
    fn name(&self) -> &str;

    /// Wire protocol this provider speaks
    fn protocol(&self) -> ProviderProtocol;

    /// Perform one non-streaming call
    async fn complete(
        &self,
        request: &CanonicalRequest,
        secret: &SecretString,
        request_id: &str,
    ) -> Result<CanonicalResponse, GatewayError>;

    /// Perform one streaming call
    async fn complete_stream(
        &self,
        request: &CanonicalRequest,
        secret: &SecretString,
        request_id: &str,
    ) -> Result<EventStream, GatewayError>;
}

/// Build a provider client for a config entry
pub fn build_provider(
    name: &str,
    config: &ProviderConfig,
    connect_timeout: Duration,
) -> Box<dyn Provider> {
    match config.protocol {
        ProviderProtocol::Chat => Box::new(chat::ChatProvider::new(name, config, connect_timeout)),
        ProviderProtocol::Responses => Box::new(responses::ResponsesProvider::new(name, config, connect_timeout)),
        ProviderProtocol::Anthropic => Box::new(anthropic::AnthropicProvider::new(name, config, connect_timeout)),
    }
}

/// Shared HTTP plumbing for the three provider clients
pub(crate) struct UpstreamHttp {
    pub name: String,
    pub client: reqwest::Client,
    pub base_url: String,
    header_template: Vec<(String, String)>,
    default_auth: DefaultAuth,
}

/// Auth scheme applied when no header template overrides it
#[derive(Debug, Clone, Copy)]
pub(crate) enum DefaultAuth {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `x-api-key: <key>` plus the anthropic version header
    XApiKey,
}

/// Placeholder in header templates that expands to the selected secret
const KEY_PLACEHOLDER: &str = "{key}";

impl UpstreamHttp {
    pub fn new(name: &str, config: &ProviderConfig, connect_timeout: Duration, default_auth: DefaultAuth) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_default();

        Self {
            name: name.to_owned(),
            client,
            base_url: config.base_url.as_str().trim_end_matches('/').to_owned(),
            header_template: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            default_auth,
        }
    }

    /// Compose per-call headers from the template and the selected secret
    pub fn headers(&self, secret: &SecretString, request_id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if self.header_template.is_empty() {
            match self.default_auth {
                DefaultAuth::Bearer => {
                    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", secret.expose_secret())) {
                        headers.insert(reqwest::header::AUTHORIZATION, value);
                    }
                }
                DefaultAuth::XApiKey => {
                    if let Ok(value) = HeaderValue::from_str(secret.expose_secret()) {
                        headers.insert(HeaderName::from_static("x-api-key"), value);
                    }
                    headers.insert(
                        HeaderName::from_static("anthropic-version"),
                        HeaderValue::from_static("2023-06-01"),
                    );
                }
            }
        } else {
            for (name, template) in &self.header_template {
                let value = template.replace(KEY_PLACEHOLDER, secret.expose_secret());
                let Ok(header_name) = HeaderName::try_from(name.as_str()) else {
                    tracing::warn!(provider = %self.name, header = %name, "invalid header name in template");
                    continue;
                };
                let Ok(header_value) = HeaderValue::from_str(&value) else {
                    tracing::warn!(provider = %self.name, header = %name, "invalid header value in template");
                    continue;
                };
                headers.insert(header_name, header_value);
            }
        }

        if let Ok(value) = HeaderValue::from_str(request_id) {
            headers.insert(HeaderName::from_static("x-request-id"), value);
        }

        headers
    }

    /// POST a JSON body and classify any failure
    ///
    /// Returns the successful response for the caller to parse.
    pub async fn post_json<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        secret: &SecretString,
        request_id: &str,
    ) -> Result<reqwest::Response, GatewayError> {
        let url = format!("{}{path}", self.base_url);

        let response = self
            .client
            .post(&url)
            .headers(self.headers(secret, request_id))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(provider = %self.name, error = %e, "upstream request failed");
                GatewayError::ServerError(e.to_string())
            })?;

        classify_status(response).await
    }
}

/// Map upstream HTTP status onto the error taxonomy
///
/// | observed | kind |
/// |---|---|
/// | 429 | `RateLimited` (with `Retry-After`) |
/// | 5xx | `ServerError` |
/// | 401/403 | `AuthError` |
/// | other 4xx | `ClientError`, body verbatim |
pub(crate) async fn classify_status(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status.as_u16() == 429 {
        let retry_after_ms = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1_000);
        return Err(GatewayError::RateLimited { retry_after_ms });
    }

    let body = response.text().await.unwrap_or_default();

    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(GatewayError::AuthError(format!("upstream returned {status}")));
    }
    if status.is_client_error() {
        return Err(GatewayError::ClientError {
            status: status.as_u16(),
            body,
        });
    }

    Err(GatewayError::ServerError(format!("upstream returned {status}: {body}")))
}

/// Parse a successful JSON body, mapping failure to `ProtocolViolation`
pub(crate) async fn parse_success_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, GatewayError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| GatewayError::ServerError(format!("failed to read upstream body: {e}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| GatewayError::ProtocolViolation(format!("unparseable upstream success body: {e}")))
}
