//! Provider pipeline and retry controller
//!
//! Executes one classified request against upstream providers: selects a
//! credential via the router, performs the call, reports the outcome to
//! the pool, and rotates to a different key on retryable failures. Each
//! retry gets a fresh routing decision over the not-yet-tried keys.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crossbar_classify::Classification;
use crossbar_pool::{KeyId, KeyRegistry};
use futures_util::StreamExt;
use secrecy::SecretString;

use crate::error::GatewayError;
use crate::provider::{EventStream, Provider};
use crate::router::{RoutingDecision, VirtualRouter};
use crate::stream::with_idle_timeout;
use crate::types::{CanonicalRequest, CanonicalResponse};

/// What an upstream call produced
pub enum UpstreamResult {
    /// Parsed non-streaming response
    Json(CanonicalResponse),
    /// Live event stream bound to the upstream connection
    Stream(EventStream),
}

/// Executes canonical requests against the provider fleet
pub struct ProviderPipeline {
    router: Arc<VirtualRouter>,
    registry: Arc<KeyRegistry>,
    providers: HashMap<String, Arc<dyn Provider>>,
    secrets: HashMap<String, SecretString>,
    /// `provider.model` pairs that must not be asked to stream
    non_streaming: HashSet<String>,
    max_retries: u32,
    idle_timeout: Duration,
}

impl ProviderPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        router: Arc<VirtualRouter>,
        registry: Arc<KeyRegistry>,
        providers: HashMap<String, Arc<dyn Provider>>,
        secrets: HashMap<String, SecretString>,
        non_streaming: HashSet<String>,
        max_retries: u32,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            router,
            registry,
            providers,
            secrets,
            non_streaming,
            max_retries,
            idle_timeout,
        }
    }

    /// Whether a previously chosen key is still eligible
    pub fn key_still_eligible(&self, key: &KeyId) -> bool {
        self.registry.is_eligible(key)
    }

    /// Execute with retries across distinct keys
    ///
    /// Stops immediately on non-retryable failures (auth, client error,
    /// protocol violation, switch failure). When retries are exhausted
    /// the last upstream error surfaces.
    pub async fn execute(
        &self,
        request: &CanonicalRequest,
        classification: &Classification,
        request_id: &str,
        want_upstream_stream: bool,
    ) -> Result<(RoutingDecision, UpstreamResult), GatewayError> {
        let mut excluded: Vec<KeyId> = Vec::new();
        let mut last_error: Option<GatewayError> = None;

        for attempt in 0..self.max_retries.max(1) {
            let decision = match self.router.select(classification, &excluded) {
                Ok(decision) => decision,
                // Pool exhausted mid-retry: the upstream error is more
                // useful to the client than "no healthy upstream"
                Err(e) => return Err(last_error.unwrap_or(e)),
            };

            if attempt > 0 {
                tracing::info!(
                    request_id,
                    attempt,
                    key = %decision.key,
                    "retrying with rotated credential"
                );
            }

            match self
                .call_with_decision(&decision, request, request_id, want_upstream_stream)
                .await
            {
                Ok(result) => return Ok((decision, result)),
                Err(e) => {
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    excluded.push(decision.key.clone());
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(GatewayError::NoHealthyUpstream {
            route: classification.route.clone(),
        }))
    }

    /// Execute one call under an existing decision, reporting the
    /// outcome to the pool
    ///
    /// Used directly by the tool-loop controller when resuming with the
    /// original decision; everything else goes through [`Self::execute`].
    pub async fn call_with_decision(
        &self,
        decision: &RoutingDecision,
        request: &CanonicalRequest,
        request_id: &str,
        want_upstream_stream: bool,
    ) -> Result<UpstreamResult, GatewayError> {
        let provider = self
            .providers
            .get(&decision.target.provider)
            .ok_or_else(|| GatewayError::NoHealthyUpstream {
                route: decision.route.clone(),
            })?;

        let secret = self
            .secrets
            .get(&decision.key.to_string())
            .ok_or_else(|| GatewayError::NoHealthyUpstream {
                route: decision.route.clone(),
            })?;

        // The pool targets a specific model; override whatever the
        // client named
        let mut upstream_request = request.clone();
        upstream_request.model.clone_from(&decision.target.model);

        // Models flagged non-streaming get a JSON call; the streaming
        // manager synthesizes SSE for the client from the JSON body
        let model_key = format!("{}.{}", decision.target.provider, decision.target.model);
        let want_upstream_stream = want_upstream_stream && !self.non_streaming.contains(&model_key);

        let outcome = if want_upstream_stream {
            provider
                .complete_stream(&upstream_request, secret, request_id)
                .await
                .map(|stream| UpstreamResult::Stream(self.instrument_stream(stream, &decision.key)))
        } else {
            provider
                .complete(&upstream_request, secret, request_id)
                .await
                .map(UpstreamResult::Json)
        };

        match &outcome {
            Ok(_) => self.registry.report_success(&decision.key),
            Err(e) => {
                if let Some(kind) = e.failure_kind() {
                    let retry_after = match e {
                        GatewayError::RateLimited { retry_after_ms } => *retry_after_ms,
                        _ => None,
                    };
                    self.registry.report_failure(&decision.key, kind, e.upstream_status(), retry_after);
                }
            }
        }

        outcome
    }

    /// Apply the idle timeout and report mid-stream failures to the pool
    ///
    /// Stream setup already counted as a success; a later read failure
    /// or idle timeout still cools the key down. Cancellation (client
    /// disconnect) just drops the stream and reports nothing.
    fn instrument_stream(&self, stream: EventStream, key: &KeyId) -> EventStream {
        let registry = Arc::clone(&self.registry);
        let key = key.clone();

        let timed = with_idle_timeout(stream, self.idle_timeout);
        Box::pin(timed.map(move |item| {
            if let Err(e) = &item
                && let Some(kind) = e.failure_kind()
            {
                registry.report_failure(&key, kind, e.upstream_status(), None);
            }
            item
        }))
    }
}
