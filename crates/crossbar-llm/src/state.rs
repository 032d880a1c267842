//! Shared gateway state
//!
//! The per-config core (classifier, router, provider clients, credential
//! registry view) lives behind an atomically swappable handle: a reload
//! builds a fresh core and swaps it in one write, while in-flight
//! requests keep the `Arc` they snapshotted at dispatch. Request-id
//! issuance and the responses session table outlive reloads.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crossbar_classify::{Classification, Classifier, ClassifyInput, ToolSignal};
use crossbar_config::Config;
use crossbar_core::RequestIdSource;
use crossbar_pool::KeyRegistry;

use crate::pipeline::ProviderPipeline;
use crate::provider::{Provider, build_provider};
use crate::router::VirtualRouter;
use crate::sessions::{SESSION_TTL, SessionStore};
use crate::types::CanonicalRequest;

/// Handle to the gateway's shared state
#[derive(Clone)]
pub struct GatewayState {
    core: Arc<RwLock<Arc<GatewayCore>>>,
    sessions: Arc<SessionStore>,
    ids: Arc<RequestIdSource>,
}

/// Everything derived from one config bind
pub struct GatewayCore {
    classifier: Classifier,
    pipeline: ProviderPipeline,
    /// (provider id, model id) pairs for the models listing
    pub(crate) models: Vec<(String, String)>,
    pub(crate) request_deadline: Option<Duration>,
}

impl GatewayState {
    /// Assemble gateway state from a config and a seeded registry
    ///
    /// # Errors
    ///
    /// Returns an error when route validation fails.
    pub fn new(config: &Config, registry: Arc<KeyRegistry>) -> anyhow::Result<Self> {
        let core = GatewayCore::build(config, registry)?;

        let sessions = Arc::new(SessionStore::new(SESSION_TTL, config.routing.max_tool_loops));
        SessionStore::spawn_sweeper(&sessions);

        Ok(Self {
            core: Arc::new(RwLock::new(Arc::new(core))),
            sessions,
            ids: Arc::new(RequestIdSource::new()),
        })
    }

    /// Swap in a new core built from a reloaded config
    ///
    /// In-flight requests keep the core they already snapshotted; parked
    /// tool-loop sessions survive and re-route if their key is gone.
    ///
    /// # Errors
    ///
    /// Returns an error when the new config fails validation; the
    /// previous core stays live in that case.
    pub fn reload(&self, config: &Config, registry: Arc<KeyRegistry>) -> anyhow::Result<()> {
        let core = GatewayCore::build(config, registry)?;
        *self.core.write().expect("state lock poisoned") = Arc::new(core);
        Ok(())
    }

    /// Snapshot the current core; held for the duration of one request
    pub(crate) fn core(&self) -> Arc<GatewayCore> {
        self.core.read().expect("state lock poisoned").clone()
    }

    /// Issue a request id
    pub fn next_request_id(&self) -> String {
        self.ids.next_id()
    }

    /// Responses tool-loop session table
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }
}

impl GatewayCore {
    fn build(config: &Config, registry: Arc<KeyRegistry>) -> anyhow::Result<Self> {
        let routes = config.validate()?;

        let connect_timeout = Duration::from_secs(config.server.connect_timeout_secs);
        let idle_timeout = Duration::from_secs(config.server.stream_idle_timeout_secs);

        let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        let mut secrets = HashMap::new();
        let mut non_streaming = HashSet::new();
        let mut models = Vec::new();

        for (name, provider_config) in &config.providers {
            providers.insert(
                name.clone(),
                Arc::from(build_provider(name, provider_config, connect_timeout)),
            );
            for (alias, key) in &provider_config.auth.keys {
                secrets.insert(format!("{name}.{alias}"), key.value.clone());
            }
            for (model, model_config) in &provider_config.models {
                if !model_config.supports_streaming {
                    non_streaming.insert(format!("{name}.{model}"));
                }
                models.push((name.clone(), model.clone()));
            }
        }

        let router = Arc::new(VirtualRouter::new(routes, Arc::clone(&registry)));
        let pipeline = ProviderPipeline::new(
            router,
            registry,
            providers,
            secrets,
            non_streaming,
            config.routing.max_retries_per_route,
            idle_timeout,
        );

        Ok(Self {
            classifier: Classifier::new(config.classifier.clone()),
            pipeline,
            models,
            request_deadline: config.server.request_deadline_secs.map(Duration::from_secs),
        })
    }

    /// Classify a canonical request
    pub(crate) fn classify(&self, request: &CanonicalRequest) -> Classification {
        self.classifier.classify(&classify_input(request))
    }

    /// Pipeline executing upstream calls
    pub(crate) fn pipeline(&self) -> &ProviderPipeline {
        &self.pipeline
    }
}

/// Extract the classifier's view from a canonical request
fn classify_input(request: &CanonicalRequest) -> ClassifyInput {
    // Non-text parts count into the token estimate by serialized size
    let structured_bytes = request
        .messages
        .iter()
        .filter_map(|m| match &m.content {
            crate::types::Content::Parts(parts) => Some(
                parts
                    .iter()
                    .filter(|p| !matches!(p, crate::types::ContentPart::Text { .. }))
                    .map(|p| serde_json::to_string(p).map_or(0, |s| s.len()))
                    .sum::<usize>(),
            ),
            crate::types::Content::Text(_) => None,
        })
        .sum();

    ClassifyInput {
        user_text: request.user_text_concat(),
        instructions_text: request.instructions.clone().unwrap_or_default(),
        tools: request
            .tools
            .iter()
            .map(|t| ToolSignal {
                name: t.name.clone(),
                description: t.description.clone(),
            })
            .collect(),
        model: request.model.clone(),
        has_image_parts: request.has_image_parts(),
        structured_bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Content, ContentPart, Message, Role};

    #[test]
    fn classify_input_extraction() {
        let mut request = CanonicalRequest::user_text("glm-4.6", "hello");
        request.instructions = Some("be brief".to_owned());
        request.messages.push(Message {
            role: Role::User,
            content: Content::Parts(vec![ContentPart::Image {
                url: "data:image/png;base64,QUJD".to_owned(),
                detail: None,
            }]),
            tool_calls: None,
            tool_call_id: None,
        });

        let input = classify_input(&request);
        assert_eq!(input.user_text, "hello\n");
        assert_eq!(input.instructions_text, "be brief");
        assert!(input.has_image_parts);
        assert!(input.structured_bytes > 0);
    }

    #[tokio::test]
    async fn reload_swaps_core() {
        let config: Config = toml::from_str(
            r#"
            [providers.providerA]
            type = "chat"
            base_url = "https://a.example/v1"
            [providers.providerA.auth.keys.key1]
            value = "sk-1"
            [providers.providerA.models.m1]
            [routing.pools]
            default = ["providerA.m1"]
            "#,
        )
        .unwrap();

        let registry = Arc::new(KeyRegistry::from_config(&config));
        let state = GatewayState::new(&config, Arc::clone(&registry)).unwrap();
        assert_eq!(state.core().models.len(), 1);

        let reloaded: Config = toml::from_str(
            r#"
            [providers.providerA]
            type = "chat"
            base_url = "https://a.example/v1"
            [providers.providerA.auth.keys.key1]
            value = "sk-1"
            [providers.providerA.models.m1]
            [providers.providerA.models.m2]
            [routing.pools]
            default = ["providerA.m1", "providerA.m2"]
            "#,
        )
        .unwrap();
        let new_registry = Arc::new(KeyRegistry::from_config(&reloaded));
        state.reload(&reloaded, new_registry).unwrap();
        assert_eq!(state.core().models.len(), 2);
    }
}
