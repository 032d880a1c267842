//! Shared test harness: mock upstream + in-process gateway server

#![allow(dead_code)]

pub mod mock_provider;

use crossbar_config::Config;
use crossbar_server::Server;
use tokio_util::sync::CancellationToken;

pub use mock_provider::{MockOptions, MockProvider};

/// Gateway server bound to an OS-assigned port
pub struct TestGateway {
    base_url: String,
    shutdown: CancellationToken,
    client: reqwest::Client,
}

impl TestGateway {
    /// Start a gateway from a raw TOML config
    pub async fn start(config_toml: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(config_toml)?;
        let router = Server::new(config)?.into_router();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self {
            base_url: format!("http://{addr}"),
            shutdown,
            client: reqwest::Client::new(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// POST a JSON body
    pub async fn post(&self, path: &str, body: &serde_json::Value) -> anyhow::Result<reqwest::Response> {
        Ok(self.client.post(self.url(path)).json(body).send().await?)
    }

    /// GET a path
    pub async fn get(&self, path: &str) -> anyhow::Result<reqwest::Response> {
        Ok(self.client.get(self.url(path)).send().await?)
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Standard config: one chat provider with two keys behind `default`
pub fn chat_gateway_config(mock: &MockProvider) -> String {
    format!(
        r#"
        [providers.providerA]
        type = "chat"
        base_url = "{base}"

        [providers.providerA.auth.keys.key1]
        value = "sk-key1"

        [providers.providerA.auth.keys.key2]
        value = "sk-key2"
        priority = 1

        [providers.providerA.models."glm-4.6"]
        max_tokens = 131072

        [routing.pools]
        default = ["providerA.glm-4.6.key1", "providerA.glm-4.6.key2"]
        "#,
        base = mock.base_url()
    )
}

/// One parsed SSE frame
#[derive(Debug, Clone)]
pub struct SseRecord {
    pub event: Option<String>,
    pub data: String,
}

/// Parse an SSE body into frames
pub fn parse_sse(body: &str) -> Vec<SseRecord> {
    body.split("\n\n")
        .filter(|block| !block.trim().is_empty())
        .filter_map(|block| {
            let mut event = None;
            let mut data_lines = Vec::new();
            for line in block.lines() {
                if let Some(value) = line.strip_prefix("event:") {
                    event = Some(value.trim().to_owned());
                } else if let Some(value) = line.strip_prefix("data:") {
                    data_lines.push(value.trim().to_owned());
                }
            }
            if event.is_none() && data_lines.is_empty() {
                return None;
            }
            Some(SseRecord {
                event,
                data: data_lines.join("\n"),
            })
        })
        .collect()
}

/// Frames whose data parses as JSON
pub fn sse_json_frames(records: &[SseRecord]) -> Vec<serde_json::Value> {
    records
        .iter()
        .filter_map(|r| serde_json::from_str(&r.data).ok())
        .collect()
}
