use std::net::SocketAddr;
use std::path::PathBuf;

use secrecy::SecretString;
use serde::Deserialize;

/// HTTP server configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to bind; defaults to 0.0.0.0:5520
    pub listen_address: Option<SocketAddr>,
    /// Gateway API key required from callers; absent means open access
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Upstream TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Abort a stream after this many seconds without bytes
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_secs: u64,
    /// Optional hard deadline applied to an entire request
    #[serde(default)]
    pub request_deadline_secs: Option<u64>,
    /// Directory for health/quota state files; state is not persisted
    /// when unset
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

const fn default_connect_timeout() -> u64 {
    10
}

const fn default_stream_idle_timeout() -> u64 {
    60
}
