//! Merged configuration document for the crossbar gateway
//!
//! One TOML file binds the HTTP server, the provider/credential tables,
//! the route pools, and the classifier. Loaded once at startup, swapped
//! atomically on reload; in-flight requests keep their original `Arc`.

#![allow(clippy::must_use_candidate)]

pub mod classifier;
mod env;
mod loader;
pub mod pool;
pub mod provider;
pub mod routing;
pub mod server;

use indexmap::IndexMap;
use serde::Deserialize;

pub use classifier::{ClassifierConfig, ModelTier, RouteRule, ToolDetectorConfig};
pub use pool::PoolConfig;
pub use provider::{KeyConfig, ModelConfig, ProviderConfig, ProviderProtocol};
pub use routing::{ResolvedRoutes, RouteTarget, RoutingConfig};
pub use server::ServerConfig;

/// Top-level crossbar configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream provider configurations keyed by id
    #[serde(default)]
    pub providers: IndexMap<String, ProviderConfig>,
    /// Route pools: route name -> ordered `provider.model[.key]` targets
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Credential pool tuning (backoffs, penalties, persistence)
    #[serde(default)]
    pub pool: PoolConfig,
    /// Request classification configuration
    #[serde(default)]
    pub classifier: ClassifierConfig,
}
