//! Server assembly for the crossbar gateway
//!
//! Builds the credential registry (with optional state-dir hydration),
//! the gateway state, and the axum router with its middleware stack;
//! serves with graceful shutdown and supports atomic config reload.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc, clippy::missing_panics_doc)]

mod auth;
mod envelope;
mod health;
mod panic;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use crossbar_config::Config;
use crossbar_llm::GatewayState;
use crossbar_pool::{HealthJournal, KeyRegistry, persist};
use tower_http::trace::TraceLayer;

pub use health::Readiness;

/// Assembled server with all routes and middleware
pub struct Server {
    router: Router,
    listen_address: SocketAddr,
    state: GatewayState,
    readiness: Readiness,
}

impl Server {
    /// Build the server from configuration
    ///
    /// # Errors
    ///
    /// Returns an error when config validation fails or the state
    /// directory cannot be prepared
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let listen_address = config
            .server
            .listen_address
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 5520)));

        let registry = build_registry(&config)?;
        let state = GatewayState::new(&config, registry)?;
        let readiness = Readiness::default();

        let mut app = Router::new()
            .route("/health", axum::routing::get(health::health_handler).with_state(readiness.clone()))
            .merge(crossbar_llm::gateway_router(state.clone()));

        // Innermost first: envelope (request id), then tracing, auth,
        // and the panic fence outermost
        let envelope_state = state.clone();
        app = app.layer(axum::middleware::from_fn(move |req, next| {
            let state = envelope_state.clone();
            async move { envelope::envelope_middleware(state, req, next).await }
        }));

        app = app.layer(TraceLayer::new_for_http());

        if let Some(api_key) = config.server.api_key.clone() {
            app = app.layer(axum::middleware::from_fn(move |req, next| {
                let expected = api_key.clone();
                async move { auth::auth_middleware(expected, req, next).await }
            }));
        }

        app = app.layer(axum::middleware::from_fn(panic::catch_panic_middleware));

        readiness.mark_ready();

        Ok(Self {
            router: app,
            listen_address,
            state,
            readiness,
        })
    }

    /// Configured listen address
    pub const fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// Readiness flag backing `/health`
    pub fn readiness(&self) -> Readiness {
        self.readiness.clone()
    }

    /// Consume the server and return the inner router
    ///
    /// Useful for tests that manage their own listener.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Swap in a reloaded configuration
    ///
    /// Rebuilds the registry and gateway core; in-flight requests keep
    /// the core they started with. On validation failure the previous
    /// configuration stays live and the error is returned.
    pub fn reload(&self, config: &Config) -> anyhow::Result<()> {
        self.reload_handle().reload(config)
    }

    /// Handle for reloading after the server has been consumed by
    /// [`Self::serve`]
    pub fn reload_handle(&self) -> ReloadHandle {
        ReloadHandle {
            state: self.state.clone(),
        }
    }

    /// Serve until the cancellation token fires
    ///
    /// # Errors
    ///
    /// Returns an error if binding the listener or serving fails
    pub async fn serve(self, shutdown: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_address).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "crossbar listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("graceful shutdown initiated");
            })
            .await?;

        Ok(())
    }
}

/// Reloads configuration into a running server
#[derive(Clone)]
pub struct ReloadHandle {
    state: GatewayState,
}

impl ReloadHandle {
    /// Rebuild registry and gateway core from `config` and swap them in
    ///
    /// # Errors
    ///
    /// Returns an error when the new config fails validation; the
    /// previous configuration stays live.
    pub fn reload(&self, config: &Config) -> anyhow::Result<()> {
        let registry = build_registry(config)?;
        self.state.reload(config, registry)?;
        tracing::info!("configuration reloaded");
        Ok(())
    }
}

/// Seed the credential registry, hydrating from the state directory and
/// attaching write-through persistence when one is configured
fn build_registry(config: &Config) -> anyhow::Result<Arc<KeyRegistry>> {
    let mut registry = KeyRegistry::from_config(config);

    if let Some(state_dir) = &config.server.state_dir {
        let persisted = persist::load_state(state_dir);
        if !persisted.is_empty() {
            tracing::info!(
                state_dir = %state_dir.display(),
                records = persisted.len(),
                "hydrating credential state"
            );
            registry.hydrate(persisted);
        }

        let handle = HealthJournal::spawn(state_dir, config.pool.health_compaction_threshold)
            .map_err(|e| anyhow::anyhow!("failed to prepare state directory {}: {e}", state_dir.display()))?;
        registry.set_persistence(handle);
    }

    Ok(Arc::new(registry))
}
