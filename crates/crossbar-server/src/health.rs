use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::State;
use axum::response::IntoResponse;

/// Readiness flag shared with the health endpoint
///
/// Flips to ready once the credential stores have hydrated and the
/// router is assembled.
#[derive(Clone, Default)]
pub struct Readiness {
    ready: Arc<AtomicBool>,
}

impl Readiness {
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

/// Handle `GET /health`
pub async fn health_handler(State(readiness): State<Readiness>) -> impl IntoResponse {
    let status = if readiness.is_ready() { "ok" } else { "starting" };
    axum::Json(serde_json::json!({ "status": status }))
}
