use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;
use http::StatusCode;

/// Convert handler panics into a 500 with a protocol-shaped error body
///
/// The body shape follows the endpoint's wire protocol so clients can
/// parse it with their normal error path.
pub async fn catch_panic_middleware(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_owned();

    match std::panic::AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            tracing::error!(path, panic = %detail, "request handler panicked");

            let body = if path.starts_with("/v1/messages") {
                serde_json::json!({
                    "type": "error",
                    "error": {"type": "internal_error", "message": "internal server error"}
                })
            } else {
                serde_json::json!({
                    "error": {"type": "internal_error", "message": "internal server error"}
                })
            };
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response()
        }
    }
}
