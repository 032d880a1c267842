use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use secrecy::{ExposeSecret, SecretString};

/// Paths that never require the gateway API key
const PUBLIC_PATHS: &[&str] = &["/health"];

/// Authenticate callers against the configured gateway API key
///
/// Accepts `Authorization: Bearer <key>` or `x-api-key: <key>`. The 401
/// body matches the wire protocol of the endpoint being called.
pub async fn auth_middleware(expected: SecretString, request: Request, next: Next) -> Response {
    let path = request.uri().path();
    if PUBLIC_PATHS.contains(&path) {
        return next.run(request).await;
    }

    let presented = bearer_token(&request).or_else(|| x_api_key(&request));

    match presented {
        Some(token) if token == expected.expose_secret() => next.run(request).await,
        _ => {
            tracing::warn!(path, "rejecting request without valid gateway API key");
            unauthorized_response(path)
        }
    }
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn x_api_key(request: &Request) -> Option<&str> {
    request.headers().get("x-api-key").and_then(|v| v.to_str().ok())
}

/// 401 in the endpoint's wire-protocol error shape
fn unauthorized_response(path: &str) -> Response {
    let body = if path.starts_with("/v1/messages") {
        serde_json::json!({
            "type": "error",
            "error": {"type": "authentication_error", "message": "invalid API key"}
        })
    } else {
        serde_json::json!({
            "error": {"type": "authentication_error", "message": "invalid API key"}
        })
    };
    (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response()
}
