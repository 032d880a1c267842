use crossbar_core::HttpError;
use crossbar_pool::FailureKind;
use http::StatusCode;
use thiserror::Error;

/// Gateway error taxonomy
///
/// Every component boundary returns these; the HTTP layer translates
/// them into the client's wire-protocol error shape.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No eligible credential in any pool for the chosen route
    #[error("no healthy upstream for route '{route}'")]
    NoHealthyUpstream {
        /// Route whose pools were exhausted
        route: String,
    },

    /// Structural protocol-conversion failure; not retried
    #[error("protocol conversion failed: {0}")]
    SwitchFailed(String),

    /// Upstream returned 429
    #[error("upstream rate limited")]
    RateLimited {
        /// Parsed `Retry-After`, in milliseconds
        retry_after_ms: Option<u64>,
    },

    /// Upstream 5xx, network failure, or stream timeout
    #[error("upstream error: {0}")]
    ServerError(String),

    /// Upstream rejected the gateway's credential (401/403)
    #[error("upstream authentication failed: {0}")]
    AuthError(String),

    /// Upstream rejected the request itself; surfaced verbatim
    #[error("upstream rejected request with status {status}")]
    ClientError {
        /// Upstream HTTP status
        status: u16,
        /// Upstream body, forwarded to the client
        body: String,
    },

    /// Upstream success body failed to parse
    #[error("upstream protocol violation: {0}")]
    ProtocolViolation(String),

    /// Tool loop exceeded the configured round-trip cap
    #[error("tool loop exhausted")]
    ToolLoopExhausted,

    /// Unknown or expired responses session id
    #[error("unknown response id: {0}")]
    UnknownResponseId(String),

    /// Client went away; no response is written
    #[error("request canceled")]
    RequestCanceled,

    /// Malformed inbound request
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    /// Whether the retry controller should rotate to another key
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::ServerError(_))
    }

    /// Pool failure classification for this error, when one applies
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::RateLimited { .. } => Some(FailureKind::RateLimited),
            Self::ServerError(_) => Some(FailureKind::ServerError),
            Self::AuthError(_) => Some(FailureKind::AuthError),
            Self::ClientError { .. } => Some(FailureKind::ClientError),
            _ => None,
        }
    }

    /// Upstream status code associated with the failure, for pool records
    pub const fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::AuthError(_) => Some(401),
            Self::ClientError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl HttpError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NoHealthyUpstream { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::SwitchFailed(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ServerError(_) | Self::AuthError(_) | Self::ProtocolViolation(_) => StatusCode::BAD_GATEWAY,
            Self::ClientError { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
            }
            Self::ToolLoopExhausted => StatusCode::CONFLICT,
            Self::UnknownResponseId(_) => StatusCode::NOT_FOUND,
            // Never actually written; the connection is already gone
            Self::RequestCanceled => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::NoHealthyUpstream { .. } => "no_healthy_upstream",
            Self::SwitchFailed(_) => "switch_failed",
            Self::RateLimited { .. } => "rate_limit_error",
            Self::ServerError(_) => "upstream_error",
            Self::AuthError(_) => "upstream_auth_error",
            Self::ClientError { .. } => "invalid_request_error",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::ToolLoopExhausted => "tool_loop_exhausted",
            Self::UnknownResponseId(_) => "not_found_error",
            Self::RequestCanceled => "request_canceled",
            Self::InvalidRequest(_) => "invalid_request_error",
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::NoHealthyUpstream { .. } => {
                "no healthy upstream available; retry after a short delay".to_owned()
            }
            // Upstream 4xx bodies are the client's own problem, verbatim
            Self::ClientError { body, .. } => body.clone(),
            // Credential aliases and upstream details stay internal
            Self::AuthError(_) => "upstream authentication failed".to_owned(),
            Self::ServerError(_) => "upstream provider error".to_owned(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(GatewayError::RateLimited { retry_after_ms: None }.is_retryable());
        assert!(GatewayError::ServerError("boom".to_owned()).is_retryable());
        assert!(!GatewayError::AuthError("denied".to_owned()).is_retryable());
        assert!(!GatewayError::SwitchFailed("bad".to_owned()).is_retryable());
        assert!(!GatewayError::ProtocolViolation("bad json".to_owned()).is_retryable());
    }

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(
            GatewayError::NoHealthyUpstream { route: "default".to_owned() }.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(GatewayError::ToolLoopExhausted.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            GatewayError::ClientError {
                status: 422,
                body: String::new()
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn auth_error_message_hides_detail() {
        let e = GatewayError::AuthError("key alias key1 rejected".to_owned());
        assert!(!e.client_message().contains("key1"));
    }
}
