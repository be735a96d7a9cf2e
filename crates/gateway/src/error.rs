//! Gateway error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::forwarder::ForwardError;
use crate::resolver::ResolveError;

/// Request-scoped failures surfaced to the caller
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Resolution failed: {0}")]
    Resolution(#[from] ResolveError),

    #[error("Forwarding failed: {0}")]
    Forwarding(#[from] ForwardError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        // Details stay in the logs, never in the body
        let (status, code, message) = match &self {
            GatewayError::Resolution(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "RESOLUTION_FAILED",
                "unexpected error",
            ),
            GatewayError::Forwarding(ForwardError::Timeout) => (
                StatusCode::GATEWAY_TIMEOUT,
                "UPSTREAM_TIMEOUT",
                "upstream timed out",
            ),
            GatewayError::Forwarding(_) => {
                (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", "upstream error")
            }
            GatewayError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", "invalid request")
            }
        };

        tracing::warn!(status = status.as_u16(), error = %self, "Request failed");

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type alias for dispatch handlers
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(err: GatewayError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_resolution_error_hides_detail() {
        let (status, body) =
            body_of(ResolveError::Status(503, "db down at 10.0.0.7".to_string()).into()).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "RESOLUTION_FAILED");
        assert!(!body.to_string().contains("10.0.0.7"));
    }

    #[tokio::test]
    async fn test_forwarding_errors() {
        let (status, _) = body_of(ForwardError::Timeout.into()).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);

        let (status, body) = body_of(ForwardError::Transport("refused".to_string()).into()).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "UPSTREAM_ERROR");
    }
}
