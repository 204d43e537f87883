use axum::response::IntoResponse;
use http::StatusCode;
use shardgate_routing::{RetryError, RoutingError};

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("No route matches path {0}")]
    NoRoute(String),
    #[error("No partition key in path {0}")]
    MissingPartitionKey(String),
    #[error("Payload exceeds {0} bytes")]
    PayloadTooLarge(usize),
    #[error("Invalid request body: {0}")]
    InvalidBody(String),
    #[error("Service unavailable: {0}")]
    Unavailable(RetryError),
    #[error("Request failed: {0}")]
    Fault(RetryError),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<RetryError> for GatewayError {
    fn from(value: RetryError) -> Self {
        if value.is_exhausted() {
            GatewayError::Unavailable(value)
        } else {
            GatewayError::Fault(value)
        }
    }
}

impl From<RoutingError> for GatewayError {
    fn from(value: RoutingError) -> Self {
        GatewayError::Config(value.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        use GatewayError::*;
        let (code, code_str) = match &self {
            NoRoute(_) => (StatusCode::NOT_FOUND, "NO_ROUTE"),
            MissingPartitionKey(_) => {
                (StatusCode::BAD_REQUEST, "MISSING_PARTITION_KEY")
            }
            PayloadTooLarge(_) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE")
            }
            InvalidBody(_) => (StatusCode::BAD_REQUEST, "INVALID_BODY"),
            Unavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE")
            }
            Fault(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_FAULT"),
            Config(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "CONFIGURATION_ERROR")
            }
        };
        let body = serde_json::json!({
            "error": { "code": code_str, "message": self.to_string() }
        });
        let mut resp = (code, body.to_string()).into_response();
        resp.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        resp
    }
}
