use axum::response::IntoResponse;
use http::StatusCode;
use shardgate_store::StorageError;

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("Record {0} not found")]
    NotFound(i32),
    #[error("Record {0} already exists")]
    Conflict(i32),
    #[error("Invalid record id: {0}")]
    InvalidId(String),
    #[error("Request body is required")]
    MissingBody,
    #[error("Invalid request body: {0}")]
    InvalidBody(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ServiceError {
    /// Failures that are the replica's fault rather than the caller's.
    pub fn is_internal(&self) -> bool {
        matches!(self, ServiceError::Storage(e) if !e.is_transient())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> axum::response::Response {
        use ServiceError::*;
        let (code, code_str) = match &self {
            NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            InvalidId(_) => (StatusCode::BAD_REQUEST, "INVALID_ID"),
            MissingBody => (StatusCode::BAD_REQUEST, "MISSING_BODY"),
            InvalidBody(_) => (StatusCode::BAD_REQUEST, "INVALID_BODY"),
            Storage(StorageError::LockTimeout(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "LOCK_TIMEOUT")
            }
            Storage(StorageError::LockConflict(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "LOCK_CONFLICT")
            }
            Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
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
