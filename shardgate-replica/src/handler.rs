use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Path, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use bytes::Bytes;
use http::{HeaderValue, StatusCode, header};
use shardgate_observability::{HealthRegistry, HealthReport, HealthReporter};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ServiceError;
use crate::record::UserInfo;
use crate::service::RecordService;

#[derive(Clone)]
pub struct ReplicaState {
    pub records: Arc<RecordService<UserInfo>>,
    pub health: Arc<HealthRegistry>,
    pub service_name: String,
    pub debug_headers: bool,
}

impl ReplicaState {
    /// Raises a health report for replica-side failures before they are
    /// returned to the caller.
    fn observe<T>(&self, result: Result<T, ServiceError>) -> Result<T, ServiceError> {
        if let Err(err) = &result {
            if err.is_internal() {
                self.health.report(HealthReport::error(
                    self.service_name.as_str(),
                    "record-service",
                    err.to_string(),
                ));
            }
        }
        result
    }
}

pub fn build_router(state: ReplicaState) -> Router {
    let record_path = format!("/{}/{{id}}", state.records.collection_name());
    Router::new()
        .route(
            &record_path,
            get(get_record)
                .post(create_record)
                .put(update_record)
                .delete(delete_record),
        )
        .route("/healthz", get(healthz))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), served_by))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn served_by(State(state): State<ReplicaState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if state.debug_headers {
        if let Ok(value) = HeaderValue::from_str(&state.service_name) {
            headers.insert("x-served-by", value);
        }
    }
    info!(
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request served"
    );
    response
}

fn parse_id(raw: &str) -> Result<i32, ServiceError> {
    raw.parse::<i32>()
        .map_err(|_| ServiceError::InvalidId(raw.to_string()))
}

fn parse_body(body: &Bytes) -> Result<UserInfo, ServiceError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ServiceError::MissingBody);
    }
    match serde_json::from_slice::<Option<UserInfo>>(body) {
        Ok(Some(record)) => Ok(record),
        Ok(None) => Err(ServiceError::MissingBody),
        Err(e) => Err(ServiceError::InvalidBody(e.to_string())),
    }
}

async fn get_record(
    State(state): State<ReplicaState>,
    Path(raw_id): Path<String>,
) -> Result<Json<UserInfo>, ServiceError> {
    let id = parse_id(&raw_id)?;
    let found = state.observe(state.records.get(id).await)?;
    found.map(Json).ok_or(ServiceError::NotFound(id))
}

async fn create_record(
    State(state): State<ReplicaState>,
    Path(raw_id): Path<String>,
    body: Bytes,
) -> Result<Response, ServiceError> {
    let id = parse_id(&raw_id)?;
    let mut record = parse_body(&body)?;
    record.id = id;
    if state.observe(state.records.create(id, record.clone()).await)? {
        Ok((StatusCode::CREATED, Json(record)).into_response())
    } else {
        Err(ServiceError::Conflict(id))
    }
}

async fn update_record(
    State(state): State<ReplicaState>,
    Path(raw_id): Path<String>,
    body: Bytes,
) -> Result<Json<UserInfo>, ServiceError> {
    let id = parse_id(&raw_id)?;
    let mut record = parse_body(&body)?;
    record.id = id;
    if state.observe(state.records.update(id, record.clone()).await)? {
        Ok(Json(record))
    } else {
        Err(ServiceError::NotFound(id))
    }
}

async fn delete_record(
    State(state): State<ReplicaState>,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, ServiceError> {
    let id = parse_id(&raw_id)?;
    if state.observe(state.records.delete(id).await)? {
        Ok(StatusCode::OK)
    } else {
        Err(ServiceError::NotFound(id))
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn health(State(state): State<ReplicaState>) -> Response {
    Json(state.health.summary()).into_response()
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "NOT FOUND")
}
