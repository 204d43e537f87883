use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use shardgate_observability::HealthRegistry;
use shardgate_routing::{
    PartitionKeySelector, PartitionTarget, ServicePartitionClient, StaticPartitionTable,
};
use tokio_util::sync::CancellationToken;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::error::GatewayError;
use crate::forward::{InboundRequest, RequestForwarder};
use crate::route::GatewayOptions;

#[derive(Clone)]
pub struct GatewayState {
    pub options: Arc<GatewayOptions>,
    pub client: Arc<ServicePartitionClient>,
    pub forwarder: RequestForwarder,
    pub health: Arc<HealthRegistry>,
    pub max_payload_bytes: usize,
    pub shutdown: CancellationToken,
    /// Set when routing from the static table of the gateway file.
    pub topology: Option<Arc<StaticPartitionTable>>,
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/health", get(health))
        .fallback(proxy)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// One span per inbound request, carrying its `x-request-id` into every
/// retry and fault log raised while serving it.
fn request_span(request: &Request) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    tracing::info_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        request_id
    )
}

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn health(State(state): State<GatewayState>) -> Response {
    axum::Json(state.health.summary()).into_response()
}

async fn proxy(
    State(state): State<GatewayState>,
    request: Request,
) -> Result<Response, GatewayError> {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path();
    let (route, remainder) = state
        .options
        .match_route(path)
        .ok_or_else(|| GatewayError::NoRoute(path.to_string()))?;
    let key = match &route.key {
        PartitionKeySelector::Keyed(key_fn) => Some(
            key_fn(remainder).ok_or_else(|| GatewayError::MissingPartitionKey(path.to_string()))?,
        ),
        PartitionKeySelector::Singleton => None,
    };

    let body = match Limited::new(body, state.max_payload_bytes).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            return Err(GatewayError::PayloadTooLarge(state.max_payload_bytes));
        }
        Err(e) => return Err(GatewayError::InvalidBody(e.to_string())),
    };
    let inbound = InboundRequest {
        method: parts.method.clone(),
        remainder: remainder.to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers.clone(),
        body,
    };

    let target = PartitionTarget {
        service: &route.service,
        key,
        selector: route.selector,
    };
    let forwarder = state.forwarder;
    let response = state
        .client
        .invoke_with_retry(target, Some(&state.shutdown), |dispatcher| {
            forwarder.send(dispatcher, &inbound)
        })
        .await?;
    Ok(forwarder.relay(response))
}
