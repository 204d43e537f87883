use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, Uri};
use axum::response::Response;
use bytes::Bytes;
use envconfig::Envconfig;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use shardgate_gateway::{
    Config, GatewayFile, GatewayOptions, GatewayState, RouteOption, build_router,
};
use shardgate_observability::HealthState;
use shardgate_routing::{
    Endpoint, EndpointSet, KeyRange, KeyStrategy, PartitionKey, PartitionSource, ResolutionError,
    TargetReplicaSelector,
};
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;
use tracing_test::traced_test;

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let seen: HashMap<String, String> = headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();
    let payload = json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "headers": seen,
        "body": String::from_utf8_lossy(&body),
    });
    // a streamed body makes the backend answer with chunked encoding
    let chunks = vec![Ok::<_, Infallible>(Bytes::from(payload.to_string()))];
    Response::builder()
        .header("content-type", "application/json")
        .header("x-multi", "a")
        .header("x-multi", "b")
        .body(Body::from_stream(futures_util::stream::iter(chunks)))
        .unwrap()
}

async fn spawn_backend() -> String {
    let app = Router::new()
        .fallback(echo)
        .route(
            "/busy/{id}",
            axum::routing::any(|| async {
                (StatusCode::SERVICE_UNAVAILABLE, "not primary")
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn closed_address() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

fn config(retry_attempts: u32) -> Config {
    let mut config = Config::init_from_hashmap(&HashMap::new()).unwrap();
    config.retry_attempts = retry_attempts;
    config.retry_backoff_ms = 1;
    config.max_payload_bytes = 1024;
    config
}

fn gateway_file(address: &str) -> GatewayFile {
    serde_json::from_value(json!({
        "routes": [{
            "path": "/api/webservice",
            "serviceUri": "fabric:/App/WebService"
        }],
        "topology": {
            "fabric:/App/WebService": {
                "scheme": {"kind": "uniform-range", "partitionCount": 1},
                "partitions": [{"endpoints": [{"address": address}]}]
            }
        }
    }))
    .unwrap()
}

fn gateway_for(address: &str, retry_attempts: u32) -> Router {
    let config = config(retry_attempts);
    let state =
        GatewayState::from_file(&config, gateway_file(address), CancellationToken::new()).unwrap();
    build_router(state)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let res = app.clone().oneshot(request).await.unwrap();
    let status = res.status();
    let headers = res.headers().clone();
    let body = res.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body)
}

#[tokio::test]
async fn get_is_forwarded_with_host_rewritten() {
    let backend = spawn_backend().await;
    let app = gateway_for(&backend, 3);

    let (status, headers, body) = send(
        &app,
        Request::builder()
            .uri("/api/webservice/users/42?verbose=1")
            .header("host", "gateway.example")
            .header("x-custom", "kept")
            .header("content-type", "text/plain")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(headers.get("transfer-encoding").is_none());
    assert_eq!(headers.get_all("x-multi").iter().count(), 2);

    let seen: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(seen["method"], "GET");
    assert_eq!(seen["path"], "/users/42");
    assert_eq!(seen["query"], "verbose=1");
    assert_eq!(seen["headers"]["host"], backend.trim_start_matches("http://"));
    assert_eq!(seen["headers"]["x-custom"], "kept");
    // content headers only travel with a body
    assert!(seen["headers"].get("content-type").is_none());
    // a request id is minted, forwarded and echoed back
    let request_id = headers["x-request-id"].to_str().unwrap();
    assert!(!request_id.is_empty());
    assert_eq!(seen["headers"]["x-request-id"], request_id);
}

#[tokio::test]
async fn post_body_and_content_headers_are_forwarded() {
    let backend = spawn_backend().await;
    let app = gateway_for(&backend, 3);

    let (status, _, body) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/api/webservice/users/7")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"firstName":"Ada"}"#))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let seen: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(seen["method"], "POST");
    assert_eq!(seen["body"], r#"{"firstName":"Ada"}"#);
    assert_eq!(seen["headers"]["content-type"], "application/json");
    assert_eq!(seen["headers"]["content-length"], "19");
}

#[tokio::test]
async fn delete_drops_body() {
    let backend = spawn_backend().await;
    let app = gateway_for(&backend, 3);

    let (status, _, body) = send(
        &app,
        Request::builder()
            .method("DELETE")
            .uri("/api/webservice/users/7")
            .header("content-type", "application/json")
            .body(Body::from("ignored"))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let seen: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(seen["method"], "DELETE");
    assert_eq!(seen["body"], "");
    assert!(seen["headers"].get("content-type").is_none());
}

#[tokio::test]
async fn unmatched_path_is_not_found() {
    let app = gateway_for("http://127.0.0.1:1", 1);
    let (status, _, body) = send(
        &app,
        Request::builder().uri("/elsewhere/1").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let err: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(err["error"]["code"], "NO_ROUTE");
}

#[tokio::test]
async fn missing_key_token_is_bad_request() {
    let app = gateway_for("http://127.0.0.1:1", 1);
    let (status, _, body) = send(
        &app,
        Request::builder()
            .uri("/api/webservice/")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let err: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(err["error"]["code"], "MISSING_PARTITION_KEY");
}

#[tokio::test]
async fn oversized_payload_is_rejected() {
    let app = gateway_for("http://127.0.0.1:1", 1);
    let (status, _, _) = send(
        &app,
        Request::builder()
            .method("PUT")
            .uri("/api/webservice/users/1")
            .body(Body::from(vec![b'x'; 2048]))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn unreachable_replica_exhausts_to_service_unavailable() {
    let dead = closed_address().await;
    let app = gateway_for(&dead, 2);
    let (status, _, body) = send(
        &app,
        Request::builder()
            .uri("/api/webservice/users/1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let err: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(err["error"]["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn replica_busy_status_is_retried_then_unavailable() {
    let backend = spawn_backend().await;
    let app = gateway_for(&backend, 2);
    let (status, _, _) = send(
        &app,
        Request::builder()
            .uri("/api/webservice/busy/1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

/// First fetch points at a dead address, every later one at `live`.
struct MovingPartition {
    dead: String,
    live: String,
    calls: AtomicU32,
}

#[async_trait]
impl PartitionSource for MovingPartition {
    async fn fetch(
        &self,
        _service: &str,
        _key: Option<PartitionKey>,
    ) -> Result<EndpointSet, ResolutionError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let address = if n == 0 { &self.dead } else { &self.live };
        Ok(EndpointSet {
            endpoints: vec![Endpoint::primary(address.clone())],
            generation: u64::from(n),
            range: KeyRange::FULL,
        })
    }
}

#[tokio::test]
async fn moved_partition_is_followed_after_invalidation() {
    let source = Arc::new(MovingPartition {
        dead: closed_address().await,
        live: spawn_backend().await,
        calls: AtomicU32::new(0),
    });
    let options = GatewayOptions::new(vec![RouteOption::new(
        "/api/webservice",
        "svc",
        KeyStrategy::LastSegmentFnv.selector(),
        TargetReplicaSelector::Default,
    )])
    .unwrap();
    let state = GatewayState::new(&config(3), options, source.clone(), CancellationToken::new());
    let health = state.health.clone();
    let app = build_router(state);

    let (status, _, body) = send(
        &app,
        Request::builder()
            .uri("/api/webservice/users/5")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let seen: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(seen["path"], "/users/5");
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    assert_eq!(health.overall_state(), HealthState::Ok);
}

#[tokio::test]
async fn unknown_service_is_fatal_and_reported() {
    let options = GatewayOptions::new(vec![RouteOption::new(
        "/api/other",
        "not-in-topology",
        KeyStrategy::Singleton.selector(),
        TargetReplicaSelector::Default,
    )])
    .unwrap();
    let table = shardgate_routing::StaticPartitionTable::from_topology(Default::default()).unwrap();
    let mut config = config(3);
    config.service_name = "fabric:/App/Gateway".to_string();
    let state = GatewayState::new(&config, options, Arc::new(table), CancellationToken::new());
    let app = build_router(state);

    let (status, _, body) = send(
        &app,
        Request::builder().uri("/api/other/x").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let err: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(err["error"]["code"], "INTERNAL_FAULT");

    let (status, _, body) = send(
        &app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let summary: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(summary["status"], "Error");
    assert_eq!(summary["errors_total"], 1);
    // reported under the gateway's own identity, naming the routed service
    assert_eq!(summary["reports"][0]["service"], "fabric:/App/Gateway");
    assert_eq!(summary["reports"][0]["source"], "not-in-topology");
}

#[tokio::test]
async fn healthz_is_ok() {
    let app = gateway_for("http://127.0.0.1:1", 1);
    let (status, _, body) = send(
        &app,
        Request::builder().uri("/healthz").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
#[traced_test]
async fn caller_request_id_tags_retry_logs() {
    let dead = closed_address().await;
    let app = gateway_for(&dead, 2);
    let (status, headers, _) = send(
        &app,
        Request::builder()
            .uri("/api/webservice/users/1")
            .header("x-request-id", "req-7f3a")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(headers["x-request-id"], "req-7f3a");
    assert!(logs_contain("transient fault"));
    assert!(logs_contain("req-7f3a"));
}

#[tokio::test]
async fn reloaded_topology_is_followed_after_failure() {
    let dead = closed_address().await;
    let live = spawn_backend().await;
    let state =
        GatewayState::from_file(&config(2), gateway_file(&dead), CancellationToken::new()).unwrap();
    let table = state.topology.clone().unwrap();
    let app = build_router(state);

    let (status, _, _) = send(&app, get("/api/webservice/users/3")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let moved = table.apply_topology(gateway_file(&live).topology).await.unwrap();
    assert_eq!(moved, 1);
    let (status, _, body) = send(&app, get("/api/webservice/users/3")).await;
    assert_eq!(status, StatusCode::OK);
    let seen: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(seen["path"], "/users/3");
}
