use std::collections::HashMap;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use envconfig::Envconfig;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use shardgate_replica::{Config, ReplicaState, build_router};
use tower::util::ServiceExt;
use tracing_test::traced_test;

fn replica(debug_headers: bool) -> (Router, ReplicaState) {
    let mut config = Config::init_from_hashmap(&HashMap::new()).unwrap();
    config.service_name = "fabric:/App/WebService".to_string();
    config.debug_headers = debug_headers;
    let state = ReplicaState::from_config(&config).unwrap();
    (build_router(state.clone()), state)
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, axum::http::HeaderMap, Value) {
    let body = match body {
        Some(v) => Body::from(v.to_string()),
        None => Body::empty(),
    };
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();
    let status = res.status();
    let headers = res.headers().clone();
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, value)
}

#[tokio::test]
async fn create_then_get_round_trip() {
    let (app, _) = replica(false);
    let (status, _, created) = call(
        &app,
        "POST",
        "/users/12",
        Some(json!({"Id": 99, "FirstName": "Grace", "LastName": "Hopper"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["id"], 12);

    let (status, headers, fetched) = call(&app, "GET", "/users/12", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], 12);
    assert_eq!(fetched["firstName"], "Grace");
    assert_eq!(fetched["lastName"], "Hopper");
    assert_eq!(headers["cache-control"], "no-cache");
    assert!(headers.get("x-served-by").is_none());
}

#[tokio::test]
async fn duplicate_create_conflicts() {
    let (app, _) = replica(false);
    call(&app, "POST", "/users/1", Some(json!({"firstName": "a"}))).await;
    let (status, _, err) = call(&app, "POST", "/users/1", Some(json!({"firstName": "b"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"]["code"], "CONFLICT");

    let (_, _, fetched) = call(&app, "GET", "/users/1", None).await;
    assert_eq!(fetched["firstName"], "a");
}

#[tokio::test]
async fn missing_records_are_not_found() {
    let (app, _) = replica(false);
    let (status, _, _) = call(&app, "GET", "/users/404", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = call(&app, "PUT", "/users/404", Some(json!({"firstName": "x"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = call(&app, "DELETE", "/users/404", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // update on a missing id must not create it
    let (status, _, _) = call(&app, "GET", "/users/404", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_and_delete_existing() {
    let (app, _) = replica(false);
    call(&app, "POST", "/users/2", Some(json!({"firstName": "old"}))).await;

    let (status, _, updated) =
        call(&app, "PUT", "/users/2", Some(json!({"firstName": "new"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["firstName"], "new");

    let (status, _, _) = call(&app, "DELETE", "/users/2", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = call(&app, "GET", "/users/2", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bad_input_is_rejected() {
    let (app, _) = replica(false);
    let (status, _, err) = call(&app, "POST", "/users/3", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"]["code"], "MISSING_BODY");

    let (status, _, _) = call(&app, "PUT", "/users/3", Some(Value::Null)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, err) = call(&app, "POST", "/users/3", Some(json!({"firstName": 5}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"]["code"], "INVALID_BODY");

    let (status, _, err) = call(&app, "GET", "/users/abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"]["code"], "INVALID_ID");
}

#[tokio::test]
#[traced_test]
async fn debug_headers_and_request_log() {
    let (app, _) = replica(true);
    let (_, headers, _) = call(&app, "GET", "/users/8", None).await;
    assert_eq!(headers["x-served-by"], "fabric:/App/WebService");
    assert_eq!(headers["cache-control"], "no-cache");
    assert!(logs_contain("request served"));
    assert!(logs_contain("/users/8"));
}

#[tokio::test]
async fn health_endpoints() {
    let (app, _) = replica(false);
    let res = app
        .clone()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let (status, _, summary) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["status"], "Ok");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_operations_on_disjoint_ids() {
    let (app, state) = replica(false);
    let mut tasks = Vec::new();
    for id in 0..24 {
        let app = app.clone();
        tasks.push(tokio::spawn(async move {
            let uri = format!("/users/{id}");
            let (status, _, _) = call(
                &app,
                "POST",
                &uri,
                Some(json!({"firstName": format!("user-{id}")})),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
            let (status, _, _) = call(
                &app,
                "PUT",
                &uri,
                Some(json!({"lastName": format!("last-{id}")})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            if id % 2 == 0 {
                let (status, _, _) = call(&app, "DELETE", &uri, None).await;
                assert_eq!(status, StatusCode::OK);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    for id in 0..24 {
        let found = state.records.get(id).await.unwrap();
        if id % 2 == 0 {
            assert!(found.is_none());
        } else {
            let user = found.unwrap();
            assert_eq!(user.id, id);
            assert_eq!(user.last_name, Some(format!("last-{id}")));
            // a full replacement drops fields not sent
            assert_eq!(user.first_name, None);
        }
    }
}
