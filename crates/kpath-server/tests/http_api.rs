//! HTTP API tests: authentication paths, status codes, and lifecycle
//! endpoints, driven through the router with `tower::ServiceExt`.

use std::collections::{BTreeMap, BTreeSet};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use tower::ServiceExt;

use kpath_core::Config;
use kpath_db::NewService;
use kpath_server::{Runtime, build_runtime, router};

struct TestApp {
    app: Router,
    runtime: Runtime,
    user_key: String,
    admin_key: String,
}

fn test_app(initialize: bool) -> (TestApp, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let config = Config {
        database_path: tmp.path().join("kpath.sqlite3"),
        snapshot_dir: tmp.path().join("snapshots"),
        embedding_dimension: 16,
        jwt_secret: Some("test-secret".to_owned()),
        ..Config::default()
    };
    let runtime = build_runtime(&config).unwrap();

    runtime
        .state
        .registry
        .create_service(&NewService::new(
            "calendar",
            "Schedule meetings on the corporate calendar",
        ))
        .unwrap();
    runtime
        .state
        .registry
        .create_service(&NewService::new("mailer", "Send email to recipients"))
        .unwrap();

    if initialize {
        runtime.initialize_index().unwrap();
    }

    let roles = |names: &[&str]| -> BTreeSet<String> {
        names.iter().map(|r| (*r).to_owned()).collect()
    };
    let (_record, user_key) = runtime
        .state
        .api_keys
        .create_key("agent-1", &roles(&["Engineering"]), &BTreeMap::new(), None)
        .unwrap();
    let (_record, admin_key) = runtime
        .state
        .api_keys
        .create_key("root", &roles(&["admin"]), &BTreeMap::new(), None)
        .unwrap();

    let app = router(runtime.state.clone());
    (
        TestApp {
            app,
            runtime,
            user_key,
            admin_key,
        },
        tmp,
    )
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn post_search(key: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/search/search")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    builder
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn missing_credential_is_401() {
    let (test, _tmp) = test_app(true);
    let (status, body) = send(
        &test.app,
        post_search(None, serde_json::json!({"query": "meetings"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "UNAUTHENTICATED");
    drop(test.runtime);
}

#[tokio::test]
async fn header_and_query_param_keys_are_equivalent() {
    let (test, _tmp) = test_app(true);

    let (status_header, by_header) = send(
        &test.app,
        post_search(Some(&test.user_key), serde_json::json!({"query": "meetings"})),
    )
    .await;
    assert_eq!(status_header, StatusCode::OK);

    let uri = format!(
        "/api/v1/search/search?query=meetings&api_key={}",
        test.user_key
    );
    let (status_query, by_query) = send(
        &test.app,
        Request::builder().uri(uri).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status_query, StatusCode::OK);

    // Identical modulo serve-time jitter
    assert_eq!(by_header["query"], by_query["query"]);
    assert_eq!(by_header["total_results"], by_query["total_results"]);
    assert_eq!(by_header["results"], by_query["results"]);
}

#[tokio::test]
async fn revoked_key_is_401() {
    let (test, _tmp) = test_app(true);
    let (record, secret) = test
        .runtime
        .state
        .api_keys
        .create_key("temp", &BTreeSet::new(), &BTreeMap::new(), None)
        .unwrap();

    let (ok_status, _) = send(
        &test.app,
        post_search(Some(&secret), serde_json::json!({"query": "meetings"})),
    )
    .await;
    assert_eq!(ok_status, StatusCode::OK);

    test.runtime.state.api_keys.revoke(record.id).unwrap();
    let (revoked_status, body) = send(
        &test.app,
        post_search(Some(&secret), serde_json::json!({"query": "meetings"})),
    )
    .await;
    assert_eq!(revoked_status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn bearer_jwt_authenticates() {
    let (test, _tmp) = test_app(true);
    let claims = kpath_server::auth::Claims {
        sub: "agent-jwt".to_owned(),
        exp: chrono::Utc::now().timestamp() + 3_600,
        roles: ["Engineering".to_owned()].into(),
        attrs: BTreeMap::new(),
    };
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(b"test-secret"),
    )
    .unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/search/search")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(
            serde_json::to_vec(&serde_json::json!({"query": "meetings"})).unwrap(),
        ))
        .unwrap();
    let (status, body) = send(&test.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["total_results"].as_u64().is_some());
}

#[tokio::test]
async fn garbage_bearer_is_401() {
    let (test, _tmp) = test_app(true);
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/search/search")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, "Bearer not.a.jwt")
        .body(Body::from(
            serde_json::to_vec(&serde_json::json!({"query": "meetings"})).unwrap(),
        ))
        .unwrap();
    let (status, _) = send(&test.app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn empty_query_is_400() {
    let (test, _tmp) = test_app(true);
    let (status, body) = send(
        &test.app,
        post_search(Some(&test.user_key), serde_json::json!({"query": "  "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_REQUEST");
}

#[tokio::test]
async fn out_of_range_limit_is_400() {
    let (test, _tmp) = test_app(true);
    let (status, _) = send(
        &test.app,
        post_search(
            Some(&test.user_key),
            serde_json::json!({"query": "meetings", "limit": 0}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn search_before_initialize_is_503_with_retry_after() {
    let (test, _tmp) = test_app(false);
    let response = test
        .app
        .clone()
        .oneshot(post_search(
            Some(&test.user_key),
            serde_json::json!({"query": "meetings"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        response.headers().get(header::RETRY_AFTER).unwrap(),
        "5"
    );
}

#[tokio::test]
async fn successful_search_returns_ranked_results() {
    let (test, _tmp) = test_app(true);
    let (status, body) = send(
        &test.app,
        post_search(
            Some(&test.user_key),
            serde_json::json!({"query": "schedule a meeting", "limit": 5}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_results"], 2);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["rank"], 1);
    assert_eq!(results[1]["rank"], 2);
    assert!(results[0]["score"].as_f64().unwrap() >= results[1]["score"].as_f64().unwrap());
    assert!(results[0]["service"]["name"].is_string());
    assert!(results[0]["distance"].as_f64().is_some());
}

#[tokio::test]
async fn status_reports_index_shape() {
    let (test, _tmp) = test_app(true);
    let uri = format!("/api/v1/search/status?api_key={}", test.user_key);
    let (status, body) = send(
        &test.app,
        Request::builder().uri(uri).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["initialized"], true);
    assert_eq!(body["index_built"], true);
    assert_eq!(body["total_vectors"], 2);
    assert_eq!(body["embedding_model"], "stub-embedder");
    assert!(body["snapshot_generation"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn rebuild_requires_admin() {
    let (test, _tmp) = test_app(true);

    let non_admin = Request::builder()
        .method("POST")
        .uri(format!(
            "/api/v1/search/rebuild?api_key={}",
            test.user_key
        ))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&test.app, non_admin).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "FORBIDDEN");

    let admin = Request::builder()
        .method("POST")
        .uri(format!(
            "/api/v1/search/rebuild?api_key={}",
            test.admin_key
        ))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&test.app, admin).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "started");
    assert!(body["job_id"].is_string());
}

#[tokio::test]
async fn initialize_endpoint_is_idempotent_once_ready() {
    let (test, _tmp) = test_app(true);
    let request = Request::builder()
        .method("POST")
        .uri(format!(
            "/api/v1/search/initialize?api_key={}",
            test.admin_key
        ))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&test.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "already_initialized");
}

#[tokio::test]
async fn initialize_endpoint_builds_deferred_index() {
    let (test, _tmp) = test_app(false);
    let request = Request::builder()
        .method("POST")
        .uri(format!(
            "/api/v1/search/initialize?api_key={}",
            test.admin_key
        ))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&test.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "initialized");

    let (status, _) = send(
        &test.app,
        post_search(Some(&test.user_key), serde_json::json!({"query": "meetings"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_selection_search_id_is_400() {
    let (test, _tmp) = test_app(true);
    let request = Request::builder()
        .method("POST")
        .uri(format!(
            "/api/v1/search/feedback?api_key={}",
            test.user_key
        ))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::to_vec(&serde_json::json!({
                "search_id": "ghost",
                "service_id": 1,
                "position": 1
            }))
            .unwrap(),
        ))
        .unwrap();
    let (status, body) = send(&test.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_REQUEST");
}

#[tokio::test]
async fn health_needs_no_credential() {
    let (test, _tmp) = test_app(true);
    let (status, body) = send(
        &test.app,
        Request::builder()
            .uri("/api/v1/health")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
