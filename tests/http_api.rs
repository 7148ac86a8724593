mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header::CONTENT_TYPE},
};
use common::{FakeOrigin, eventually};
use edge_coherence::bus::EventBus;
use edge_coherence::cache::CacheStore;
use edge_coherence::coherence::Strategy;
use edge_coherence::infra::http::{EdgeState, REQUEST_ID_HEADER, build_router};
use edge_coherence::region::{Region, RegionConfig};
use serde_json::{Value, json};
use tower::ServiceExt;

struct App {
    router: Router,
    region: Region,
}

fn app(strategy: Strategy) -> App {
    let bus = EventBus::default();
    let origin = FakeOrigin::new(1);
    let config = RegionConfig {
        strategy,
        propagation_delay: std::time::Duration::ZERO,
        ..RegionConfig::named("us-east")
    };
    let region = Region::start(config, CacheStore::in_memory(), origin, &bus);
    let router = build_router(EdgeState::new(&region, bus));
    App { router, region }
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header(CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let request = builder.body(body).expect("request should build");

    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    send(router, Method::GET, uri, None).await
}

#[tokio::test]
async fn content_is_fetched_through_then_served_from_cache() {
    let app = app(Strategy::Lazy);

    let (status, body) = get(&app.router, "/api/content/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["source"], "origin");
    assert_eq!(body["status"], "fresh");
    assert_eq!(body["region"], "us-east");
    assert_eq!(body["data"]["slug"], "post-1");
    assert!(body.get("cached_at").is_none());

    let (status, body) = get(&app.router, "/api/content/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "cache");
    assert_eq!(body["status"], "fresh");
    assert!(body["cached_at"].as_str().is_some_and(|at| at.contains('T')));

    app.region.shutdown().await;
}

#[tokio::test]
async fn origin_failures_map_to_json_errors() {
    let app = app(Strategy::Lazy);

    let (status, body) = get(&app.router, "/api/content/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "success": false, "error": "Content not found" }));

    let (status, body) = get(&app.router, "/api/content/down").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "origin request timed out");

    app.region.shutdown().await;
}

#[tokio::test]
async fn content_list_passes_through_uncached() {
    let app = app(Strategy::Lazy);

    let (status, body) = get(&app.router, "/api/content").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["region"], "us-east");
    assert_eq!(body["data"].as_array().map(Vec::len), Some(2));
    assert_eq!(app.region.metrics().snapshot().total_requests, 0);

    app.region.shutdown().await;
}

#[tokio::test]
async fn health_reports_dependencies() {
    let app = app(Strategy::Lazy);

    let (status, body) = get(&app.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "status": "ok",
            "service": "edge",
            "region": "us-east",
            "cache": "connected",
            "origin": "healthy",
        })
    );

    app.region.shutdown().await;
}

#[tokio::test]
async fn metrics_endpoint_reports_snapshot() {
    let app = app(Strategy::Lazy);
    get(&app.router, "/api/content/1").await;
    get(&app.router, "/api/content/1").await;

    let (status, body) = get(&app.router, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalRequests"], 2);
    assert_eq!(body["cacheHits"], 1);
    assert_eq!(body["cacheMisses"], 1);
    assert_eq!(body["hitRatio"], 50.0);
    assert!(body["startTime"].is_string());

    app.region.shutdown().await;
}

#[tokio::test]
async fn posted_invalidations_reach_the_region() {
    let app = app(Strategy::Eager);
    get(&app.router, "/api/content/1").await;

    let (status, body) = send(
        &app.router,
        Method::POST,
        "/api/invalidations",
        Some(json!({ "type": "key", "target": "content:1", "version": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["success"], true);
    assert_eq!(body["topic"], "cache.invalidation");
    assert_eq!(body["receivers"], 1);
    assert_eq!(body["event"]["priority"], "HIGH");

    let store = app.region.store().clone();
    eventually("eager delete", || {
        let store = store.clone();
        async move { !store.exists("content:1").await.unwrap_or(true) }
    })
    .await;

    let (_, body) = get(&app.router, "/api/content/1").await;
    assert_eq!(body["source"], "origin");

    app.region.shutdown().await;
}

#[tokio::test]
async fn malformed_invalidations_are_rejected() {
    let app = app(Strategy::Lazy);

    let (status, body) = send(
        &app.router,
        Method::POST,
        "/api/invalidations",
        Some(json!({ "type": "key", "target": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "target must not be empty");

    let (status, body) = send(
        &app.router,
        Method::POST,
        "/api/invalidations",
        Some(json!({ "type": "region", "target": "content:1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    app.region.shutdown().await;
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = app(Strategy::Lazy);
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("request should build");

    let response = app
        .router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    let request_id = response
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .expect("request id header");
    assert_eq!(request_id.len(), 36);

    app.region.shutdown().await;
}
