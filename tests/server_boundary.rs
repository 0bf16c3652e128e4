//! HTTP boundary tests: the axum router funnels every request into the
//! pipeline, and the request watchdog bounds latency even when the pipeline
//! is stuck upstream.

mod common;

use std::time::Duration;

use axum::body::Body;
use common::*;
use http::Request;
use portico::server::{build_router, TIMEOUT_HEADER};
use serde_json::json;
use tower::util::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test(flavor = "multi_thread")]
async fn router_dispatches_any_path_to_the_pipeline() {
    let harness = harness(json!({})).await;
    mount_environment(&harness.config_repo, "default", json!({})).await;
    mount_tenant(
        &harness.config_repo,
        "default",
        "default",
        json!({"routes": {"r1": {"function": {"name": "echo", "version": "v1"}}}}),
    )
    .await;
    mount_artifact(&harness.code_repo, "echo", "v1", &echo_function()).await;

    let router = build_router(&harness.global.config, harness.pipeline.clone());
    let response = router
        .oneshot(Request::builder().method("POST").uri("/r1").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"echo");
}

#[tokio::test(flavor = "multi_thread")]
async fn watchdog_expiry_yields_gateway_timeout() {
    let harness = harness(json!({"config": {"request_timeout_seconds": 1}})).await;
    mount_environment(&harness.config_repo, "default", json!({})).await;
    mount_tenant(
        &harness.config_repo,
        "default",
        "default",
        json!({"routes": {"r1": {"function": {"name": "slow", "version": "1"}}}}),
    )
    .await;
    // The artifact fetch itself stalls past the watchdog deadline.
    Mock::given(method("GET"))
        .and(path("/slow-1.wasm"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(5))
                .set_body_bytes(wat::parse_str(&echo_function()).unwrap()),
        )
        .mount(&harness.code_repo)
        .await;

    let router = build_router(&harness.global.config, harness.pipeline.clone());
    let started = std::time::Instant::now();
    let response = router
        .oneshot(Request::builder().uri("/r1").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), 504);
    assert_eq!(response.headers().get(TIMEOUT_HEADER).unwrap(), "1");
    assert!(started.elapsed() < Duration::from_secs(4));
}
