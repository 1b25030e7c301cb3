// SPDX-License-Identifier: Apache-2.0

use serde_json::{json, Value};
use std::sync::atomic::Ordering;

#[path = "support/mod.rs"]
mod support;

use support::{
    error_code, get_json, register, request, spawn_app, spawn_app_with, upload_image,
    TEST_PASSWORD,
};

#[tokio::test]
async fn health_version_and_fallback() {
    let server = spawn_app().await;

    let (status, body) = get_json(server.addr, "/healthz", None).await;
    assert_eq!(status, 200);
    assert_eq!(body.get("status").and_then(Value::as_str), Some("ok"));

    let (status, body) = get_json(server.addr, "/v1/version", None).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(
        body.get("service").and_then(Value::as_str),
        Some("openworld-server")
    );
    assert_eq!(body.get("api").and_then(Value::as_str), Some("v1"));
    assert!(body.get("version").and_then(Value::as_str).is_some());

    let (status, body) = get_json(server.addr, "/v1/nope", None).await;
    assert_eq!(status, 404);
    assert_eq!(error_code(&body), "not_found");
}

#[tokio::test]
async fn readiness_follows_runtime_state() {
    let server = spawn_app().await;

    let (status, body) = get_json(server.addr, "/readyz", None).await;
    assert_eq!(status, 200);
    assert_eq!(body.get("status").and_then(Value::as_str), Some("ready"));

    server.state.ready.store(false, Ordering::Relaxed);
    let (status, body) = get_json(server.addr, "/readyz", None).await;
    assert_eq!(status, 503);
    assert_eq!(body.get("status").and_then(Value::as_str), Some("not-ready"));
    server.state.ready.store(true, Ordering::Relaxed);

    // Draining flips readiness too so load balancers stop routing here.
    server.state.accepting_requests.store(false, Ordering::Relaxed);
    let (status, _) = get_json(server.addr, "/readyz", None).await;
    assert_eq!(status, 503);
}

#[tokio::test]
async fn metrics_expose_request_counters() {
    let server = spawn_app().await;
    for _ in 0..2 {
        let (status, _) = get_json(server.addr, "/healthz", None).await;
        assert_eq!(status, 200);
    }
    let (status, _) = get_json(server.addr, "/v1/nope", None).await;
    assert_eq!(status, 404);

    let (status, _, metrics) =
        request(server.addr, "GET", "/metrics", None, None, &[], &[]).await;
    assert_eq!(status, 200);
    assert!(metrics.contains("openworld_build_info"));
    assert!(metrics.contains("openworld_ready 1"));
    assert!(metrics
        .contains("openworld_http_requests_total{route=\"/healthz\",method=\"GET\",status=\"200\"} 2"));
    assert!(metrics.contains("openworld_http_request_latency_p95_seconds{route=\"/healthz\"}"));
    assert!(metrics.contains("openworld_media_delete_failures_total 0"));
}

#[tokio::test]
async fn responses_carry_request_ids() {
    let server = spawn_app().await;

    let (status, headers, _) =
        request(server.addr, "GET", "/healthz", None, None, &[], &[]).await;
    assert_eq!(status, 200);
    assert!(headers.contains("x-request-id: "), "{headers}");

    let (_, headers, _) = request(
        server.addr,
        "GET",
        "/healthz",
        None,
        None,
        &[],
        &[("x-request-id", "custom-req-42")],
    )
    .await;
    assert!(headers.contains("x-request-id: custom-req-42"), "{headers}");
}

#[tokio::test]
async fn oversized_json_bodies_are_rejected() {
    let server = spawn_app().await;

    // Default non-upload cap is 16 KiB; this body is well past it.
    let padded = "x".repeat(20 * 1024);
    let payload = serde_json::to_vec(
        &json!({"name": padded, "email": "big@example.com", "password": TEST_PASSWORD}),
    )
    .expect("encode body");
    let (status, _, _) = request(
        server.addr,
        "POST",
        "/v1/auth/register",
        None,
        Some("application/json"),
        &payload,
        &[],
    )
    .await;
    assert_eq!(status, 413);
}

#[tokio::test]
async fn cors_allow_list_is_enforced() {
    let server = spawn_app_with(|config| {
        config.cors_allowed_origins = vec!["https://app.example.org".to_string()];
    })
    .await;

    let (status, headers, _) = request(
        server.addr,
        "GET",
        "/healthz",
        None,
        None,
        &[],
        &[("Origin", "https://app.example.org")],
    )
    .await;
    assert_eq!(status, 200);
    assert!(
        headers.contains("access-control-allow-origin: https://app.example.org"),
        "{headers}"
    );

    let (status, headers, _) = request(
        server.addr,
        "GET",
        "/healthz",
        None,
        None,
        &[],
        &[("Origin", "https://evil.example.org")],
    )
    .await;
    assert_eq!(status, 200);
    assert!(!headers.contains("access-control-allow-origin"), "{headers}");
}

#[tokio::test]
async fn upload_counter_increments() {
    let server = spawn_app().await;
    let (token, _) = register(server.addr, "Pix", "pix@example.com").await;
    upload_image(server.addr, &token, "Counted", "one").await;

    let (status, _, metrics) =
        request(server.addr, "GET", "/metrics", None, None, &[], &[]).await;
    assert_eq!(status, 200);
    assert!(metrics.contains("openworld_images_uploaded_total 1"), "{metrics}");
}
