// SPDX-License-Identifier: Apache-2.0

use crate::telemetry::{make_request_id, with_request_id};
use crate::AppState;
use axum::body::Body;
use axum::extract::{MatchedPath, State};
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::Instrument;

/// Honors an incoming `x-request-id` header when present and non-empty.
pub(crate) fn extract_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

pub(crate) async fn request_tracing_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    // Metrics are labelled by route template so path parameters do not
    // explode the cardinality.
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let request_id =
        extract_request_id(request.headers()).unwrap_or_else(|| make_request_id(&state));

    let span = tracing::info_span!(
        "http.request",
        request_id = %request_id,
        method = %method,
        route = %route,
    );

    let response = next.run(request).instrument(span).await;
    state
        .metrics
        .observe_request(&route, &method, response.status(), started.elapsed())
        .await;
    with_request_id(response, &request_id)
}
