// SPDX-License-Identifier: Apache-2.0

use axum::extract::multipart::MultipartError;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use openworld_api::{map_error, ApiError, ApiErrorCode, API_VERSION};
use openworld_model::{CollectionId, CommentId, ImageId, User, UserId};
use openworld_store::{MediaStore, StoreError, StoreErrorCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::warn;

use crate::auth::TokenError;
use crate::telemetry::{percentile_ns, METRIC_VERSION};
use crate::{AppState, CRATE_NAME};

#[must_use]
pub(crate) fn api_error_response(status: StatusCode, err: ApiError) -> Response {
    let body = Json(json!({"error": err}));
    let mut resp = (status, body).into_response();
    if matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
    ) {
        resp.headers_mut()
            .insert("retry-after", HeaderValue::from_static("3"));
    }
    resp
}

/// Error path of every handler: an [`ApiError`] plus the status it maps to.
/// Store errors convert too, so handlers can use `?` on both layers.
#[derive(Debug)]
pub(crate) struct Rejection {
    pub(crate) status: StatusCode,
    pub(crate) error: ApiError,
}

impl From<ApiError> for Rejection {
    fn from(error: ApiError) -> Self {
        let status =
            StatusCode::from_u16(map_error(&error)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self { status, error }
    }
}

impl From<StoreError> for Rejection {
    fn from(err: StoreError) -> Self {
        let error = match err.code {
            StoreErrorCode::NotFound => ApiError::new(ApiErrorCode::NotFound, err.message, json!({})),
            StoreErrorCode::Validation => ApiError::invalid_body(err.message),
            StoreErrorCode::Conflict => ApiError::conflict(err.message),
            _ => {
                warn!(error = %err, "store operation failed");
                ApiError::internal("operation failed")
            }
        };
        Self::from(error)
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        api_error_response(self.status, self.error)
    }
}

pub(crate) fn parse_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Rejection> {
    serde_json::from_slice(bytes).map_err(|err| {
        Rejection::from(ApiError::invalid_body(format!("invalid request body: {err}")))
    })
}

/// Multipart read failures are 400s except when the body-limit layer cut
/// the stream, which surfaces as 413 with the configured cap.
pub(crate) fn multipart_rejection(err: MultipartError, upload_limit: usize) -> Rejection {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Rejection::from(ApiError::payload_too_large(upload_limit))
    } else {
        Rejection::from(ApiError::invalid_body(format!(
            "malformed multipart body: {err}"
        )))
    }
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = raw
        .strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Resolves the bearer token to a live user row. Tokens that verify but
/// point at a deleted account are treated the same as invalid ones.
pub(crate) async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<User, Rejection> {
    let token = bearer_token(headers)
        .ok_or_else(|| Rejection::from(ApiError::unauthorized("missing bearer token")))?;
    let claims = state.sessions.verify(&token, Utc::now()).map_err(|err| {
        let message = match err {
            TokenError::Expired => "session token has expired",
            _ => "invalid session token",
        };
        Rejection::from(ApiError::unauthorized(message))
    })?;
    let user = state
        .db
        .run(move |conn| openworld_store::fetch_user(conn, &claims.user_id))
        .await?;
    user.ok_or_else(|| Rejection::from(ApiError::unauthorized("session user no longer exists")))
}

/// Like [`require_user`] but an absent Authorization header is fine; a
/// present-but-invalid one is still rejected.
pub(crate) async fn optional_user(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<User>, Rejection> {
    if headers.get(header::AUTHORIZATION).is_none() {
        return Ok(None);
    }
    require_user(state, headers).await.map(Some)
}

pub(crate) fn require_admin(user: &User) -> Result<(), Rejection> {
    if user.role.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("administrator access required").into())
    }
}

/// Rate limit key for unauthenticated endpoints. Trusts proxy headers when
/// present since the bind address usually sits behind one.
pub(crate) fn client_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real = real.trim();
        if !real.is_empty() {
            return real.to_string();
        }
    }
    "unknown".to_string()
}

// Path segments parse through the model id types; garbage ids are a 400,
// not a 404, so clients can tell a bad request from a missing resource.

pub(crate) fn parse_user_id(raw: &str) -> Result<UserId, Rejection> {
    UserId::parse(raw).map_err(|err| Rejection::from(ApiError::invalid_body(err.0)))
}

pub(crate) fn parse_image_id(raw: &str) -> Result<ImageId, Rejection> {
    ImageId::parse(raw).map_err(|err| Rejection::from(ApiError::invalid_body(err.0)))
}

pub(crate) fn parse_collection_id(raw: &str) -> Result<CollectionId, Rejection> {
    CollectionId::parse(raw).map_err(|err| Rejection::from(ApiError::invalid_body(err.0)))
}

pub(crate) fn parse_comment_id(raw: &str) -> Result<CommentId, Rejection> {
    CommentId::parse(raw).map_err(|err| Rejection::from(ApiError::invalid_body(err.0)))
}

/// Best-effort removal of a stored media object after its database row is
/// gone. Failures are logged and counted; there is nothing left to undo.
pub(crate) async fn delete_media_object(state: &AppState, key: &str) {
    let media = Arc::clone(&state.media);
    let owned = key.to_string();
    let result = tokio::task::spawn_blocking(move || media.delete(&owned)).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            warn!(key, error = %err, "media object delete failed");
            state
                .metrics
                .media_delete_failures_total
                .fetch_add(1, Ordering::Relaxed);
        }
        Err(_) => {
            warn!(key, "media object delete task failed");
            state
                .metrics
                .media_delete_failures_total
                .fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub(crate) fn ok_status() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

pub(crate) async fn healthz_handler() -> impl IntoResponse {
    ok_status()
}

pub(crate) async fn readyz_handler(State(state): State<AppState>) -> Response {
    let ready = state.ready.load(Ordering::Relaxed);
    let accepting = state.accepting_requests.load(Ordering::Relaxed);
    if ready && accepting {
        (StatusCode::OK, Json(json!({"status": "ready"}))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not-ready"})),
        )
            .into_response()
    }
}

pub(crate) async fn version_handler() -> impl IntoResponse {
    Json(json!({
        "service": CRATE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "api": API_VERSION,
    }))
}

pub(crate) async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let serving = state.ready.load(Ordering::Relaxed) && state.accepting_requests.load(Ordering::Relaxed);
    let mut body = format!(
        "openworld_build_info{{version=\"{METRIC_VERSION}\"}} 1\nopenworld_ready {}\n",
        i32::from(serving)
    );

    let counts = state.metrics.counts.lock().await.clone();
    let mut entries: Vec<_> = counts.into_iter().collect();
    entries.sort();
    for ((route, method, status), count) in entries {
        body.push_str(&format!(
            "openworld_http_requests_total{{route=\"{route}\",method=\"{method}\",status=\"{status}\"}} {count}\n"
        ));
    }

    let latencies = state.metrics.latency_ns.lock().await.clone();
    let mut routes: Vec<_> = latencies.into_iter().collect();
    routes.sort_by(|a, b| a.0.cmp(&b.0));
    for (route, vals) in routes {
        body.push_str(&format!(
            "openworld_http_request_latency_p95_seconds{{route=\"{route}\"}} {:.6}\n",
            percentile_ns(&vals, 0.95) as f64 / 1_000_000_000.0
        ));
    }

    body.push_str(&format!(
        "openworld_images_uploaded_total {}\n",
        state.metrics.images_uploaded_total.load(Ordering::Relaxed)
    ));
    body.push_str(&format!(
        "openworld_media_delete_failures_total {}\n",
        state.metrics.media_delete_failures_total.load(Ordering::Relaxed)
    ));
    (StatusCode::OK, body)
}

pub(crate) async fn fallback_handler() -> Response {
    api_error_response(StatusCode::NOT_FOUND, ApiError::not_found("route"))
}
