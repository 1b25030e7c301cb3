// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
//! Open World HTTP server.
//!
//! The router, shared state and middleware live here; request handlers sit
//! under [`http`]. The store is synchronous, so [`Db`] bridges handlers onto
//! `spawn_blocking` behind a permit cap.

mod auth;
mod config;
mod http;
mod middleware;
mod rate_limiter;
mod telemetry;

pub use auth::{PasswordHasher, SessionSigner};
pub use config::{validate_startup_config, AuthConfig, RateLimitConfig, ServerConfig};

use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use openworld_store::{Database, MediaStore, StoreError, StoreErrorCode};
use tokio::sync::Semaphore;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::rate_limiter::RateLimiter;
use crate::telemetry::RequestMetrics;

pub const CRATE_NAME: &str = "openworld-server";

/// Async access to the sqlite store: each call takes a permit, opens a
/// connection on a blocking thread and runs the closure there.
#[derive(Clone)]
pub struct Db {
    database: Arc<Database>,
    permits: Arc<Semaphore>,
}

impl Db {
    #[must_use]
    pub fn new(database: Database, max_connections: usize) -> Self {
        Self {
            database: Arc::new(database),
            permits: Arc::new(Semaphore::new(max_connections)),
        }
    }

    pub async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| StoreError::new(StoreErrorCode::Internal, "connection pool closed"))?;
        let database = Arc::clone(&self.database);
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut conn = database.connect()?;
            f(&mut conn)
        })
        .await
        .map_err(|err| {
            StoreError::new(StoreErrorCode::Internal, format!("db task failed: {err}"))
        })?
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub media: Arc<dyn MediaStore>,
    pub config: Arc<ServerConfig>,
    pub ready: Arc<AtomicBool>,
    pub accepting_requests: Arc<AtomicBool>,
    pub(crate) sessions: Arc<SessionSigner>,
    pub(crate) passwords: Arc<PasswordHasher>,
    pub(crate) auth_limiter: Arc<RateLimiter>,
    pub(crate) metrics: Arc<RequestMetrics>,
    pub(crate) request_id_seed: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(
        db: Db,
        media: Arc<dyn MediaStore>,
        config: ServerConfig,
    ) -> Result<Self, String> {
        let sessions = SessionSigner::new(&config.auth.session_secret, config.auth.session_ttl)?;
        let passwords = PasswordHasher::new(config.auth.pbkdf2_iterations);
        Ok(Self {
            db,
            media,
            config: Arc::new(config),
            ready: Arc::new(AtomicBool::new(false)),
            accepting_requests: Arc::new(AtomicBool::new(true)),
            sessions: Arc::new(sessions),
            passwords: Arc::new(passwords),
            auth_limiter: Arc::new(RateLimiter::default()),
            metrics: Arc::new(RequestMetrics::default()),
            request_id_seed: Arc::new(AtomicU64::new(1)),
        })
    }
}

/// Empty origin list means permissive dev mode; anything else is an
/// explicit allow list.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let list: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin.trim()).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(list))
        .allow_methods(Any)
        .allow_headers(Any)
}

#[must_use]
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_allowed_origins);
    // route-level layer runs inside the router-level one, so upload routes
    // get the larger cap
    let upload_limit = DefaultBodyLimit::max(state.config.max_upload_bytes);

    Router::new()
        .route("/healthz", get(http::healthz_handler))
        .route("/readyz", get(http::readyz_handler))
        .route("/metrics", get(http::metrics_handler))
        .route("/v1/version", get(http::version_handler))
        .route("/v1/auth/register", post(http::register_handler))
        .route("/v1/auth/login", post(http::login_handler))
        .route("/v1/auth/me", get(http::me_handler))
        .route(
            "/v1/auth/forgot-password",
            post(http::forgot_password_handler),
        )
        .route(
            "/v1/auth/reset-password/:token",
            post(http::reset_password_handler),
        )
        .route(
            "/v1/images",
            get(http::feed_handler)
                .post(http::upload_image_handler)
                .layer(upload_limit.clone()),
        )
        .route(
            "/v1/images/:id",
            get(http::image_detail_handler)
                .patch(http::update_image_handler)
                .delete(http::delete_image_handler),
        )
        .route("/v1/images/:id/like", post(http::like_image_handler))
        .route("/v1/images/:id/save", post(http::save_image_handler))
        .route("/v1/images/:id/comments", post(http::add_comment_handler))
        .route(
            "/v1/images/:id/comments/:comment_id",
            delete(http::delete_comment_handler),
        )
        .route(
            "/v1/collections",
            get(http::list_collections_handler).post(http::create_collection_handler),
        )
        .route(
            "/v1/collections/:id",
            get(http::collection_detail_handler)
                .patch(http::update_collection_handler)
                .delete(http::delete_collection_handler),
        )
        .route(
            "/v1/collections/:id/images",
            post(http::add_collection_image_handler),
        )
        .route(
            "/v1/collections/:id/images/:image_id",
            delete(http::remove_collection_image_handler),
        )
        .route("/v1/users", get(http::list_users_handler))
        .route("/v1/users/profile", patch(http::update_profile_handler))
        .route(
            "/v1/users/profile/image",
            post(http::profile_image_handler).layer(upload_limit),
        )
        .route(
            "/v1/users/:id",
            get(http::get_user_handler).delete(http::delete_user_handler),
        )
        .route("/v1/users/:id/images", get(http::user_images_handler))
        .route("/v1/users/:id/saved", get(http::user_saved_handler))
        .fallback(http::fallback_handler)
        .layer(from_fn_with_state(
            state.clone(),
            middleware::request_tracing_middleware,
        ))
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(cors)
        .with_state(state)
}
