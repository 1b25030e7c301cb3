//! Registration, login and password-reset endpoints.
//!
//! Login failures are deliberately indistinguishable: unknown email, bad
//! password and unparseable email all return the same 401, and the unknown
//! paths still burn a hash verification so timing does not leak which case
//! was hit.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use openworld_api::{
    ApiError, AuthSessionDto, ForgotPasswordRequest, LoginRequest, RegisterRequest,
    ResetPasswordRequest, UserDto,
};
use openworld_model::{Bio, Email, Role, UserId, UserName, DEFAULT_PROFILE_IMAGE_URL};
use openworld_store::{NewUser, StoreErrorCode};
use serde_json::json;
use tracing::info;

use crate::auth::{generate_reset_token, hash_reset_token, MIN_PASSWORD_LEN};
use crate::http::handlers::{client_ip, ok_status, parse_json, require_user, Rejection};
use crate::AppState;

fn invalid_credentials() -> Rejection {
    ApiError::unauthorized("invalid email or password").into()
}

fn validate_password(password: &str) -> Result<(), Rejection> {
    if password.len() < MIN_PASSWORD_LEN {
        let reason = format!("must be at least {MIN_PASSWORD_LEN} characters");
        return Err(ApiError::invalid_field("password", &reason).into());
    }
    Ok(())
}

fn is_admin_email(state: &AppState, email: &Email) -> bool {
    state
        .config
        .auth
        .admin_emails
        .iter()
        .any(|admin| admin.trim().eq_ignore_ascii_case(email.as_str()))
}

async fn enforce_auth_rate_limit(state: &AppState, headers: &HeaderMap) -> Result<(), Rejection> {
    let key = client_ip(headers);
    if !state
        .auth_limiter
        .allow(&key, &state.config.rate_limit_auth)
        .await
    {
        return Err(ApiError::rate_limited().into());
    }
    Ok(())
}

fn issue_session(state: &AppState, user_id: &UserId) -> Result<String, Rejection> {
    state
        .sessions
        .issue(user_id, Utc::now())
        .map_err(|_| Rejection::from(ApiError::internal("failed to issue session token")))
}

async fn hash_password(state: &AppState, password: String) -> Result<String, Rejection> {
    let hasher = Arc::clone(&state.passwords);
    tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(|_| Rejection::from(ApiError::internal("password hashing task failed")))
}

async fn verify_password(
    state: &AppState,
    password: String,
    stored: String,
) -> Result<bool, Rejection> {
    let hasher = Arc::clone(&state.passwords);
    tokio::task::spawn_blocking(move || hasher.verify(&password, &stored))
        .await
        .map_err(|_| Rejection::from(ApiError::internal("password verification task failed")))
}

async fn verify_against_dummy(state: &AppState, password: String) -> Result<(), Rejection> {
    let hasher = Arc::clone(&state.passwords);
    tokio::task::spawn_blocking(move || hasher.dummy_verify(&password))
        .await
        .map_err(|_| Rejection::from(ApiError::internal("password verification task failed")))
}

pub(crate) async fn register_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Rejection> {
    enforce_auth_rate_limit(&state, &headers).await?;
    let req: RegisterRequest = parse_json(&body)?;
    let name = UserName::parse(&req.name)
        .map_err(|err| Rejection::from(ApiError::invalid_field("name", &err.0)))?;
    let email = Email::parse(&req.email)
        .map_err(|err| Rejection::from(ApiError::invalid_field("email", &err.0)))?;
    validate_password(&req.password)?;

    let role = if is_admin_email(&state, &email) {
        Role::Admin
    } else {
        Role::User
    };
    let password_hash = hash_password(&state, req.password).await?;
    let new = NewUser {
        id: UserId::new_random(),
        name,
        email,
        password_hash,
        role,
        profile_image_url: DEFAULT_PROFILE_IMAGE_URL.to_string(),
        bio: Bio::default(),
    };
    let user = state
        .db
        .run(move |conn| openworld_store::insert_user(conn, &new))
        .await
        .map_err(|err| {
            if err.code == StoreErrorCode::Conflict {
                Rejection::from(ApiError::conflict(
                    "an account with this email already exists",
                ))
            } else {
                Rejection::from(err)
            }
        })?;
    let token = issue_session(&state, &user.id)?;
    info!(user_id = %user.id, role = user.role.as_str(), "account registered");
    let dto = AuthSessionDto {
        token,
        user: UserDto::from_user(&user, Some(0)),
    };
    Ok((StatusCode::CREATED, Json(dto)).into_response())
}

pub(crate) async fn login_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Rejection> {
    enforce_auth_rate_limit(&state, &headers).await?;
    let req: LoginRequest = parse_json(&body)?;
    let Ok(email) = Email::parse(&req.email) else {
        verify_against_dummy(&state, req.password).await?;
        return Err(invalid_credentials());
    };
    let creds = state
        .db
        .run(move |conn| openworld_store::fetch_user_by_email(conn, &email))
        .await?;
    let Some(creds) = creds else {
        verify_against_dummy(&state, req.password).await?;
        return Err(invalid_credentials());
    };
    if !verify_password(&state, req.password, creds.password_hash).await? {
        return Err(invalid_credentials());
    }
    let token = issue_session(&state, &creds.user.id)?;
    let dto = AuthSessionDto {
        token,
        user: UserDto::from_user(&creds.user, None),
    };
    Ok(Json(dto).into_response())
}

pub(crate) async fn me_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, Rejection> {
    let user = require_user(&state, &headers).await?;
    let user_id = user.id;
    let uploads = state
        .db
        .run(move |conn| openworld_store::count_images_by_user(conn, &user_id))
        .await?;
    Ok(Json(UserDto::from_user(&user, Some(uploads))).into_response())
}

/// Always answers 200 so the endpoint cannot be used to probe which emails
/// have accounts. The token itself goes out through a delivery channel; the
/// response only carries it when `expose_reset_tokens` is set for tests.
pub(crate) async fn forgot_password_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Rejection> {
    enforce_auth_rate_limit(&state, &headers).await?;
    let req: ForgotPasswordRequest = parse_json(&body)?;
    let Ok(email) = Email::parse(&req.email) else {
        return Ok(ok_status().into_response());
    };
    let found = state
        .db
        .run(move |conn| openworld_store::fetch_user_by_email(conn, &email))
        .await?;
    let Some(creds) = found else {
        return Ok(ok_status().into_response());
    };

    let (raw_token, token_hash) = generate_reset_token();
    let expires_at = Utc::now() + state.config.auth.reset_token_ttl;
    let user_id = creds.user.id;
    state
        .db
        .run(move |conn| openworld_store::set_reset_token(conn, &user_id, &token_hash, expires_at))
        .await?;
    info!(user_id = %user_id, "password reset token issued");
    if state.config.auth.expose_reset_tokens {
        return Ok(Json(json!({"status": "ok", "reset_token": raw_token})).into_response());
    }
    Ok(ok_status().into_response())
}

pub(crate) async fn reset_password_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
    body: Bytes,
) -> Result<Response, Rejection> {
    let req: ResetPasswordRequest = parse_json(&body)?;
    validate_password(&req.password)?;
    let token_hash = hash_reset_token(token.trim());
    let now = Utc::now();
    let user = state
        .db
        .run(move |conn| openworld_store::fetch_user_by_reset_token(conn, &token_hash, now))
        .await?
        .ok_or_else(|| {
            Rejection::from(ApiError::invalid_body("reset token is invalid or expired"))
        })?;
    let password_hash = hash_password(&state, req.password).await?;
    let user_id = user.id;
    state
        .db
        .run(move |conn| openworld_store::update_password(conn, &user_id, &password_hash))
        .await?;
    info!(user_id = %user_id, "password reset completed");
    Ok(ok_status().into_response())
}
