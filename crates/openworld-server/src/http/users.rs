// SPDX-License-Identifier: Apache-2.0

//! User endpoints: public profiles and per-user image pages, self-service
//! profile edits, and the admin-only listing and account removal.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use openworld_api::{
    parse_page_params, ApiError, FeedDto, UpdateProfileRequest, UserDto, UserListDto,
};
use openworld_model::{Bio, UserName};
use openworld_store::{
    media_extension, ImageFeedQuery, MediaStore, ProfileUpdate, StoreError,
};
use tracing::{info, warn};

use crate::http::handlers::{
    delete_media_object, multipart_rejection, ok_status, optional_user, parse_json, parse_user_id,
    require_admin, require_user, Rejection,
};
use crate::AppState;

const PROFILE_IMAGE_URL_MAX_LEN: usize = 2048;

pub(crate) async fn list_users_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, Rejection> {
    let user = require_user(&state, &headers).await?;
    require_admin(&user)?;
    let rows = state
        .db
        .run(move |conn| openworld_store::list_users(conn))
        .await?;
    let users: Vec<UserDto> = rows.iter().map(|u| UserDto::from_user(u, None)).collect();
    let count = users.len() as u64;
    Ok(Json(UserListDto { users, count }).into_response())
}

pub(crate) async fn get_user_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, Rejection> {
    let id = parse_user_id(&id)?;
    let (user, count) = state
        .db
        .run(move |conn| {
            let Some(user) = openworld_store::fetch_user(conn, &id)? else {
                return Err(StoreError::not_found("user"));
            };
            let count = openworld_store::count_images_by_user(conn, &id)?;
            Ok((user, count))
        })
        .await?;
    Ok(Json(UserDto::from_user(&user, Some(count))).into_response())
}

pub(crate) async fn delete_user_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, Rejection> {
    let id = parse_user_id(&id)?;
    let admin = require_user(&state, &headers).await?;
    require_admin(&admin)?;
    if id == admin.id {
        return Err(
            ApiError::invalid_body("administrators cannot delete their own account").into(),
        );
    }
    let keys = state
        .db
        .run(move |conn| openworld_store::delete_user(conn, &id))
        .await?;
    for key in &keys {
        delete_media_object(&state, key).await;
    }
    info!(user_id = %id, admin_id = %admin.id, media_objects = keys.len(), "user deleted");
    Ok(ok_status().into_response())
}

pub(crate) async fn user_images_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, Rejection> {
    let id = parse_user_id(&id)?;
    let page = parse_page_params(&query)?;
    let viewer = optional_user(&state, &headers).await?;
    let viewer_id = viewer.map(|u| u.id);
    let feed_query = ImageFeedQuery {
        tags: Vec::new(),
        search: None,
        uploaded_by: Some(id),
        saved_by: None,
        page: page.page,
        limit: page.limit,
    };
    let page = state
        .db
        .run(move |conn| openworld_store::query_feed(conn, &feed_query, viewer_id.as_ref()))
        .await?;
    Ok(Json(FeedDto::from_page(&page)).into_response())
}

pub(crate) async fn user_saved_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, Rejection> {
    let id = parse_user_id(&id)?;
    let user = require_user(&state, &headers).await?;
    if id != user.id {
        return Err(ApiError::forbidden("saved images are visible to their owner only").into());
    }
    let page = parse_page_params(&query)?;
    let feed_query = ImageFeedQuery {
        tags: Vec::new(),
        search: None,
        uploaded_by: None,
        saved_by: Some(id),
        page: page.page,
        limit: page.limit,
    };
    let viewer_id = user.id;
    let page = state
        .db
        .run(move |conn| openworld_store::query_feed(conn, &feed_query, Some(&viewer_id)))
        .await?;
    Ok(Json(FeedDto::from_page(&page)).into_response())
}

pub(crate) async fn update_profile_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Rejection> {
    let user = require_user(&state, &headers).await?;
    let req: UpdateProfileRequest = parse_json(&body)?;

    let update = ProfileUpdate {
        name: match req.name.as_deref() {
            Some(raw) => Some(
                UserName::parse(raw)
                    .map_err(|err| Rejection::from(ApiError::invalid_field("name", &err.0)))?,
            ),
            None => None,
        },
        bio: match req.bio.as_deref() {
            Some(raw) => Some(
                Bio::parse(raw)
                    .map_err(|err| Rejection::from(ApiError::invalid_field("bio", &err.0)))?,
            ),
            None => None,
        },
        profile_image_url: match req.profile_image_url {
            Some(raw) => {
                let trimmed = raw.trim().to_string();
                // empty resets to the default avatar; relative paths cover
                // objects served by this platform
                let acceptable = trimmed.is_empty()
                    || trimmed.starts_with("http://")
                    || trimmed.starts_with("https://")
                    || trimmed.starts_with('/');
                if !acceptable || trimmed.len() > PROFILE_IMAGE_URL_MAX_LEN {
                    return Err(ApiError::invalid_field(
                        "profile_image_url",
                        "must be an http(s) URL or a path",
                    )
                    .into());
                }
                Some(trimmed)
            }
            None => None,
        },
    };

    let user_id = user.id;
    let updated = state
        .db
        .run(move |conn| openworld_store::update_profile(conn, &user_id, &update))
        .await?;
    Ok(Json(UserDto::from_user(&updated, None)).into_response())
}

pub(crate) async fn profile_image_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, Rejection> {
    let user = require_user(&state, &headers).await?;
    let upload_limit = state.config.max_upload_bytes;

    let mut file: Option<(Bytes, String)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_rejection(err, upload_limit))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "file" | "image" => {
                let content_type = field.content_type().unwrap_or("").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| multipart_rejection(err, upload_limit))?;
                file = Some((bytes, content_type));
            }
            _ => {
                field
                    .bytes()
                    .await
                    .map_err(|err| multipart_rejection(err, upload_limit))?;
            }
        }
    }

    let Some((bytes, content_type)) = file else {
        return Err(ApiError::invalid_field("file", "an image file part is required").into());
    };
    if bytes.is_empty() {
        return Err(ApiError::invalid_field("file", "image file must not be empty").into());
    }
    if bytes.len() > upload_limit {
        return Err(ApiError::payload_too_large(upload_limit).into());
    }
    let Some(ext) = media_extension(&content_type) else {
        return Err(ApiError::invalid_field("file", "unsupported image content type").into());
    };

    let key = format!("profiles/{}.{ext}", user.id);
    let media = Arc::clone(&state.media);
    let put_key = key.clone();
    let body_bytes = bytes.clone();
    let url = tokio::task::spawn_blocking(move || media.put(&put_key, &body_bytes, &content_type))
        .await
        .map_err(|_| Rejection::from(ApiError::internal("media upload task failed")))?
        .map_err(|err| {
            warn!(error = %err, "profile image upload failed");
            Rejection::from(ApiError::internal("failed to store image"))
        })?;

    let user_id = user.id;
    let stored_key = key.clone();
    let (updated, previous) = state
        .db
        .run(move |conn| {
            openworld_store::update_profile_image(conn, &user_id, &url, &stored_key)
        })
        .await?;
    if let Some(old) = previous {
        delete_media_object(&state, &old).await;
    }
    info!(user_id = %user.id, key = %key, "profile image updated");
    Ok(Json(UserDto::from_user(&updated, None)).into_response())
}
