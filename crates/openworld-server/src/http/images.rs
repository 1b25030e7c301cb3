// SPDX-License-Identifier: Apache-2.0

//! Image endpoints: the public feed, uploads, detail, edits, likes, saves
//! and comments.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use openworld_api::{
    parse_feed_params, AddCommentRequest, ApiError, CommentDto, FeedDto, ImageDetailDto, ImageDto,
    LikeDto, SaveDto, UpdateImageRequest,
};
use openworld_model::{CommentBody, ImageDescription, ImageId, ImageTitle, TagSet};
use openworld_store::{media_extension, ImageFeedQuery, ImageUpdate, MediaStore, NewImage};
use tracing::{info, warn};

use crate::http::handlers::{
    delete_media_object, multipart_rejection, ok_status, optional_user, parse_comment_id,
    parse_image_id, parse_json, require_user, Rejection,
};
use crate::AppState;

pub(crate) async fn feed_handler(
    State(state): State<AppState>,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, Rejection> {
    let params = parse_feed_params(&query)?;
    let viewer = optional_user(&state, &headers).await?;
    let viewer_id = viewer.map(|u| u.id);
    let feed_query = ImageFeedQuery {
        tags: params.tags,
        search: params.search,
        uploaded_by: params.user,
        saved_by: None,
        page: params.page.page,
        limit: params.page.limit,
    };
    let page = state
        .db
        .run(move |conn| openworld_store::query_feed(conn, &feed_query, viewer_id.as_ref()))
        .await?;
    Ok(Json(FeedDto::from_page(&page)).into_response())
}

pub(crate) async fn upload_image_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, Rejection> {
    let user = require_user(&state, &headers).await?;
    let upload_limit = state.config.max_upload_bytes;

    let mut title_raw: Option<String> = None;
    let mut description_raw: Option<String> = None;
    let mut tags_raw: Option<String> = None;
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
            "title" => {
                title_raw = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| multipart_rejection(err, upload_limit))?,
                );
            }
            "description" => {
                description_raw = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| multipart_rejection(err, upload_limit))?,
                );
            }
            "tags" => {
                tags_raw = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| multipart_rejection(err, upload_limit))?,
                );
            }
            "file" | "image" => {
                let content_type = field.content_type().unwrap_or("").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| multipart_rejection(err, upload_limit))?;
                file = Some((bytes, content_type));
            }
            _ => {
                // unknown parts are drained and ignored
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

    let title = ImageTitle::parse(title_raw.as_deref().unwrap_or(""))
        .map_err(|err| Rejection::from(ApiError::invalid_field("title", &err.0)))?;
    let description = ImageDescription::parse(description_raw.as_deref().unwrap_or(""))
        .map_err(|err| Rejection::from(ApiError::invalid_field("description", &err.0)))?;
    let tags = TagSet::parse_csv(tags_raw.as_deref().unwrap_or(""))
        .map_err(|err| Rejection::from(ApiError::invalid_field("tags", &err.0)))?;

    let id = ImageId::new_random();
    let key = format!("images/{id}.{ext}");
    let media = Arc::clone(&state.media);
    let put_key = key.clone();
    let body = bytes.clone();
    let media_url = tokio::task::spawn_blocking(move || media.put(&put_key, &body, &content_type))
        .await
        .map_err(|_| Rejection::from(ApiError::internal("media upload task failed")))?
        .map_err(|err| {
            warn!(error = %err, "media upload failed");
            Rejection::from(ApiError::internal("failed to store image"))
        })?;

    let new = NewImage {
        id,
        title,
        description,
        tags,
        media_url,
        storage_key: Some(key.clone()),
        uploaded_by: user.id,
    };
    let inserted = state
        .db
        .run(move |conn| openworld_store::insert_image(conn, &new))
        .await;
    let row = match inserted {
        Ok(row) => row,
        Err(err) => {
            delete_media_object(&state, &key).await;
            return Err(err.into());
        }
    };
    state
        .metrics
        .images_uploaded_total
        .fetch_add(1, Ordering::Relaxed);
    info!(image_id = %id, user_id = %user.id, bytes = bytes.len(), "image uploaded");
    Ok((StatusCode::CREATED, Json(ImageDto::from_feed_row(&row))).into_response())
}

pub(crate) async fn image_detail_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, Rejection> {
    let id = parse_image_id(&id)?;
    let viewer = optional_user(&state, &headers).await?;
    let viewer_id = viewer.map(|u| u.id);
    let detail = state
        .db
        .run(move |conn| openworld_store::fetch_image(conn, &id, viewer_id.as_ref()))
        .await?
        .ok_or_else(|| Rejection::from(ApiError::not_found("image")))?;
    Ok(Json(ImageDetailDto::from_detail(&detail)).into_response())
}

pub(crate) async fn update_image_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Rejection> {
    let id = parse_image_id(&id)?;
    let user = require_user(&state, &headers).await?;
    let req: UpdateImageRequest = parse_json(&body)?;

    let owner = state
        .db
        .run(move |conn| openworld_store::fetch_image_owner(conn, &id))
        .await?
        .ok_or_else(|| Rejection::from(ApiError::not_found("image")))?;
    if owner != user.id {
        return Err(ApiError::forbidden("only the uploader can edit an image").into());
    }

    let update = ImageUpdate {
        title: match req.title.as_deref() {
            Some(raw) => Some(
                ImageTitle::parse(raw)
                    .map_err(|err| Rejection::from(ApiError::invalid_field("title", &err.0)))?,
            ),
            None => None,
        },
        description: match req.description.as_deref() {
            Some(raw) => Some(ImageDescription::parse(raw).map_err(|err| {
                Rejection::from(ApiError::invalid_field("description", &err.0))
            })?),
            None => None,
        },
        tags: match req.tags.as_deref() {
            Some(raw) => Some(
                TagSet::parse_csv(raw)
                    .map_err(|err| Rejection::from(ApiError::invalid_field("tags", &err.0)))?,
            ),
            None => None,
        },
    };

    let viewer_id = user.id;
    let row = state
        .db
        .run(move |conn| openworld_store::update_image(conn, &id, &update, Some(&viewer_id)))
        .await?;
    Ok(Json(ImageDto::from_feed_row(&row)).into_response())
}

pub(crate) async fn delete_image_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, Rejection> {
    let id = parse_image_id(&id)?;
    let user = require_user(&state, &headers).await?;

    let owner = state
        .db
        .run(move |conn| openworld_store::fetch_image_owner(conn, &id))
        .await?
        .ok_or_else(|| Rejection::from(ApiError::not_found("image")))?;
    if owner != user.id && !user.role.is_admin() {
        return Err(
            ApiError::forbidden("only the uploader or an administrator can delete an image").into(),
        );
    }

    let storage_key = state
        .db
        .run(move |conn| openworld_store::delete_image(conn, &id))
        .await?;
    if let Some(key) = storage_key {
        delete_media_object(&state, &key).await;
    }
    info!(image_id = %id, user_id = %user.id, "image deleted");
    Ok(ok_status().into_response())
}

pub(crate) async fn like_image_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, Rejection> {
    let id = parse_image_id(&id)?;
    let user = require_user(&state, &headers).await?;
    let user_id = user.id;
    let outcome = state
        .db
        .run(move |conn| openworld_store::toggle_like(conn, &id, &user_id))
        .await?;
    Ok(Json(LikeDto::from_outcome(&outcome)).into_response())
}

pub(crate) async fn save_image_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, Rejection> {
    let id = parse_image_id(&id)?;
    let user = require_user(&state, &headers).await?;
    let user_id = user.id;
    let outcome = state
        .db
        .run(move |conn| openworld_store::toggle_save(conn, &id, &user_id))
        .await?;
    Ok(Json(SaveDto::from_outcome(&outcome)).into_response())
}

pub(crate) async fn add_comment_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Rejection> {
    let id = parse_image_id(&id)?;
    let user = require_user(&state, &headers).await?;
    let req: AddCommentRequest = parse_json(&body)?;
    let text = CommentBody::parse(&req.text)
        .map_err(|err| Rejection::from(ApiError::invalid_field("text", &err.0)))?;
    let user_id = user.id;
    let row = state
        .db
        .run(move |conn| openworld_store::add_comment(conn, &id, &user_id, &text))
        .await?;
    Ok((StatusCode::CREATED, Json(CommentDto::from_row(&row))).into_response())
}

pub(crate) async fn delete_comment_handler(
    State(state): State<AppState>,
    Path((id, comment_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, Rejection> {
    let image_id = parse_image_id(&id)?;
    let comment_id = parse_comment_id(&comment_id)?;
    let user = require_user(&state, &headers).await?;

    let comment = state
        .db
        .run(move |conn| openworld_store::fetch_comment(conn, &image_id, &comment_id))
        .await?
        .ok_or_else(|| Rejection::from(ApiError::not_found("comment")))?;
    if comment.author.id != user.id && !user.role.is_admin() {
        return Err(
            ApiError::forbidden("only the author or an administrator can delete a comment").into(),
        );
    }

    state
        .db
        .run(move |conn| openworld_store::delete_comment(conn, &image_id, &comment_id))
        .await?;
    Ok(ok_status().into_response())
}
