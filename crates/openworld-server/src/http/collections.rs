//! Collection endpoints. Collections are personal: listing defaults to the
//! caller's own (private included), other owners show public ones only, and
//! every mutation is owner-gated.

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use openworld_api::{
    parse_collection_list_params, AddCollectionImageRequest, ApiError, CollectionDetailDto,
    CollectionDto, CollectionListDto, CreateCollectionRequest, UpdateCollectionRequest,
};
use openworld_model::{
    CollectionDescription, CollectionId, CollectionTitle, User, UserId,
};
use openworld_store::{CollectionUpdate, NewCollection};

use crate::http::handlers::{
    ok_status, optional_user, parse_collection_id, parse_image_id, parse_json, require_user,
    Rejection,
};
use crate::AppState;

/// Loads the collection's owner row and enforces that `user` is the owner.
async fn require_owner(
    state: &AppState,
    id: CollectionId,
    user: &User,
) -> Result<(), Rejection> {
    let (owner, _) = state
        .db
        .run(move |conn| openworld_store::fetch_collection_owner(conn, &id))
        .await?
        .ok_or_else(|| Rejection::from(ApiError::not_found("collection")))?;
    if owner != user.id {
        return Err(ApiError::forbidden("only the owner can modify a collection").into());
    }
    Ok(())
}

pub(crate) async fn create_collection_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Rejection> {
    let user = require_user(&state, &headers).await?;
    let req: CreateCollectionRequest = parse_json(&body)?;
    let title = CollectionTitle::parse(&req.title)
        .map_err(|err| Rejection::from(ApiError::invalid_field("title", &err.0)))?;
    let description = CollectionDescription::parse(req.description.as_deref().unwrap_or(""))
        .map_err(|err| Rejection::from(ApiError::invalid_field("description", &err.0)))?;

    let new = NewCollection {
        id: CollectionId::new_random(),
        title,
        description,
        owner: user.id,
        is_private: req.is_private.unwrap_or(false),
    };
    let row = state
        .db
        .run(move |conn| openworld_store::insert_collection(conn, &new))
        .await?;
    Ok((StatusCode::CREATED, Json(CollectionDto::from_row(&row))).into_response())
}

pub(crate) async fn list_collections_handler(
    State(state): State<AppState>,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, Rejection> {
    let user = require_user(&state, &headers).await?;
    let filter = parse_collection_list_params(&query)?;
    let owner: UserId = filter.unwrap_or(user.id);
    let include_private = owner == user.id;
    let rows = state
        .db
        .run(move |conn| openworld_store::list_collections(conn, &owner, include_private))
        .await?;
    let collections: Vec<CollectionDto> = rows.iter().map(CollectionDto::from_row).collect();
    let count = collections.len() as u64;
    Ok(Json(CollectionListDto { collections, count }).into_response())
}

pub(crate) async fn collection_detail_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, Rejection> {
    let id = parse_collection_id(&id)?;
    let viewer = optional_user(&state, &headers).await?;
    let viewer_id = viewer.map(|u| u.id);
    let detail = state
        .db
        .run(move |conn| openworld_store::fetch_collection(conn, &id, viewer_id.as_ref()))
        .await?
        .ok_or_else(|| Rejection::from(ApiError::not_found("collection")))?;
    if detail.collection.is_private && viewer_id != Some(detail.collection.owner) {
        return Err(ApiError::forbidden("this collection is private").into());
    }
    Ok(Json(CollectionDetailDto::from_detail(&detail)).into_response())
}

pub(crate) async fn update_collection_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Rejection> {
    let id = parse_collection_id(&id)?;
    let user = require_user(&state, &headers).await?;
    let req: UpdateCollectionRequest = parse_json(&body)?;
    require_owner(&state, id, &user).await?;

    let update = CollectionUpdate {
        title: match req.title.as_deref() {
            Some(raw) => Some(
                CollectionTitle::parse(raw)
                    .map_err(|err| Rejection::from(ApiError::invalid_field("title", &err.0)))?,
            ),
            None => None,
        },
        description: match req.description.as_deref() {
            Some(raw) => Some(CollectionDescription::parse(raw).map_err(|err| {
                Rejection::from(ApiError::invalid_field("description", &err.0))
            })?),
            None => None,
        },
        is_private: req.is_private,
    };
    let row = state
        .db
        .run(move |conn| openworld_store::update_collection(conn, &id, &update))
        .await?;
    Ok(Json(CollectionDto::from_row(&row)).into_response())
}

pub(crate) async fn delete_collection_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, Rejection> {
    let id = parse_collection_id(&id)?;
    let user = require_user(&state, &headers).await?;
    require_owner(&state, id, &user).await?;
    state
        .db
        .run(move |conn| openworld_store::delete_collection(conn, &id))
        .await?;
    Ok(ok_status().into_response())
}

pub(crate) async fn add_collection_image_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Rejection> {
    let id = parse_collection_id(&id)?;
    let user = require_user(&state, &headers).await?;
    let req: AddCollectionImageRequest = parse_json(&body)?;
    let image_id = parse_image_id(&req.image_id)?;
    require_owner(&state, id, &user).await?;

    let viewer_id = user.id;
    let detail = state
        .db
        .run(move |conn| {
            openworld_store::add_collection_image(conn, &id, &image_id, Some(&viewer_id))
        })
        .await?;
    Ok(Json(CollectionDetailDto::from_detail(&detail)).into_response())
}

pub(crate) async fn remove_collection_image_handler(
    State(state): State<AppState>,
    Path((id, image_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, Rejection> {
    let id = parse_collection_id(&id)?;
    let image_id = parse_image_id(&image_id)?;
    let user = require_user(&state, &headers).await?;
    require_owner(&state, id, &user).await?;
    state
        .db
        .run(move |conn| openworld_store::remove_collection_image(conn, &id, &image_id))
        .await?;
    Ok(ok_status().into_response())
}
