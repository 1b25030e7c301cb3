#![forbid(unsafe_code)]
//! Persistence layer for Open World.
//!
//! Two halves: a relational sqlite store for the entities (users, images,
//! collections and their edges) and a [`MediaStore`] abstraction for the
//! binary objects the records point at. Everything here is synchronous;
//! the server bridges onto the async runtime with `spawn_blocking`.

mod collections;
mod db;
mod images;
mod media;
mod users;

pub use collections::{
    add_collection_image, delete_collection, fetch_collection, fetch_collection_owner,
    insert_collection, list_collections, remove_collection_image, update_collection,
    CollectionDetail, CollectionRow, CollectionUpdate, NewCollection,
};
pub use db::Database;
pub use images::{
    add_comment, count_images_by_user, delete_comment, delete_image, fetch_comment, fetch_image,
    fetch_image_owner, insert_image, query_feed, toggle_like, toggle_save, update_image,
    AuthorSummary, CommentWithAuthor, FeedPage, FeedRow, ImageDetail, ImageFeedQuery, ImageUpdate,
    LikeOutcome, NewImage, SaveOutcome,
};
pub use media::{
    media_extension, HttpMediaStore, LocalFsMediaStore, MediaStore, RetryPolicy,
    ALLOWED_IMAGE_CONTENT_TYPES,
};
pub use users::{
    delete_user, fetch_user, fetch_user_by_email, fetch_user_by_reset_token, insert_user,
    list_users, set_reset_token, update_password, update_profile, update_profile_image, NewUser,
    ProfileUpdate, UserCredentials,
};

use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreErrorCode {
    NotFound,
    Validation,
    Conflict,
    Network,
    Io,
    Internal,
}

impl StoreErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation_error",
            Self::Conflict => "conflict",
            Self::Network => "network_error",
            Self::Io => "io_error",
            Self::Internal => "internal_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub code: StoreErrorCode,
    pub message: String,
}

impl StoreError {
    #[must_use]
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_found(what: &str) -> Self {
        Self::new(StoreErrorCode::NotFound, format!("{what} not found"))
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::new(StoreErrorCode::Conflict, err.to_string())
            }
            rusqlite::Error::QueryReturnedNoRows => {
                Self::new(StoreErrorCode::NotFound, "row not found")
            }
            _ => Self::new(StoreErrorCode::Internal, err.to_string()),
        }
    }
}

pub const CRATE_NAME: &str = "openworld-store";
