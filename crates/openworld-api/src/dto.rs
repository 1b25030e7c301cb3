// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use openworld_model::{User, DEFAULT_PROFILE_IMAGE_URL};
use openworld_store::{
    AuthorSummary, CollectionDetail, CollectionRow, CommentWithAuthor, FeedPage, FeedRow,
    ImageDetail, LikeOutcome, SaveOutcome,
};
use serde::{Deserialize, Serialize};

/// Compact author block embedded in images, comments and collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserSummaryDto {
    pub id: String,
    pub name: String,
    pub profile_image_url: String,
}

impl UserSummaryDto {
    #[must_use]
    pub fn from_author(author: &AuthorSummary) -> Self {
        let profile_image_url = if author.profile_image_url.is_empty() {
            DEFAULT_PROFILE_IMAGE_URL.to_string()
        } else {
            author.profile_image_url.clone()
        };
        Self {
            id: author.id.to_string(),
            name: author.name.as_str().to_string(),
            profile_image_url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserDto {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub profile_image_url: String,
    pub bio: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_count: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserDto {
    #[must_use]
    pub fn from_user(user: &User, image_count: Option<u64>) -> Self {
        let profile_image_url = if user.profile_image_url.is_empty() {
            DEFAULT_PROFILE_IMAGE_URL.to_string()
        } else {
            user.profile_image_url.clone()
        };
        Self {
            id: user.id.to_string(),
            name: user.name.as_str().to_string(),
            email: user.email.as_str().to_string(),
            role: user.role.as_str().to_string(),
            profile_image_url,
            bio: user.bio.as_str().to_string(),
            image_count,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommentDto {
    pub id: String,
    pub author: UserSummaryDto,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl CommentDto {
    #[must_use]
    pub fn from_row(row: &CommentWithAuthor) -> Self {
        Self {
            id: row.comment.id.to_string(),
            author: UserSummaryDto::from_author(&row.author),
            text: row.comment.body.as_str().to_string(),
            created_at: row.comment.created_at,
        }
    }
}

/// One image as it appears in feeds and lists. `liked`/`saved` reflect the
/// authenticated viewer and are false for anonymous requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageDto {
    pub id: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub media_url: String,
    pub uploader: UserSummaryDto,
    pub like_count: u64,
    pub save_count: u64,
    pub comment_count: u64,
    pub liked: bool,
    pub saved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageDto {
    #[must_use]
    pub fn from_feed_row(row: &FeedRow) -> Self {
        Self {
            id: row.image.id.to_string(),
            title: row.image.title.as_str().to_string(),
            description: row.image.description.as_str().to_string(),
            tags: row.image.tags.iter().map(|t| t.as_str().to_string()).collect(),
            media_url: row.image.media_url.clone(),
            uploader: UserSummaryDto::from_author(&row.uploader),
            like_count: row.like_count,
            save_count: row.save_count,
            comment_count: row.comment_count,
            liked: row.liked,
            saved: row.saved,
            created_at: row.image.created_at,
            updated_at: row.image.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageDetailDto {
    pub id: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub media_url: String,
    pub uploader: UserSummaryDto,
    pub like_count: u64,
    pub save_count: u64,
    pub comment_count: u64,
    pub liked: bool,
    pub saved: bool,
    pub comments: Vec<CommentDto>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageDetailDto {
    #[must_use]
    pub fn from_detail(detail: &ImageDetail) -> Self {
        let summary = ImageDto::from_feed_row(&detail.row);
        Self {
            id: summary.id,
            title: summary.title,
            description: summary.description,
            tags: summary.tags,
            media_url: summary.media_url,
            uploader: summary.uploader,
            like_count: summary.like_count,
            save_count: summary.save_count,
            comment_count: summary.comment_count,
            liked: summary.liked,
            saved: summary.saved,
            comments: detail.comments.iter().map(CommentDto::from_row).collect(),
            created_at: summary.created_at,
            updated_at: summary.updated_at,
        }
    }
}

/// Feed page envelope. `count` is rows on this page, `total` matches the
/// filter across all pages, `pages` is the last page number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedDto {
    pub images: Vec<ImageDto>,
    pub count: u64,
    pub total: u64,
    pub page: u64,
    pub pages: u64,
}

impl FeedDto {
    #[must_use]
    pub fn from_page(page: &FeedPage) -> Self {
        Self {
            images: page.rows.iter().map(ImageDto::from_feed_row).collect(),
            count: page.rows.len() as u64,
            total: page.total,
            page: page.page,
            pages: page.pages,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionDto {
    pub id: String,
    pub title: String,
    pub description: String,
    pub owner: UserSummaryDto,
    pub is_private: bool,
    pub image_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CollectionDto {
    #[must_use]
    pub fn from_row(row: &CollectionRow) -> Self {
        Self {
            id: row.collection.id.to_string(),
            title: row.collection.title.as_str().to_string(),
            description: row.collection.description.as_str().to_string(),
            owner: UserSummaryDto::from_author(&row.owner),
            is_private: row.collection.is_private,
            image_count: row.image_count,
            cover_url: row.cover_url.clone(),
            created_at: row.collection.created_at,
            updated_at: row.collection.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionDetailDto {
    pub id: String,
    pub title: String,
    pub description: String,
    pub owner: UserSummaryDto,
    pub is_private: bool,
    pub image_count: u64,
    pub images: Vec<ImageDto>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CollectionDetailDto {
    #[must_use]
    pub fn from_detail(detail: &CollectionDetail) -> Self {
        Self {
            id: detail.collection.id.to_string(),
            title: detail.collection.title.as_str().to_string(),
            description: detail.collection.description.as_str().to_string(),
            owner: UserSummaryDto::from_author(&detail.owner),
            is_private: detail.collection.is_private,
            image_count: detail.images.len() as u64,
            images: detail.images.iter().map(ImageDto::from_feed_row).collect(),
            created_at: detail.collection.created_at,
            updated_at: detail.collection.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionListDto {
    pub collections: Vec<CollectionDto>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserListDto {
    pub users: Vec<UserDto>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LikeDto {
    pub like_count: u64,
    pub liked: bool,
}

impl LikeDto {
    #[must_use]
    pub fn from_outcome(outcome: &LikeOutcome) -> Self {
        Self {
            like_count: outcome.like_count,
            liked: outcome.liked,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SaveDto {
    pub save_count: u64,
    pub saved: bool,
}

impl SaveDto {
    #[must_use]
    pub fn from_outcome(outcome: &SaveOutcome) -> Self {
        Self {
            save_count: outcome.save_count,
            saved: outcome.saved,
        }
    }
}

/// Returned by register and login. The token is a bearer credential; clients
/// present it as `Authorization: Bearer <token>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthSessionDto {
    pub token: String,
    pub user: UserDto,
}
