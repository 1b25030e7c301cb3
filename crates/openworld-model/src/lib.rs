#![forbid(unsafe_code)]
//! Open World domain model SSOT.
//!
//! Every entity the platform persists or serves is defined here as a
//! validated type: constructors parse, invalid states do not exist past
//! this crate's boundary.

mod collection;
mod ids;
mod image;
mod user;

pub use collection::{
    Collection, CollectionDescription, CollectionTitle, COLLECTION_DESCRIPTION_MAX_LEN,
    COLLECTION_TITLE_MAX_LEN,
};
pub use ids::{CollectionId, CommentId, ImageId, UserId, ValidationError};
pub use image::{
    Comment, CommentBody, Image, ImageDescription, ImageTitle, Tag, TagSet, COMMENT_MAX_LEN,
    DESCRIPTION_MAX_LEN, MAX_TAGS, TAG_MAX_LEN, TITLE_MAX_LEN,
};
pub use user::{
    Bio, Email, Role, User, UserName, BIO_MAX_LEN, DEFAULT_PROFILE_IMAGE_URL, EMAIL_LOCAL_MAX_LEN,
    EMAIL_MAX_LEN, NAME_MAX_LEN,
};

pub const CRATE_NAME: &str = "openworld-model";
