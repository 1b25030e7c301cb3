//! Request handlers, grouped by resource. Shared plumbing (error envelope,
//! auth extraction, id parsing) lives in [`handlers`].

mod auth;
mod collections;
mod handlers;
mod images;
mod users;

pub(crate) use auth::{
    forgot_password_handler, login_handler, me_handler, register_handler, reset_password_handler,
};
pub(crate) use collections::{
    add_collection_image_handler, collection_detail_handler, create_collection_handler,
    delete_collection_handler, list_collections_handler, remove_collection_image_handler,
    update_collection_handler,
};
pub(crate) use handlers::{
    fallback_handler, healthz_handler, metrics_handler, readyz_handler, version_handler,
};
pub(crate) use images::{
    add_comment_handler, delete_comment_handler, delete_image_handler, feed_handler,
    image_detail_handler, like_image_handler, save_image_handler, update_image_handler,
    upload_image_handler,
};
pub(crate) use users::{
    delete_user_handler, get_user_handler, list_users_handler, profile_image_handler,
    update_profile_handler, user_images_handler, user_saved_handler,
};
