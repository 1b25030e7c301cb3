#![forbid(unsafe_code)]
//! Wire contract for the Open World HTTP API.
//!
//! DTO shapes, error codes and query parameter parsing live here so the
//! server crate stays a thin routing layer and the contract is testable
//! without booting a server.

mod dto;
mod error_mapping;
mod errors;
mod params;
mod requests;

pub use dto::{
    AuthSessionDto, CollectionDetailDto, CollectionDto, CollectionListDto, CommentDto, FeedDto,
    ImageDetailDto, ImageDto, LikeDto, SaveDto, UserDto, UserListDto, UserSummaryDto,
};
pub use error_mapping::map_error;
pub use errors::{ApiError, ApiErrorCode};
pub use params::{
    parse_collection_list_params, parse_feed_params, parse_page_params, FeedParams, PageParams,
    DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT, MAX_SEARCH_LEN,
};
pub use requests::{
    AddCollectionImageRequest, AddCommentRequest, CreateCollectionRequest, ForgotPasswordRequest,
    LoginRequest, RegisterRequest, ResetPasswordRequest, UpdateCollectionRequest,
    UpdateImageRequest, UpdateProfileRequest,
};

pub const CRATE_NAME: &str = "openworld-api";
pub const API_VERSION: &str = "v1";
