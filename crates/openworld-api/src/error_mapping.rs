// SPDX-License-Identifier: Apache-2.0

use crate::{ApiError, ApiErrorCode};

/// Single source of truth for error code to HTTP status mapping.
#[must_use]
pub fn map_error(error: &ApiError) -> u16 {
    match error.code {
        ApiErrorCode::InvalidBody | ApiErrorCode::InvalidQueryParameter => 400,
        ApiErrorCode::Unauthorized => 401,
        ApiErrorCode::Forbidden => 403,
        ApiErrorCode::NotFound => 404,
        ApiErrorCode::Conflict => 409,
        ApiErrorCode::PayloadTooLarge => 413,
        ApiErrorCode::RateLimited => 429,
        ApiErrorCode::Internal => 500,
    }
}
