use crate::errors::ApiError;
use openworld_model::{Tag, UserId, MAX_TAGS};
use std::collections::BTreeMap;

pub const DEFAULT_PAGE_LIMIT: u64 = 20;
pub const MAX_PAGE_LIMIT: u64 = 100;
pub const MAX_SEARCH_LEN: usize = 200;

const ALLOWED_FEED_PARAMS: [&str; 5] = ["page", "limit", "tags", "search", "user"];
const ALLOWED_PAGE_PARAMS: [&str; 2] = ["page", "limit"];
const ALLOWED_COLLECTION_LIST_PARAMS: [&str; 1] = ["user"];

/// Offset pagination, 1-based. `page` and `limit` fall back to defaults
/// when absent; present-but-garbage values are rejected rather than
/// silently coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParams {
    pub page: u64,
    pub limit: u64,
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedParams {
    pub page: PageParams,
    pub tags: Vec<Tag>,
    pub search: Option<String>,
    pub user: Option<UserId>,
}

fn reject_unknown(query: &BTreeMap<String, String>, allowed: &[&str]) -> Result<(), ApiError> {
    for (key, value) in query {
        if !allowed.contains(&key.as_str()) {
            return Err(ApiError::invalid_param(key, value));
        }
    }
    Ok(())
}

fn parse_page_pair(query: &BTreeMap<String, String>) -> Result<PageParams, ApiError> {
    let page = if let Some(raw) = query.get("page") {
        let value = raw
            .parse::<u64>()
            .map_err(|_| ApiError::invalid_param("page", raw))?;
        if value == 0 {
            return Err(ApiError::invalid_param("page", raw));
        }
        value
    } else {
        1
    };

    let limit = if let Some(raw) = query.get("limit") {
        let value = raw
            .parse::<u64>()
            .map_err(|_| ApiError::invalid_param("limit", raw))?;
        if value == 0 || value > MAX_PAGE_LIMIT {
            return Err(ApiError::invalid_param("limit", raw));
        }
        value
    } else {
        DEFAULT_PAGE_LIMIT
    };

    Ok(PageParams { page, limit })
}

pub fn parse_page_params(query: &BTreeMap<String, String>) -> Result<PageParams, ApiError> {
    reject_unknown(query, &ALLOWED_PAGE_PARAMS)?;
    parse_page_pair(query)
}

pub fn parse_feed_params(query: &BTreeMap<String, String>) -> Result<FeedParams, ApiError> {
    reject_unknown(query, &ALLOWED_FEED_PARAMS)?;
    let page = parse_page_pair(query)?;

    let mut tags = Vec::new();
    if let Some(raw) = query.get("tags") {
        for piece in raw.split(',') {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            let tag = Tag::parse(piece).map_err(|_| ApiError::invalid_param("tags", raw))?;
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        if tags.len() > MAX_TAGS {
            return Err(ApiError::invalid_param("tags", raw));
        }
    }

    let search = match query.get("search") {
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                None
            } else if trimmed.len() > MAX_SEARCH_LEN {
                return Err(ApiError::invalid_param("search", raw));
            } else {
                Some(trimmed.to_string())
            }
        }
        None => None,
    };

    let user = match query.get("user") {
        Some(raw) if !raw.trim().is_empty() => {
            Some(UserId::parse(raw).map_err(|_| ApiError::invalid_param("user", raw))?)
        }
        _ => None,
    };

    Ok(FeedParams {
        page,
        tags,
        search,
        user,
    })
}

/// The collections list endpoint takes an optional `user` filter and
/// nothing else.
pub fn parse_collection_list_params(
    query: &BTreeMap<String, String>,
) -> Result<Option<UserId>, ApiError> {
    reject_unknown(query, &ALLOWED_COLLECTION_LIST_PARAMS)?;
    match query.get("user") {
        Some(raw) if !raw.trim().is_empty() => Ok(Some(
            UserId::parse(raw).map_err(|_| ApiError::invalid_param("user", raw))?,
        )),
        _ => Ok(None),
    }
}
