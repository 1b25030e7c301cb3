// SPDX-License-Identifier: Apache-2.0

use crate::db::{bad_col, now_millis, ts_col};
use crate::{StoreError, StoreErrorCode};
use openworld_model::{
    Comment, CommentBody, CommentId, Image, ImageDescription, ImageId, ImageTitle, Tag, TagSet,
    UserId, UserName,
};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};
use std::collections::HashMap;

/// Most search terms a single query is allowed to fan out into.
const MAX_SEARCH_TERMS: usize = 8;

const FEED_COLUMNS: &str = "i.id, i.title, i.description, i.media_url, i.storage_key, \
     i.uploaded_by, i.created_at, i.updated_at, u.name, u.profile_image_url";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorSummary {
    pub id: UserId,
    pub name: UserName,
    pub profile_image_url: String,
}

#[derive(Debug, Clone)]
pub struct NewImage {
    pub id: ImageId,
    pub title: ImageTitle,
    pub description: ImageDescription,
    pub tags: TagSet,
    pub media_url: String,
    pub storage_key: Option<String>,
    pub uploaded_by: UserId,
}

#[derive(Debug, Clone, Default)]
pub struct ImageUpdate {
    pub title: Option<ImageTitle>,
    pub description: Option<ImageDescription>,
    pub tags: Option<TagSet>,
}

/// Filterable feed request. All filters AND together; within `tags` an
/// image matches if it carries any of the listed tags.
#[derive(Debug, Clone)]
pub struct ImageFeedQuery {
    pub tags: Vec<Tag>,
    pub search: Option<String>,
    pub uploaded_by: Option<UserId>,
    pub saved_by: Option<UserId>,
    pub page: u64,
    pub limit: u64,
}

impl Default for ImageFeedQuery {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            search: None,
            uploaded_by: None,
            saved_by: None,
            page: 1,
            limit: 20,
        }
    }
}

/// One feed entry: the image plus the aggregates every list view renders.
/// `liked`/`saved` are relative to the viewer and false for anonymous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRow {
    pub image: Image,
    pub uploader: AuthorSummary,
    pub like_count: u64,
    pub save_count: u64,
    pub comment_count: u64,
    pub liked: bool,
    pub saved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPage {
    pub rows: Vec<FeedRow>,
    pub total: u64,
    pub page: u64,
    pub pages: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentWithAuthor {
    pub comment: Comment,
    pub author: AuthorSummary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDetail {
    pub row: FeedRow,
    pub comments: Vec<CommentWithAuthor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeOutcome {
    pub like_count: u64,
    pub liked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOutcome {
    pub save_count: u64,
    pub saved: bool,
}

pub(crate) fn feed_row_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<FeedRow> {
    let id: String = row.get(0)?;
    let title: String = row.get(1)?;
    let description: String = row.get(2)?;
    let uploaded_by: String = row.get(5)?;
    let uploader_name: String = row.get(8)?;
    let uploaded_by = UserId::parse(&uploaded_by).map_err(|e| bad_col(5, e))?;
    Ok(FeedRow {
        image: Image {
            id: ImageId::parse(&id).map_err(|e| bad_col(0, e))?,
            title: ImageTitle::parse(&title).map_err(|e| bad_col(1, e))?,
            description: ImageDescription::parse(&description).map_err(|e| bad_col(2, e))?,
            tags: TagSet::default(),
            media_url: row.get(3)?,
            storage_key: row.get(4)?,
            uploaded_by,
            created_at: ts_col(row, 6)?,
            updated_at: ts_col(row, 7)?,
        },
        uploader: AuthorSummary {
            id: uploaded_by,
            name: UserName::parse(&uploader_name).map_err(|e| bad_col(8, e))?,
            profile_image_url: row.get(9)?,
        },
        like_count: row.get::<_, i64>(10)? as u64,
        save_count: row.get::<_, i64>(11)? as u64,
        comment_count: row.get::<_, i64>(12)? as u64,
        liked: row.get::<_, i64>(13)? != 0,
        saved: row.get::<_, i64>(14)? != 0,
    })
}

pub(crate) fn aggregate_select(viewer: Option<&UserId>) -> (String, Vec<Value>) {
    let mut params_vec: Vec<Value> = Vec::new();
    let flags = if let Some(viewer) = viewer {
        params_vec.push(Value::Text(viewer.to_string()));
        params_vec.push(Value::Text(viewer.to_string()));
        "EXISTS(SELECT 1 FROM image_likes v WHERE v.image_id = i.id AND v.user_id = ?), \
         EXISTS(SELECT 1 FROM image_saves w WHERE w.image_id = i.id AND w.user_id = ?)"
            .to_string()
    } else {
        "0, 0".to_string()
    };
    let select = format!(
        "SELECT {FEED_COLUMNS}, \
         (SELECT COUNT(*) FROM image_likes l WHERE l.image_id = i.id), \
         (SELECT COUNT(*) FROM image_saves s WHERE s.image_id = i.id), \
         (SELECT COUNT(*) FROM comments c WHERE c.image_id = i.id), \
         {flags} \
         FROM images i JOIN users u ON u.id = i.uploaded_by"
    );
    (select, params_vec)
}

/// Turns free text into an FTS5 MATCH expression: each term becomes a
/// quoted prefix query, terms OR together. Returns `None` when nothing
/// searchable is left.
fn fts_match_expr(search: &str) -> Option<String> {
    let terms: Vec<String> = search
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .take(MAX_SEARCH_TERMS)
        .map(|t| format!("\"{}\"*", t.to_lowercase()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

fn build_feed_where(query: &ImageFeedQuery) -> (Vec<String>, Vec<Value>) {
    let mut where_parts: Vec<String> = Vec::new();
    let mut params_vec: Vec<Value> = Vec::new();

    if !query.tags.is_empty() {
        let placeholders = vec!["?"; query.tags.len()].join(", ");
        where_parts.push(format!(
            "i.id IN (SELECT image_id FROM image_tags WHERE tag IN ({placeholders}))"
        ));
        for tag in &query.tags {
            params_vec.push(Value::Text(tag.as_str().to_string()));
        }
    }
    if let Some(search) = &query.search {
        match fts_match_expr(search) {
            Some(expr) => {
                where_parts.push(
                    "i.id IN (SELECT image_id FROM images_fts WHERE images_fts MATCH ?)"
                        .to_string(),
                );
                params_vec.push(Value::Text(expr));
            }
            // a search that tokenizes to nothing matches nothing
            None => where_parts.push("0 = 1".to_string()),
        }
    }
    if let Some(uploader) = &query.uploaded_by {
        where_parts.push("i.uploaded_by = ?".to_string());
        params_vec.push(Value::Text(uploader.to_string()));
    }
    if let Some(saver) = &query.saved_by {
        where_parts.push(
            "i.id IN (SELECT image_id FROM image_saves WHERE user_id = ?)".to_string(),
        );
        params_vec.push(Value::Text(saver.to_string()));
    }

    (where_parts, params_vec)
}

pub(crate) fn fill_tags(conn: &Connection, rows: &mut [FeedRow]) -> Result<(), StoreError> {
    if rows.is_empty() {
        return Ok(());
    }
    let placeholders = vec!["?"; rows.len()].join(", ");
    let sql = format!(
        "SELECT image_id, tag FROM image_tags WHERE image_id IN ({placeholders}) ORDER BY rowid"
    );
    let ids: Vec<Value> = rows
        .iter()
        .map(|r| Value::Text(r.image.id.to_string()))
        .collect();
    let mut stmt = conn.prepare(&sql)?;
    let mut by_image: HashMap<String, Vec<Tag>> = HashMap::new();
    let mapped = stmt.query_map(params_from_iter(ids.iter()), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for pair in mapped {
        let (image_id, raw) = pair?;
        let tag = Tag::parse(&raw)
            .map_err(|e| StoreError::new(StoreErrorCode::Internal, e.to_string()))?;
        by_image.entry(image_id).or_default().push(tag);
    }
    for row in rows {
        if let Some(tags) = by_image.remove(&row.image.id.to_string()) {
            row.image.tags = TagSet::new(tags)
                .map_err(|e| StoreError::new(StoreErrorCode::Internal, e.to_string()))?;
        }
    }
    Ok(())
}

fn fetch_feed_row(
    conn: &Connection,
    id: &ImageId,
    viewer: Option<&UserId>,
) -> Result<Option<FeedRow>, StoreError> {
    let (select, mut params_vec) = aggregate_select(viewer);
    let sql = format!("{select} WHERE i.id = ?");
    params_vec.push(Value::Text(id.to_string()));
    let row = conn
        .query_row(&sql, params_from_iter(params_vec.iter()), feed_row_from_sql)
        .optional()?;
    let Some(mut row) = row else {
        return Ok(None);
    };
    fill_tags(conn, std::slice::from_mut(&mut row))?;
    Ok(Some(row))
}

pub fn query_feed(
    conn: &Connection,
    query: &ImageFeedQuery,
    viewer: Option<&UserId>,
) -> Result<FeedPage, StoreError> {
    let (where_parts, where_params) = build_feed_where(query);
    let where_clause = if where_parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_parts.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM images i{where_clause}");
    let total: i64 = conn.query_row(
        &count_sql,
        params_from_iter(where_params.iter()),
        |row| row.get(0),
    )?;
    let total = total as u64;

    let (select, viewer_params) = aggregate_select(viewer);
    let sql = format!(
        "{select}{where_clause} ORDER BY i.created_at DESC, i.id DESC LIMIT ? OFFSET ?"
    );
    let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
    let offset = i64::try_from(query.page.saturating_sub(1).saturating_mul(query.limit))
        .unwrap_or(i64::MAX);
    let mut params_vec = viewer_params;
    params_vec.extend(where_params);
    params_vec.push(Value::Integer(limit));
    params_vec.push(Value::Integer(offset));

    let mut stmt = conn.prepare_cached(&sql)?;
    let mapped = stmt.query_map(params_from_iter(params_vec.iter()), feed_row_from_sql)?;
    let mut rows: Vec<FeedRow> = mapped.collect::<Result<Vec<_>, _>>()?;
    fill_tags(conn, &mut rows)?;

    let pages = if query.limit == 0 {
        0
    } else {
        total.div_ceil(query.limit)
    };
    Ok(FeedPage {
        rows,
        total,
        page: query.page,
        pages,
    })
}

pub fn insert_image(conn: &mut Connection, new: &NewImage) -> Result<FeedRow, StoreError> {
    let now = now_millis();
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO images (id, title, description, media_url, storage_key, uploaded_by, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            new.id.to_string(),
            new.title.as_str(),
            new.description.as_str(),
            new.media_url,
            new.storage_key,
            new.uploaded_by.to_string(),
            now,
            now,
        ],
    )?;
    for tag in new.tags.iter() {
        tx.execute(
            "INSERT INTO image_tags (image_id, tag) VALUES (?1, ?2)",
            params![new.id.to_string(), tag.as_str()],
        )?;
    }
    tx.execute(
        "INSERT INTO images_fts (image_id, title, description) VALUES (?1, ?2, ?3)",
        params![new.id.to_string(), new.title.as_str(), new.description.as_str()],
    )?;
    tx.commit()?;
    fetch_feed_row(conn, &new.id, Some(&new.uploaded_by))?
        .ok_or_else(|| StoreError::not_found("image"))
}

pub fn fetch_image(
    conn: &Connection,
    id: &ImageId,
    viewer: Option<&UserId>,
) -> Result<Option<ImageDetail>, StoreError> {
    let Some(row) = fetch_feed_row(conn, id, viewer)? else {
        return Ok(None);
    };
    let mut stmt = conn.prepare_cached(
        "SELECT c.id, c.user_id, c.body, c.created_at, u.name, u.profile_image_url \
         FROM comments c JOIN users u ON u.id = c.user_id \
         WHERE c.image_id = ?1 ORDER BY c.created_at ASC, c.rowid ASC",
    )?;
    let mapped = stmt.query_map(params![id.to_string()], comment_from_sql)?;
    let comments = mapped.collect::<Result<Vec<_>, _>>()?;
    Ok(Some(ImageDetail { row, comments }))
}

pub fn fetch_image_owner(
    conn: &Connection,
    id: &ImageId,
) -> Result<Option<UserId>, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT uploaded_by FROM images WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => Ok(Some(UserId::parse(&raw).map_err(|e| {
            StoreError::new(StoreErrorCode::Internal, e.to_string())
        })?)),
        None => Ok(None),
    }
}

pub fn update_image(
    conn: &mut Connection,
    id: &ImageId,
    update: &ImageUpdate,
    viewer: Option<&UserId>,
) -> Result<FeedRow, StoreError> {
    let tx = conn.transaction()?;
    let mut set_parts: Vec<String> = Vec::new();
    let mut params_vec: Vec<Value> = Vec::new();
    if let Some(title) = &update.title {
        set_parts.push("title = ?".to_string());
        params_vec.push(Value::Text(title.as_str().to_string()));
    }
    if let Some(description) = &update.description {
        set_parts.push("description = ?".to_string());
        params_vec.push(Value::Text(description.as_str().to_string()));
    }
    set_parts.push("updated_at = ?".to_string());
    params_vec.push(Value::Integer(now_millis()));
    params_vec.push(Value::Text(id.to_string()));

    let sql = format!("UPDATE images SET {} WHERE id = ?", set_parts.join(", "));
    let affected = tx.execute(&sql, params_from_iter(params_vec.iter()))?;
    if affected == 0 {
        return Err(StoreError::not_found("image"));
    }
    if let Some(tags) = &update.tags {
        tx.execute(
            "DELETE FROM image_tags WHERE image_id = ?1",
            params![id.to_string()],
        )?;
        for tag in tags.iter() {
            tx.execute(
                "INSERT INTO image_tags (image_id, tag) VALUES (?1, ?2)",
                params![id.to_string(), tag.as_str()],
            )?;
        }
    }
    // keep the search index in step with whatever the row now says
    tx.execute(
        "DELETE FROM images_fts WHERE image_id = ?1",
        params![id.to_string()],
    )?;
    tx.execute(
        "INSERT INTO images_fts (image_id, title, description) \
         SELECT id, title, description FROM images WHERE id = ?1",
        params![id.to_string()],
    )?;
    tx.commit()?;
    fetch_feed_row(conn, id, viewer)?.ok_or_else(|| StoreError::not_found("image"))
}

/// Removes the image row and its index entries. Returns the storage key the
/// record pointed at, if the platform owns the object.
pub fn delete_image(conn: &mut Connection, id: &ImageId) -> Result<Option<String>, StoreError> {
    let tx = conn.transaction()?;
    let storage_key: Option<String> = tx
        .query_row(
            "SELECT storage_key FROM images WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("image"))?;
    tx.execute(
        "DELETE FROM images_fts WHERE image_id = ?1",
        params![id.to_string()],
    )?;
    tx.execute("DELETE FROM images WHERE id = ?1", params![id.to_string()])?;
    tx.commit()?;
    Ok(storage_key)
}

pub fn toggle_like(
    conn: &mut Connection,
    id: &ImageId,
    user: &UserId,
) -> Result<LikeOutcome, StoreError> {
    let tx = conn.transaction()?;
    let exists: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM images WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(StoreError::not_found("image"));
    }
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO image_likes (image_id, user_id, liked_at) VALUES (?1, ?2, ?3)",
        params![id.to_string(), user.to_string(), now_millis()],
    )?;
    let liked = if inserted == 0 {
        tx.execute(
            "DELETE FROM image_likes WHERE image_id = ?1 AND user_id = ?2",
            params![id.to_string(), user.to_string()],
        )?;
        false
    } else {
        true
    };
    let like_count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM image_likes WHERE image_id = ?1",
        params![id.to_string()],
        |row| row.get(0),
    )?;
    tx.commit()?;
    Ok(LikeOutcome {
        like_count: like_count as u64,
        liked,
    })
}

pub fn toggle_save(
    conn: &mut Connection,
    id: &ImageId,
    user: &UserId,
) -> Result<SaveOutcome, StoreError> {
    let tx = conn.transaction()?;
    let exists: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM images WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(StoreError::not_found("image"));
    }
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO image_saves (image_id, user_id, saved_at) VALUES (?1, ?2, ?3)",
        params![id.to_string(), user.to_string(), now_millis()],
    )?;
    let saved = if inserted == 0 {
        tx.execute(
            "DELETE FROM image_saves WHERE image_id = ?1 AND user_id = ?2",
            params![id.to_string(), user.to_string()],
        )?;
        false
    } else {
        true
    };
    let save_count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM image_saves WHERE image_id = ?1",
        params![id.to_string()],
        |row| row.get(0),
    )?;
    tx.commit()?;
    Ok(SaveOutcome {
        save_count: save_count as u64,
        saved,
    })
}

fn comment_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommentWithAuthor> {
    let id: String = row.get(0)?;
    let author_id: String = row.get(1)?;
    let body: String = row.get(2)?;
    let author_name: String = row.get(4)?;
    let author_id = UserId::parse(&author_id).map_err(|e| bad_col(1, e))?;
    Ok(CommentWithAuthor {
        comment: Comment {
            id: CommentId::parse(&id).map_err(|e| bad_col(0, e))?,
            author: author_id,
            body: CommentBody::parse(&body).map_err(|e| bad_col(2, e))?,
            created_at: ts_col(row, 3)?,
        },
        author: AuthorSummary {
            id: author_id,
            name: UserName::parse(&author_name).map_err(|e| bad_col(4, e))?,
            profile_image_url: row.get(5)?,
        },
    })
}

pub fn add_comment(
    conn: &mut Connection,
    image: &ImageId,
    author: &UserId,
    body: &CommentBody,
) -> Result<CommentWithAuthor, StoreError> {
    let tx = conn.transaction()?;
    let exists: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM images WHERE id = ?1",
            params![image.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(StoreError::not_found("image"));
    }
    let id = CommentId::new_random();
    tx.execute(
        "INSERT INTO comments (id, image_id, user_id, body, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            id.to_string(),
            image.to_string(),
            author.to_string(),
            body.as_str(),
            now_millis(),
        ],
    )?;
    let row = tx.query_row(
        "SELECT c.id, c.user_id, c.body, c.created_at, u.name, u.profile_image_url \
         FROM comments c JOIN users u ON u.id = c.user_id WHERE c.id = ?1",
        params![id.to_string()],
        comment_from_sql,
    )?;
    tx.commit()?;
    Ok(row)
}

pub fn fetch_comment(
    conn: &Connection,
    image: &ImageId,
    id: &CommentId,
) -> Result<Option<CommentWithAuthor>, StoreError> {
    conn.query_row(
        "SELECT c.id, c.user_id, c.body, c.created_at, u.name, u.profile_image_url \
         FROM comments c JOIN users u ON u.id = c.user_id \
         WHERE c.image_id = ?1 AND c.id = ?2",
        params![image.to_string(), id.to_string()],
        comment_from_sql,
    )
    .optional()
    .map_err(StoreError::from)
}

pub fn delete_comment(
    conn: &Connection,
    image: &ImageId,
    id: &CommentId,
) -> Result<(), StoreError> {
    let affected = conn.execute(
        "DELETE FROM comments WHERE id = ?1 AND image_id = ?2",
        params![id.to_string(), image.to_string()],
    )?;
    if affected == 0 {
        return Err(StoreError::not_found("comment"));
    }
    Ok(())
}

pub fn count_images_by_user(conn: &Connection, user: &UserId) -> Result<u64, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM images WHERE uploaded_by = ?1",
        params![user.to_string()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}
