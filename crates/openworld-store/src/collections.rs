// SPDX-License-Identifier: Apache-2.0

use crate::db::{bad_col, now_millis, ts_col};
use crate::images::{aggregate_select, fill_tags, AuthorSummary, FeedRow};
use crate::{StoreError, StoreErrorCode};
use openworld_model::{
    Collection, CollectionDescription, CollectionId, CollectionTitle, ImageId, UserId, UserName,
};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};

const COLLECTION_COLUMNS: &str = "k.id, k.title, k.description, k.owner, k.is_private, \
     k.created_at, k.updated_at, u.name, u.profile_image_url";

#[derive(Debug, Clone)]
pub struct NewCollection {
    pub id: CollectionId,
    pub title: CollectionTitle,
    pub description: CollectionDescription,
    pub owner: UserId,
    pub is_private: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CollectionUpdate {
    pub title: Option<CollectionTitle>,
    pub description: Option<CollectionDescription>,
    pub is_private: Option<bool>,
}

/// List-view projection: the collection plus its owner, size and the first
/// member's media URL as a cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRow {
    pub collection: Collection,
    pub owner: AuthorSummary,
    pub image_count: u64,
    pub cover_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDetail {
    pub collection: Collection,
    pub owner: AuthorSummary,
    pub images: Vec<FeedRow>,
}

fn collection_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<CollectionRow> {
    let id: String = row.get(0)?;
    let title: String = row.get(1)?;
    let description: String = row.get(2)?;
    let owner: String = row.get(3)?;
    let owner_name: String = row.get(7)?;
    let owner = UserId::parse(&owner).map_err(|e| bad_col(3, e))?;
    Ok(CollectionRow {
        collection: Collection {
            id: CollectionId::parse(&id).map_err(|e| bad_col(0, e))?,
            title: CollectionTitle::parse(&title).map_err(|e| bad_col(1, e))?,
            description: CollectionDescription::parse(&description)
                .map_err(|e| bad_col(2, e))?,
            owner,
            is_private: row.get::<_, i64>(4)? != 0,
            created_at: ts_col(row, 5)?,
            updated_at: ts_col(row, 6)?,
        },
        owner: AuthorSummary {
            id: owner,
            name: UserName::parse(&owner_name).map_err(|e| bad_col(7, e))?,
            profile_image_url: row.get(8)?,
        },
        image_count: row.get::<_, i64>(9)? as u64,
        cover_url: row.get(10)?,
    })
}

fn collection_select() -> String {
    format!(
        "SELECT {COLLECTION_COLUMNS}, \
         (SELECT COUNT(*) FROM collection_images m WHERE m.collection_id = k.id), \
         (SELECT i.media_url FROM collection_images m JOIN images i ON i.id = m.image_id \
          WHERE m.collection_id = k.id ORDER BY m.position ASC LIMIT 1) \
         FROM collections k JOIN users u ON u.id = k.owner"
    )
}

fn fetch_collection_row(
    conn: &Connection,
    id: &CollectionId,
) -> Result<Option<CollectionRow>, StoreError> {
    let sql = format!("{} WHERE k.id = ?1", collection_select());
    conn.query_row(&sql, params![id.to_string()], collection_from_sql)
        .optional()
        .map_err(StoreError::from)
}

pub fn insert_collection(
    conn: &Connection,
    new: &NewCollection,
) -> Result<CollectionRow, StoreError> {
    let now = now_millis();
    conn.execute(
        "INSERT INTO collections (id, title, description, owner, is_private, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            new.id.to_string(),
            new.title.as_str(),
            new.description.as_str(),
            new.owner.to_string(),
            new.is_private as i64,
            now,
            now,
        ],
    )?;
    fetch_collection_row(conn, &new.id)?
        .ok_or_else(|| StoreError::not_found("collection"))
}

pub fn list_collections(
    conn: &Connection,
    owner: &UserId,
    include_private: bool,
) -> Result<Vec<CollectionRow>, StoreError> {
    let mut sql = format!("{} WHERE k.owner = ?1", collection_select());
    if !include_private {
        sql.push_str(" AND k.is_private = 0");
    }
    sql.push_str(" ORDER BY k.created_at DESC, k.id DESC");
    let mut stmt = conn.prepare_cached(&sql)?;
    let mapped = stmt.query_map(params![owner.to_string()], collection_from_sql)?;
    mapped
        .collect::<Result<Vec<_>, _>>()
        .map_err(StoreError::from)
}

pub fn fetch_collection_owner(
    conn: &Connection,
    id: &CollectionId,
) -> Result<Option<(UserId, bool)>, StoreError> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT owner, is_private FROM collections WHERE id = ?1",
            params![id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match row {
        Some((owner, is_private)) => {
            let owner = UserId::parse(&owner)
                .map_err(|e| StoreError::new(StoreErrorCode::Internal, e.to_string()))?;
            Ok(Some((owner, is_private != 0)))
        }
        None => Ok(None),
    }
}

pub fn fetch_collection(
    conn: &Connection,
    id: &CollectionId,
    viewer: Option<&UserId>,
) -> Result<Option<CollectionDetail>, StoreError> {
    let Some(base) = fetch_collection_row(conn, id)? else {
        return Ok(None);
    };
    let (select, mut params_vec) = aggregate_select(viewer);
    let sql = format!(
        "{select} JOIN collection_images m ON m.image_id = i.id \
         WHERE m.collection_id = ? ORDER BY m.position ASC"
    );
    params_vec.push(Value::Text(id.to_string()));
    let mut stmt = conn.prepare_cached(&sql)?;
    let mapped = stmt.query_map(
        params_from_iter(params_vec.iter()),
        crate::images::feed_row_from_sql,
    )?;
    let mut images: Vec<FeedRow> = mapped.collect::<Result<Vec<_>, _>>()?;
    fill_tags(conn, &mut images)?;
    Ok(Some(CollectionDetail {
        collection: base.collection,
        owner: base.owner,
        images,
    }))
}

pub fn update_collection(
    conn: &Connection,
    id: &CollectionId,
    update: &CollectionUpdate,
) -> Result<CollectionRow, StoreError> {
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
    if let Some(is_private) = update.is_private {
        set_parts.push("is_private = ?".to_string());
        params_vec.push(Value::Integer(is_private as i64));
    }
    set_parts.push("updated_at = ?".to_string());
    params_vec.push(Value::Integer(now_millis()));
    params_vec.push(Value::Text(id.to_string()));

    let sql = format!(
        "UPDATE collections SET {} WHERE id = ?",
        set_parts.join(", ")
    );
    let affected = conn.execute(&sql, params_from_iter(params_vec.iter()))?;
    if affected == 0 {
        return Err(StoreError::not_found("collection"));
    }
    fetch_collection_row(conn, id)?.ok_or_else(|| StoreError::not_found("collection"))
}

pub fn delete_collection(conn: &Connection, id: &CollectionId) -> Result<(), StoreError> {
    let affected = conn.execute(
        "DELETE FROM collections WHERE id = ?1",
        params![id.to_string()],
    )?;
    if affected == 0 {
        return Err(StoreError::not_found("collection"));
    }
    Ok(())
}

/// Appends an image to a collection. Membership is a set: adding an image
/// that is already present is a conflict, not a reorder.
pub fn add_collection_image(
    conn: &mut Connection,
    id: &CollectionId,
    image: &ImageId,
    viewer: Option<&UserId>,
) -> Result<CollectionDetail, StoreError> {
    let tx = conn.transaction()?;
    let collection_exists: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM collections WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    if collection_exists.is_none() {
        return Err(StoreError::not_found("collection"));
    }
    let image_exists: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM images WHERE id = ?1",
            params![image.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    if image_exists.is_none() {
        return Err(StoreError::not_found("image"));
    }
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO collection_images (collection_id, image_id, position) \
         VALUES (?1, ?2, COALESCE((SELECT MAX(position) + 1 FROM collection_images WHERE collection_id = ?1), 0))",
        params![id.to_string(), image.to_string()],
    )?;
    if inserted == 0 {
        return Err(StoreError::new(
            StoreErrorCode::Conflict,
            "image already in collection",
        ));
    }
    tx.execute(
        "UPDATE collections SET updated_at = ?1 WHERE id = ?2",
        params![now_millis(), id.to_string()],
    )?;
    tx.commit()?;
    fetch_collection(conn, id, viewer)?.ok_or_else(|| StoreError::not_found("collection"))
}

pub fn remove_collection_image(
    conn: &Connection,
    id: &CollectionId,
    image: &ImageId,
) -> Result<(), StoreError> {
    let affected = conn.execute(
        "DELETE FROM collection_images WHERE collection_id = ?1 AND image_id = ?2",
        params![id.to_string(), image.to_string()],
    )?;
    if affected == 0 {
        return Err(StoreError::not_found("collection image"));
    }
    conn.execute(
        "UPDATE collections SET updated_at = ?1 WHERE id = ?2",
        params![now_millis(), id.to_string()],
    )?;
    Ok(())
}
