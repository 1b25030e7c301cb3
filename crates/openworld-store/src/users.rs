// SPDX-License-Identifier: Apache-2.0

use crate::db::{bad_col, now_millis, ts_col};
use crate::{StoreError, StoreErrorCode};
use chrono::{DateTime, Utc};
use openworld_model::{Bio, Email, Role, User, UserId, UserName};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};

const USER_COLUMNS: &str =
    "id, name, email, role, profile_image_url, bio, created_at, updated_at";

pub(crate) fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let email: String = row.get(2)?;
    let role: String = row.get(3)?;
    Ok(User {
        id: UserId::parse(&id).map_err(|e| bad_col(0, e))?,
        name: UserName::parse(&name).map_err(|e| bad_col(1, e))?,
        email: Email::parse(&email).map_err(|e| bad_col(2, e))?,
        role: Role::parse(&role).map_err(|e| bad_col(3, e))?,
        profile_image_url: row.get(4)?,
        bio: Bio::parse(&row.get::<_, String>(5)?).map_err(|e| bad_col(5, e))?,
        created_at: ts_col(row, 6)?,
        updated_at: ts_col(row, 7)?,
    })
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: UserId,
    pub name: UserName,
    pub email: Email,
    pub password_hash: String,
    pub role: Role,
    pub profile_image_url: String,
    pub bio: Bio,
}

/// A user row together with its credential hash. Only the auth paths see
/// this; everything else works with [`User`].
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<UserName>,
    pub bio: Option<Bio>,
    pub profile_image_url: Option<String>,
}

pub fn insert_user(conn: &Connection, new: &NewUser) -> Result<User, StoreError> {
    let now = now_millis();
    conn.execute(
        "INSERT INTO users (id, name, email, password_hash, role, profile_image_url, bio, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            new.id.to_string(),
            new.name.as_str(),
            new.email.as_str(),
            new.password_hash,
            new.role.as_str(),
            new.profile_image_url,
            new.bio.as_str(),
            now,
            now,
        ],
    )?;
    let created = DateTime::<Utc>::from_timestamp_millis(now)
        .ok_or_else(|| StoreError::new(StoreErrorCode::Internal, "clock out of range"))?;
    Ok(User {
        id: new.id,
        name: new.name.clone(),
        email: new.email.clone(),
        role: new.role,
        profile_image_url: new.profile_image_url.clone(),
        bio: new.bio.clone(),
        created_at: created,
        updated_at: created,
    })
}

pub fn fetch_user(conn: &Connection, id: &UserId) -> Result<Option<User>, StoreError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    conn.query_row(&sql, params![id.to_string()], user_from_row)
        .optional()
        .map_err(StoreError::from)
}

pub fn fetch_user_by_email(
    conn: &Connection,
    email: &Email,
) -> Result<Option<UserCredentials>, StoreError> {
    let sql = format!("SELECT {USER_COLUMNS}, password_hash FROM users WHERE email = ?1");
    conn.query_row(&sql, params![email.as_str()], |row| {
        Ok(UserCredentials {
            user: user_from_row(row)?,
            password_hash: row.get(8)?,
        })
    })
    .optional()
    .map_err(StoreError::from)
}

pub fn list_users(conn: &Connection) -> Result<Vec<User>, StoreError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, id DESC");
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map([], user_from_row)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

pub fn update_profile(
    conn: &Connection,
    id: &UserId,
    update: &ProfileUpdate,
) -> Result<User, StoreError> {
    let mut set_parts: Vec<String> = Vec::new();
    let mut params_vec: Vec<Value> = Vec::new();
    if let Some(name) = &update.name {
        set_parts.push("name = ?".to_string());
        params_vec.push(Value::Text(name.as_str().to_string()));
    }
    if let Some(bio) = &update.bio {
        set_parts.push("bio = ?".to_string());
        params_vec.push(Value::Text(bio.as_str().to_string()));
    }
    if let Some(url) = &update.profile_image_url {
        set_parts.push("profile_image_url = ?".to_string());
        params_vec.push(Value::Text(url.clone()));
    }
    set_parts.push("updated_at = ?".to_string());
    params_vec.push(Value::Integer(now_millis()));
    params_vec.push(Value::Text(id.to_string()));

    let sql = format!("UPDATE users SET {} WHERE id = ?", set_parts.join(", "));
    let affected = conn.execute(&sql, params_from_iter(params_vec.iter()))?;
    if affected == 0 {
        return Err(StoreError::not_found("user"));
    }
    fetch_user(conn, id)?.ok_or_else(|| StoreError::not_found("user"))
}

/// Points the profile at a freshly stored object. Returns the updated user
/// plus the previous storage key so the caller can clean up the old object.
pub fn update_profile_image(
    conn: &mut Connection,
    id: &UserId,
    url: &str,
    storage_key: &str,
) -> Result<(User, Option<String>), StoreError> {
    let tx = conn.transaction()?;
    let previous: Option<String> = tx
        .query_row(
            "SELECT profile_storage_key FROM users WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("user"))?;
    tx.execute(
        "UPDATE users SET profile_image_url = ?1, profile_storage_key = ?2, updated_at = ?3 WHERE id = ?4",
        params![url, storage_key, now_millis(), id.to_string()],
    )?;
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    let user = tx.query_row(&sql, params![id.to_string()], user_from_row)?;
    tx.commit()?;
    let previous = previous.filter(|old| old != storage_key);
    Ok((user, previous))
}

pub fn set_reset_token(
    conn: &Connection,
    id: &UserId,
    token_hash: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let affected = conn.execute(
        "UPDATE users SET reset_token_hash = ?1, reset_expires_at = ?2 WHERE id = ?3",
        params![token_hash, expires_at.timestamp_millis(), id.to_string()],
    )?;
    if affected == 0 {
        return Err(StoreError::not_found("user"));
    }
    Ok(())
}

pub fn fetch_user_by_reset_token(
    conn: &Connection,
    token_hash: &str,
    now: DateTime<Utc>,
) -> Result<Option<User>, StoreError> {
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users WHERE reset_token_hash = ?1 AND reset_expires_at > ?2"
    );
    conn.query_row(&sql, params![token_hash, now.timestamp_millis()], user_from_row)
        .optional()
        .map_err(StoreError::from)
}

/// Replaces the credential hash and burns any outstanding reset token.
pub fn update_password(
    conn: &Connection,
    id: &UserId,
    password_hash: &str,
) -> Result<(), StoreError> {
    let affected = conn.execute(
        "UPDATE users SET password_hash = ?1, reset_token_hash = NULL, reset_expires_at = NULL, updated_at = ?2 \
         WHERE id = ?3",
        params![password_hash, now_millis(), id.to_string()],
    )?;
    if affected == 0 {
        return Err(StoreError::not_found("user"));
    }
    Ok(())
}

/// Removes the account and everything hanging off it. Returns the storage
/// keys of objects the account owned so the caller can delete them from
/// media storage; the database side cascades.
pub fn delete_user(conn: &mut Connection, id: &UserId) -> Result<Vec<String>, StoreError> {
    let tx = conn.transaction()?;
    let mut keys: Vec<String> = Vec::new();
    {
        let mut stmt = tx.prepare(
            "SELECT storage_key FROM images WHERE uploaded_by = ?1 AND storage_key IS NOT NULL",
        )?;
        let rows = stmt.query_map(params![id.to_string()], |row| row.get::<_, String>(0))?;
        for key in rows {
            keys.push(key?);
        }
    }
    let profile_key: Option<String> = tx
        .query_row(
            "SELECT profile_storage_key FROM users WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("user"))?;
    if let Some(key) = profile_key {
        keys.push(key);
    }
    // fts rows do not cascade with the images they index
    tx.execute(
        "DELETE FROM images_fts WHERE image_id IN (SELECT id FROM images WHERE uploaded_by = ?1)",
        params![id.to_string()],
    )?;
    tx.execute("DELETE FROM users WHERE id = ?1", params![id.to_string()])?;
    tx.commit()?;
    Ok(keys)
}
