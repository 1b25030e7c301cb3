// SPDX-License-Identifier: Apache-2.0

use crate::{StoreError, StoreErrorCode};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL COLLATE NOCASE UNIQUE,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'user',
    profile_image_url TEXT NOT NULL DEFAULT '',
    profile_storage_key TEXT,
    bio TEXT NOT NULL DEFAULT '',
    reset_token_hash TEXT,
    reset_expires_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS images (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    media_url TEXT NOT NULL,
    storage_key TEXT,
    uploaded_by TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_images_uploaded_by ON images(uploaded_by);
CREATE INDEX IF NOT EXISTS idx_images_feed_order ON images(created_at DESC, id DESC);

CREATE TABLE IF NOT EXISTS image_tags (
    image_id TEXT NOT NULL REFERENCES images(id) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    PRIMARY KEY (image_id, tag)
);
CREATE INDEX IF NOT EXISTS idx_image_tags_tag ON image_tags(tag);

CREATE TABLE IF NOT EXISTS image_likes (
    image_id TEXT NOT NULL REFERENCES images(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    liked_at INTEGER NOT NULL,
    PRIMARY KEY (image_id, user_id)
);

CREATE TABLE IF NOT EXISTS image_saves (
    image_id TEXT NOT NULL REFERENCES images(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    saved_at INTEGER NOT NULL,
    PRIMARY KEY (image_id, user_id)
);
CREATE INDEX IF NOT EXISTS idx_image_saves_user ON image_saves(user_id);

CREATE TABLE IF NOT EXISTS comments (
    id TEXT PRIMARY KEY,
    image_id TEXT NOT NULL REFERENCES images(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    body TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_comments_image ON comments(image_id, created_at);

CREATE TABLE IF NOT EXISTS collections (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    owner TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    is_private INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_collections_owner ON collections(owner);

CREATE TABLE IF NOT EXISTS collection_images (
    collection_id TEXT NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
    image_id TEXT NOT NULL REFERENCES images(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    PRIMARY KEY (collection_id, image_id)
);

CREATE VIRTUAL TABLE IF NOT EXISTS images_fts USING fts5(
    image_id UNINDEXED,
    title,
    description
);
"#;

/// Handle to the sqlite database file. Cheap to clone; each caller opens
/// its own connection via [`Database::connect`].
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    /// Opens (creating if needed) the database at `path` and applies the
    /// schema. The parent directory must already exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Self {
            path: path.as_ref().to_path_buf(),
        };
        let conn = db.connect()?;
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(StoreError::from)?;
        if version < SCHEMA_VERSION {
            conn.execute_batch(SCHEMA).map_err(StoreError::from)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(StoreError::from)?;
        }
        Ok(db)
    }

    pub fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path).map_err(|e| {
            StoreError::new(
                StoreErrorCode::Io,
                format!("open {}: {e}", self.path.display()),
            )
        })?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\
             PRAGMA synchronous = NORMAL;\
             PRAGMA foreign_keys = ON;",
        )
        .map_err(StoreError::from)?;
        conn.busy_timeout(Duration::from_millis(5000))
            .map_err(StoreError::from)?;
        conn.set_prepared_statement_cache_capacity(64);
        Ok(conn)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn ts_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Integer,
            Box::new(rusqlite::types::FromSqlError::OutOfRange(ms)),
        )
    })
}

/// Wraps a domain parse failure on a value read back from the database.
/// Rows are validated on the way in, so hitting this means the file was
/// edited out from under us.
pub(crate) fn bad_col(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(err),
    )
}
