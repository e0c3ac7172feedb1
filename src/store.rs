//! SQLite-backed persistence for users and pages.
//!
//! One [`Store`] wraps one connection. The schema is applied on open and is
//! idempotent, so opening a fresh path creates the database and opening an
//! existing one leaves it untouched.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use crate::{QuillpadError, Result};

/// A single user-owned Markdown note.
///
/// Serializes to the wire shape `{id, title, content, isFavorite}`; the owner
/// is enforced server-side and never leaves the process.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: i64,
    #[serde(skip)]
    pub user_id: i64,
    pub title: String,
    pub content: String,
    pub is_favorite: bool,
}

/// A registered account, including the password hash.
///
/// Not `Serialize`; handlers pick the fields they expose.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub name: String,
    pub theme: String,
    pub font: String,
    pub profile_image_url: Option<String>,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::initialize(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self { conn })
    }

    pub fn create_user(&self, username: &str, password_hash: &str, name: &str) -> Result<User> {
        if self.user_by_username(username)?.is_some() {
            return Err(QuillpadError::UsernameTaken(username.to_string()));
        }
        self.conn.execute(
            "INSERT INTO users (username, password_hash, name, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![username, password_hash, name, now_ts()],
        )?;
        let id = self.conn.last_insert_rowid();
        self.user_by_id(id)?.ok_or(QuillpadError::UserNotFound)
    }

    pub fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, username, password_hash, name, theme, font, profile_image_url
                 FROM users WHERE username = ?1",
                params![username],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn user_by_id(&self, id: i64) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, username, password_hash, name, theme, font, profile_image_url
                 FROM users WHERE id = ?1",
                params![id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn update_settings(&self, user_id: i64, theme: &str, font: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE users SET theme = ?1, font = ?2 WHERE id = ?3",
            params![theme, font, user_id],
        )?;
        if changed == 0 {
            return Err(QuillpadError::UserNotFound);
        }
        Ok(())
    }

    pub fn update_profile_image(&self, user_id: i64, image_url: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE users SET profile_image_url = ?1 WHERE id = ?2",
            params![image_url, user_id],
        )?;
        if changed == 0 {
            return Err(QuillpadError::UserNotFound);
        }
        Ok(())
    }

    pub fn create_page(&self, user_id: i64, title: &str, content: &str) -> Result<Page> {
        let now = now_ts();
        self.conn.execute(
            "INSERT INTO pages (user_id, title, content, is_favorite, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?4)",
            params![user_id, title, content, now],
        )?;
        Ok(Page {
            id: self.conn.last_insert_rowid(),
            user_id,
            title: title.to_string(),
            content: content.to_string(),
            is_favorite: false,
        })
    }

    /// All pages owned by `user_id`, in insertion (ascending id) order.
    pub fn pages_for_user(&self, user_id: i64) -> Result<Vec<Page>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, title, content, is_favorite
             FROM pages WHERE user_id = ?1 ORDER BY id",
        )?;
        let pages = stmt
            .query_map(params![user_id], page_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pages)
    }

    pub fn page_by_id(&self, id: i64) -> Result<Option<Page>> {
        let page = self
            .conn
            .query_row(
                "SELECT id, user_id, title, content, is_favorite
                 FROM pages WHERE id = ?1",
                params![id],
                page_from_row,
            )
            .optional()?;
        Ok(page)
    }

    /// Rewrites a page, provided it exists and belongs to `user_id`.
    ///
    /// Both conditions live in one WHERE clause, so a missing page and a
    /// page owned by someone else are indistinguishable to the caller.
    pub fn update_page(
        &self,
        user_id: i64,
        id: i64,
        title: &str,
        content: &str,
        is_favorite: bool,
    ) -> Result<Page> {
        let changed = self.conn.execute(
            "UPDATE pages SET title = ?1, content = ?2, is_favorite = ?3, updated_at = ?4
             WHERE id = ?5 AND user_id = ?6",
            params![title, content, is_favorite, now_ts(), id, user_id],
        )?;
        if changed == 0 {
            return Err(QuillpadError::Forbidden);
        }
        self.page_by_id(id)?.ok_or(QuillpadError::Forbidden)
    }

    /// Deletes a page, with the same combined existence-and-ownership check
    /// as [`Store::update_page`].
    pub fn delete_page(&self, user_id: i64, id: i64) -> Result<()> {
        let changed = self.conn.execute(
            "DELETE FROM pages WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        if changed == 0 {
            return Err(QuillpadError::Forbidden);
        }
        Ok(())
    }
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        name: row.get(3)?,
        theme: row.get(4)?,
        font: row.get(5)?,
        profile_image_url: row.get(6)?,
    })
}

fn page_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Page> {
    Ok(Page {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        is_favorite: row.get(4)?,
    })
}

fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
