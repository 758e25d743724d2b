use agora_types::models::UserProfile;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::error::is_unique_violation;
use crate::models::UserRow;
use crate::{Database, Error, Result};

/// Shortest accepted search term, counted in characters after trimming.
pub const MIN_SEARCH_TERM: usize = 2;
const SEARCH_LIMIT: i64 = 10;
const LIST_LIMIT: i64 = 100;

const USER_COLUMNS: &str = "id, name, email, password_hash, avatar, bio, created_at";

impl Database {
    /// Insert a new account. A taken email is a `Conflict`.
    pub fn create_user(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
        bio: Option<&str>,
    ) -> Result<UserProfile> {
        let created_at = Utc::now();
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (name, email, password_hash, bio, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![name, email, password_hash, bio, created_at],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(Error::Conflict(format!("email {email} already registered")));
                }
                Err(e) => return Err(e.into()),
            }

            Ok(UserProfile {
                id: conn.last_insert_rowid(),
                name: name.to_string(),
                email: email.to_string(),
                avatar: None,
                bio: bio.map(str::to_string),
                created_at,
            })
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1");
            Ok(conn.query_row(&sql, [email], user_row).optional()?)
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserProfile>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    /// Replace a user's name, email and bio, and the password hash when one
    /// is given. An email held by another account is a `Conflict`.
    pub fn update_user(
        &self,
        id: i64,
        name: &str,
        email: &str,
        bio: Option<&str>,
        password_hash: Option<&str>,
    ) -> Result<UserProfile> {
        self.with_conn_mut(|conn| {
            if !user_exists(conn, id)? {
                return Err(Error::NotFound("user"));
            }
            let taken = conn
                .query_row(
                    "SELECT 1 FROM users WHERE email = ?1 AND id != ?2",
                    rusqlite::params![email, id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if taken {
                return Err(Error::Conflict(format!("email {email} is used by another account")));
            }

            let updated = conn.execute(
                "UPDATE users
                 SET name = ?2, email = ?3, bio = ?4,
                     password_hash = COALESCE(?5, password_hash)
                 WHERE id = ?1",
                rusqlite::params![id, name, email, bio, password_hash],
            );
            match updated {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(Error::Conflict(format!("email {email} is used by another account")));
                }
                Err(e) => return Err(e.into()),
            }

            query_user(conn, id)?.ok_or(Error::NotFound("user"))
        })
    }

    /// Up to 100 users in registration order.
    pub fn list_users(&self) -> Result<Vec<UserProfile>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id LIMIT ?1");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([LIST_LIMIT], user_row)?
                .map(|r| r.map(UserRow::into_profile))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Case-insensitive substring match over name, email and bio. Case is
    /// folded with full Unicode rules, so `álv` finds `ÁLVARO`.
    pub fn search_users(&self, term: &str, exclude_id: i64) -> Result<Vec<UserProfile>> {
        let term = term.trim();
        if term.chars().count() < MIN_SEARCH_TERM {
            return Err(Error::InvalidRequest(format!(
                "search term must have at least {MIN_SEARCH_TERM} characters"
            )));
        }

        let pattern = format!("%{}%", escape_like(&term.to_lowercase()));
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE (unicode_lower(name) LIKE ?1 ESCAPE '\\'
                        OR unicode_lower(email) LIKE ?1 ESCAPE '\\'
                        OR unicode_lower(bio) LIKE ?1 ESCAPE '\\')
                   AND id != ?2
                 ORDER BY name, id
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![pattern, exclude_id, SEARCH_LIMIT], user_row)?
                .map(|r| r.map(UserRow::into_profile))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

pub(crate) fn query_user(conn: &Connection, id: i64) -> Result<Option<UserProfile>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    let row = conn.query_row(&sql, [id], user_row).optional()?;
    Ok(row.map(UserRow::into_profile))
}

pub(crate) fn user_exists(conn: &Connection, id: i64) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM users WHERE id = ?1", [id], |_| Ok(()))
        .optional()?
        .is_some())
}

fn user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        avatar: row.get(4)?,
        bio: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
