//! Local mirror of the user directory: who exists and who blocked whom.
//!
//! A block is directed (`source` blocked `destination`) but hides content in
//! both directions: neither side sees the other's messages or shared channels.

use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::info;
use uuid::Uuid;

use parlor_types::actor::Role;
use parlor_types::models::User;

use crate::error::{ChatError, Result};
use crate::models::{self, USER_COLUMNS, now};
use crate::{Database, placeholders};

impl Database {
    /// Insert the user or refresh their username and role.
    pub fn ensure_user(&self, id: Uuid, username: &str, role: Role) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, role, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET username = excluded.username, role = excluded.role",
                params![id.to_string(), username, role.as_str(), now()],
            )?;
            Ok(())
        })
    }

    pub fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users u WHERE u.id = ?1", USER_COLUMNS);
            let user = conn.query_row(&sql, [id.to_string()], models::user).optional()?;
            Ok(user)
        })
    }

    /// Batch-fetch users by id. Unknown ids are absent from the map.
    pub fn users_by_ids(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, User>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM users u WHERE u.id IN ({})",
                USER_COLUMNS,
                placeholders(ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let users = stmt
                .query_map(params_from_iter(ids.iter().map(|id| id.to_string())), models::user)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(users.into_iter().map(|u| (u.id, u)).collect())
        })
    }

    pub fn block_user(&self, source: Uuid, destination: Uuid) -> Result<()> {
        if source == destination {
            return Err(ChatError::bad_request("cannot block yourself"));
        }
        self.with_conn(|conn| {
            for id in [source, destination] {
                if !user_exists(conn, id)? {
                    return Err(ChatError::not_found(format!("user {}", id)));
                }
            }
            conn.execute(
                "INSERT OR IGNORE INTO blocks (source_id, destination_id, created_at) VALUES (?1, ?2, ?3)",
                params![source.to_string(), destination.to_string(), now()],
            )?;
            info!("{} blocked {}", source, destination);
            Ok(())
        })
    }

    pub fn unblock_user(&self, source: Uuid, destination: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM blocks WHERE source_id = ?1 AND destination_id = ?2",
                params![source.to_string(), destination.to_string()],
            )?;
            Ok(())
        })
    }

    /// True when either user has blocked the other.
    pub fn is_block_related(&self, a: Uuid, b: Uuid) -> Result<bool> {
        self.with_conn(|conn| block_related(conn, a, b))
    }
}

pub(crate) fn user_exists(conn: &Connection, id: Uuid) -> Result<bool> {
    let found = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
        [id.to_string()],
        |r| r.get(0),
    )?;
    Ok(found)
}

pub(crate) fn block_related(conn: &Connection, a: Uuid, b: Uuid) -> Result<bool> {
    let found = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM blocks
                       WHERE (source_id = ?1 AND destination_id = ?2)
                          OR (source_id = ?2 AND destination_id = ?1))",
        [a.to_string(), b.to_string()],
        |r| r.get(0),
    )?;
    Ok(found)
}
