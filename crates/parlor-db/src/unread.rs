//! Unread counts, recomputed on every request. A message is unread by a
//! participant when it was posted after they joined, they are not in its
//! read set, and its author is not block-related to them.

use std::collections::HashMap;

use rusqlite::params_from_iter;
use uuid::Uuid;

use crate::error::Result;
use crate::messages::BLOCKED_AUTHOR_FILTER;
use crate::models;
use crate::{Database, placeholders};

impl Database {
    /// Unread messages for `user_id` in one channel. Zero when not a participant.
    pub fn unread_count(&self, channel_id: Uuid, user_id: Uuid) -> Result<i64> {
        Ok(self
            .unread_counts(&[channel_id], user_id)?
            .get(&channel_id)
            .copied()
            .unwrap_or(0))
    }

    /// Unread counts for several channels in one grouped query. Channels with
    /// nothing unread are absent from the map.
    pub fn unread_counts(&self, channel_ids: &[Uuid], user_id: Uuid) -> Result<HashMap<Uuid, i64>> {
        if channel_ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT m.channel_id, COUNT(*) FROM messages m
                 JOIN participants p
                   ON p.channel_id = m.channel_id AND p.user_id = ? AND p.left_at IS NULL
                 WHERE m.deleted_at IS NULL
                   AND m.created_at > p.joined_at
                   AND NOT EXISTS (SELECT 1 FROM message_reads r
                                   WHERE r.message_id = m.id AND r.user_id = p.user_id)
                   AND {}
                   AND m.channel_id IN ({})
                 GROUP BY m.channel_id",
                BLOCKED_AUTHOR_FILTER,
                placeholders(channel_ids.len())
            );

            let user = user_id.to_string();
            let mut bound = vec![user.clone(), user.clone(), user];
            bound.extend(channel_ids.iter().map(|id| id.to_string()));

            let mut stmt = conn.prepare(&sql)?;
            let counts = stmt
                .query_map(params_from_iter(bound.iter()), |r| {
                    Ok((models::get_id(r, 0)?, r.get::<_, i64>(1)?))
                })?
                .collect::<rusqlite::Result<HashMap<_, _>>>()?;
            Ok(counts)
        })
    }
}
