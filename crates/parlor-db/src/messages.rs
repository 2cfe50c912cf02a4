use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::debug;
use uuid::Uuid;

use parlor_types::api::{MessageFilter, MessageSort};
use parlor_types::models::{Channel, ChannelState, Message, MessageBody, MessageType, PayloadNode};
use parlor_types::pagination::{Connection as Page, PageArgs};

use crate::channels::require_channel;
use crate::directory::user_exists;
use crate::error::{ChatError, Result};
use crate::models::{self, MESSAGE_COLUMNS, timestamp};
use crate::pagination::{self, Query, SortKey, SortOrder};
use crate::{Database, placeholders};

/// Drops messages whose author is in a block relation with the viewer.
/// Binds the viewer twice.
pub(crate) const BLOCKED_AUTHOR_FILTER: &str = "(m.author_id IS NULL OR NOT EXISTS (
        SELECT 1 FROM blocks b
        WHERE (b.source_id = ? AND b.destination_id = m.author_id)
           OR (b.source_id = m.author_id AND b.destination_id = ?)
    ))";

/// A stored message together with who should be told about it.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message: Message,
    pub channel: Channel,
    /// Active participants other than the author, minus anyone in a block
    /// relation with the author.
    pub recipients: Vec<Uuid>,
}

/// Which messages a listing draws from.
#[derive(Debug, Clone, Copy)]
pub enum MessageScope {
    /// One channel, filtered for what `viewer` may see.
    Channel { channel_id: Uuid, viewer: Uuid },
    /// Every live message.
    All,
}

impl Database {
    /// Persist a message. Fails without writing anything when the channel is
    /// inactive or has fewer than two active participants.
    pub fn send_message(
        &self,
        channel_id: Uuid,
        author_id: Option<Uuid>,
        body: &MessageBody,
    ) -> Result<SentMessage> {
        if let MessageBody::Text { text } = body {
            if text.trim().is_empty() {
                return Err(ChatError::bad_request("text message requires text"));
            }
        }
        let payload = body.payload()?.map(|p| p.to_string());

        self.with_tx(|tx| {
            if let Some(author_id) = author_id {
                if !user_exists(tx, author_id)? {
                    return Err(ChatError::not_found(format!("user {}", author_id)));
                }
            }
            let mut channel = require_channel(tx, channel_id)?;
            if channel.state == ChannelState::Inactive {
                return Err(ChatError::bad_request("channel is inactive"));
            }

            let members = active_member_ids(tx, channel_id)?;
            if members.len() <= 1 {
                return Err(ChatError::bad_request("channel needs more than one participant"));
            }

            let message = Message {
                id: Uuid::new_v4(),
                channel_id,
                author_id,
                body: body.clone(),
                created_at: Utc::now(),
            };
            let created_at = timestamp(message.created_at);

            tx.execute(
                "INSERT INTO messages (id, channel_id, author_id, kind, text, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    message.id.to_string(),
                    channel_id.to_string(),
                    author_id.map(|a| a.to_string()),
                    body.message_type().as_str(),
                    body.text_content(),
                    payload,
                    created_at,
                ],
            )?;

            // Authors have read their own messages.
            if let Some(author_id) = author_id {
                tx.execute(
                    "INSERT INTO message_reads (message_id, user_id, read_at) VALUES (?1, ?2, ?3)",
                    params![message.id.to_string(), author_id.to_string(), created_at],
                )?;
            }

            tx.execute(
                "UPDATE channels SET updated_at = ?1 WHERE id = ?2",
                params![created_at, channel_id.to_string()],
            )?;
            channel.updated_at = message.created_at;

            let recipients = match author_id {
                Some(author_id) => notify_recipient_ids(tx, channel_id, author_id)?,
                None => members,
            };
            debug!(
                "Stored {} message {} in {}",
                body.message_type().as_str(),
                message.id,
                channel_id
            );

            Ok(SentMessage {
                message,
                channel,
                recipients,
            })
        })
    }

    pub fn find_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Mark every message in the channel as read by `user_id`.
    /// Already-read messages are left alone. Returns how many were newly read.
    pub fn read_all(&self, channel_id: Uuid, user_id: Uuid) -> Result<usize> {
        self.with_tx(|tx| {
            require_channel(tx, channel_id)?;
            if !user_exists(tx, user_id)? {
                return Err(ChatError::not_found(format!("user {}", user_id)));
            }
            let added = tx.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
                 SELECT m.id, ?1, ?2 FROM messages m
                 WHERE m.channel_id = ?3 AND m.deleted_at IS NULL",
                params![user_id.to_string(), models::now(), channel_id.to_string()],
            )?;
            Ok(added)
        })
    }

    /// Users who have read a message, ordered by id.
    pub fn read_set(&self, message_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM message_reads WHERE message_id = ?1 ORDER BY user_id",
            )?;
            let ids = stmt
                .query_map([message_id.to_string()], |r| models::get_id(r, 0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
    }

    /// Delete messages. Fails with NotFound, deleting nothing, if any id is unknown.
    pub fn delete_messages(&self, ids: &[Uuid]) -> Result<usize> {
        let mut unique = ids.to_vec();
        unique.sort();
        unique.dedup();
        if unique.is_empty() {
            return Err(ChatError::not_found("message"));
        }

        self.with_tx(|tx| {
            let bound: Vec<String> = unique.iter().map(|id| id.to_string()).collect();
            let in_list = placeholders(bound.len());

            let live: i64 = tx.query_row(
                &format!(
                    "SELECT COUNT(*) FROM messages WHERE deleted_at IS NULL AND id IN ({})",
                    in_list
                ),
                params_from_iter(bound.iter()),
                |r| r.get(0),
            )?;
            if live as usize != unique.len() {
                return Err(ChatError::not_found("message"));
            }

            let removed = tx.execute(
                &format!("DELETE FROM messages WHERE id IN ({})", in_list),
                params_from_iter(bound.iter()),
            )?;
            debug!("Deleted {} messages", removed);
            Ok(removed)
        })
    }

    pub fn delete_message(&self, id: Uuid) -> Result<()> {
        self.delete_messages(&[id]).map(|_| ())
    }

    pub fn list_messages(
        &self,
        scope: MessageScope,
        filter: &MessageFilter,
        sort: MessageSort,
        args: &PageArgs,
    ) -> Result<Page<Message>> {
        let query = message_query(scope, filter);
        let order = message_order(sort);
        self.with_conn(|conn| pagination::paginate(conn, &query, &order, args, models::message))
    }

    pub fn count_messages(&self, scope: MessageScope, filter: &MessageFilter) -> Result<i64> {
        let query = message_query(scope, filter);
        self.with_conn(|conn| pagination::count(conn, &query))
    }

    /// Gallery view: payloads of FILE, IMAGE and VIDEO messages, newest first.
    pub fn list_payloads(
        &self,
        channel_id: Uuid,
        viewer: Uuid,
        args: &PageArgs,
    ) -> Result<Page<PayloadNode>> {
        let query = payload_query(channel_id, viewer);
        let order = message_order(MessageSort::CreatedAtDesc);
        self.with_conn(|conn| {
            pagination::paginate(conn, &query, &order, args, |row| {
                let message = models::message(row)?;
                Ok(PayloadNode {
                    message_id: message.id,
                    body: message.body,
                    created_at: message.created_at,
                })
            })
        })
    }

    pub fn count_payloads(&self, channel_id: Uuid, viewer: Uuid) -> Result<i64> {
        let query = payload_query(channel_id, viewer);
        self.with_conn(|conn| pagination::count(conn, &query))
    }
}

pub(crate) fn query_message(conn: &Connection, id: Uuid) -> Result<Option<Message>> {
    let sql = format!(
        "SELECT {} FROM messages m
         JOIN channels c ON c.id = m.channel_id AND c.deleted_at IS NULL
         WHERE m.id = ?1 AND m.deleted_at IS NULL",
        MESSAGE_COLUMNS
    );
    let message = conn.query_row(&sql, [id.to_string()], models::message).optional()?;
    Ok(message)
}

fn active_member_ids(conn: &Connection, channel_id: Uuid) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM participants WHERE channel_id = ?1 AND left_at IS NULL ORDER BY joined_at, id",
    )?;
    let ids = stmt
        .query_map([channel_id.to_string()], |r| models::get_id(r, 0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

fn notify_recipient_ids(conn: &Connection, channel_id: Uuid, author_id: Uuid) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare(
        "SELECT p.user_id FROM participants p
         WHERE p.channel_id = ?1 AND p.left_at IS NULL AND p.user_id <> ?2
           AND NOT EXISTS (
               SELECT 1 FROM blocks b
               WHERE (b.source_id = ?2 AND b.destination_id = p.user_id)
                  OR (b.source_id = p.user_id AND b.destination_id = ?2)
           )
         ORDER BY p.joined_at, p.id",
    )?;
    let ids = stmt
        .query_map([channel_id.to_string(), author_id.to_string()], |r| models::get_id(r, 0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

fn base_query() -> Query {
    let mut query = Query::new(
        MESSAGE_COLUMNS,
        "FROM messages m JOIN channels c ON c.id = m.channel_id AND c.deleted_at IS NULL",
        vec![],
    );
    query.filter("m.deleted_at IS NULL", vec![]);
    query
}

fn scoped(query: &mut Query, channel_id: Uuid, viewer: Uuid) {
    let viewer = Value::Text(viewer.to_string());
    query.filter("m.channel_id = ?", vec![Value::Text(channel_id.to_string())]);
    query.filter(BLOCKED_AUTHOR_FILTER, vec![viewer.clone(), viewer]);
}

fn message_query(scope: MessageScope, filter: &MessageFilter) -> Query {
    let mut query = base_query();
    if let MessageScope::Channel { channel_id, viewer } = scope {
        scoped(&mut query, channel_id, viewer);
    }

    if let Some(channel_id) = filter.channel_id {
        query.filter("m.channel_id = ?", vec![Value::Text(channel_id.to_string())]);
    }
    if let Some(kind) = filter.kind {
        query.filter("m.kind = ?", vec![Value::Text(kind.as_str().into())]);
    }
    if let Some(author_id) = filter.author_id {
        query.filter("m.author_id = ?", vec![Value::Text(author_id.to_string())]);
    }
    if let Some(at) = filter.created_after {
        query.filter("m.created_at > ?", vec![Value::Text(timestamp(at))]);
    }
    if let Some(at) = filter.created_before {
        query.filter("m.created_at < ?", vec![Value::Text(timestamp(at))]);
    }
    query
}

fn payload_query(channel_id: Uuid, viewer: Uuid) -> Query {
    let mut query = base_query();
    scoped(&mut query, channel_id, viewer);
    let kinds: Vec<Value> = MessageType::MEDIA
        .iter()
        .map(|k| Value::Text(k.as_str().into()))
        .collect();
    query.filter(format!("m.kind IN ({})", placeholders(kinds.len())), kinds);
    query
}

fn message_order(sort: MessageSort) -> SortOrder {
    let keys = match sort {
        MessageSort::CreatedAtDesc => vec![SortKey::desc("m.created_at")],
        MessageSort::CreatedAtAsc => vec![SortKey::asc("m.created_at")],
    };
    SortOrder::new(keys, "m.id")
}
