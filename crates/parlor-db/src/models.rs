//! Row mapping between SQLite text columns and the shared domain types.
//! Ids are stored as hyphenated UUID text, timestamps as fixed-width
//! RFC 3339 so that lexical order is chronological order.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use parlor_types::actor::Role;
use parlor_types::models::{
    Channel, ChannelKind, ChannelState, Message, MessageBody, MessageType, Participant, User,
};

pub(crate) const CHANNEL_COLUMNS: &str =
    "c.id, c.name, c.kind, c.state, c.is_visible, c.creator_id, c.created_at, c.updated_at, c.deleted_at";

pub(crate) const PARTICIPANT_COLUMNS: &str =
    "p.id, p.channel_id, p.user_id, p.pinned, p.joined_at, p.left_at";

pub(crate) const MESSAGE_COLUMNS: &str =
    "m.id, m.channel_id, m.author_id, m.kind, m.text, m.payload, m.created_at";

pub(crate) const USER_COLUMNS: &str = "u.id, u.username, u.role, u.created_at";

pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn now() -> String {
    timestamp(Utc::now())
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn invalid(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    conversion_error(
        idx,
        std::io::Error::new(std::io::ErrorKind::InvalidData, format!("bad {}: {}", what, value)),
    )
}

pub(crate) fn get_id(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

pub(crate) fn get_opt_id(row: &Row, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| s.parse().map_err(|e| conversion_error(idx, e))).transpose()
}

pub(crate) fn get_time(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn get_opt_time(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

/// Map a row selected with [`CHANNEL_COLUMNS`] starting at column 0.
pub(crate) fn channel(row: &Row) -> rusqlite::Result<Channel> {
    let kind: String = row.get(2)?;
    let state: String = row.get(3)?;
    Ok(Channel {
        id: get_id(row, 0)?,
        name: row.get(1)?,
        kind: ChannelKind::parse(&kind).ok_or_else(|| invalid(2, "channel kind", &kind))?,
        state: ChannelState::parse(&state).ok_or_else(|| invalid(3, "channel state", &state))?,
        is_visible: row.get(4)?,
        creator_id: get_opt_id(row, 5)?,
        created_at: get_time(row, 6)?,
        updated_at: get_time(row, 7)?,
        deleted_at: get_opt_time(row, 8)?,
    })
}

pub(crate) fn participant(row: &Row) -> rusqlite::Result<Participant> {
    Ok(Participant {
        id: get_id(row, 0)?,
        channel_id: get_id(row, 1)?,
        user_id: get_id(row, 2)?,
        pinned: row.get(3)?,
        joined_at: get_time(row, 4)?,
        left_at: get_opt_time(row, 5)?,
    })
}

pub(crate) fn message(row: &Row) -> rusqlite::Result<Message> {
    let kind: String = row.get(3)?;
    let kind = MessageType::parse(&kind).ok_or_else(|| invalid(3, "message kind", &kind))?;
    let text: Option<String> = row.get(4)?;
    let payload: Option<String> = row.get(5)?;
    let payload = payload
        .map(|p| serde_json::from_str(&p).map_err(|e| conversion_error(5, e)))
        .transpose()?;
    let body = MessageBody::from_parts(kind, text, payload).map_err(|e| conversion_error(5, e))?;

    Ok(Message {
        id: get_id(row, 0)?,
        channel_id: get_id(row, 1)?,
        author_id: get_opt_id(row, 2)?,
        body,
        created_at: get_time(row, 6)?,
    })
}

pub(crate) fn user(row: &Row) -> rusqlite::Result<User> {
    let role: String = row.get(2)?;
    Ok(User {
        id: get_id(row, 0)?,
        username: row.get(1)?,
        role: Role::parse(&role).ok_or_else(|| invalid(2, "role", &role))?,
        created_at: get_time(row, 3)?,
    })
}
