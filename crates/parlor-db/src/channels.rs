use std::collections::HashMap;

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::info;
use uuid::Uuid;

use parlor_types::api::{ChannelFilter, ChannelSort};
use parlor_types::models::{Channel, ChannelKind, ChannelState, Participant};
use parlor_types::pagination::{Connection as Page, PageArgs};

use crate::directory::user_exists;
use crate::error::{ChatError, Result};
use crate::models::{self, CHANNEL_COLUMNS, PARTICIPANT_COLUMNS, now, timestamp};
use crate::pagination::{self, Query, SortKey, SortOrder};
use crate::{Database, placeholders};

/// Hides a channel from `?` when any other active participant is in a
/// block relation with them, in either direction. Binds the viewer 3 times.
pub(crate) const BLOCKED_PEER_ANTI_JOIN: &str = "NOT EXISTS (
        SELECT 1 FROM participants op
        JOIN blocks b
          ON (b.source_id = ? AND b.destination_id = op.user_id)
          OR (b.source_id = op.user_id AND b.destination_id = ?)
        WHERE op.channel_id = c.id AND op.left_at IS NULL AND op.user_id <> ?
    )";

#[derive(Debug, Clone)]
pub struct NewChannel {
    pub name: Option<String>,
    pub kind: ChannelKind,
    pub is_visible: bool,
}

/// Whose view a channel listing is computed for.
#[derive(Debug, Clone, Copy)]
pub enum ChannelScope {
    /// Only channels the user participates in, minus block-related ones.
    Member(Uuid),
    /// Every live channel; the admin's own pin state still sorts first.
    Admin(Uuid),
}

/// A listed channel plus the viewer's pin flag.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelListing {
    pub channel: Channel,
    pub pinned: bool,
}

impl Database {
    /// Create a channel with the creator and listed users as participants.
    pub fn create_channel(
        &self,
        new: &NewChannel,
        creator_id: Option<Uuid>,
        member_ids: &[Uuid],
    ) -> Result<Channel> {
        self.with_tx(|tx| insert_channel(tx, new, creator_id, member_ids))
    }

    /// The live DM between `a` and `b`, created when there is none. Lookup
    /// and insert run in one transaction.
    pub fn find_or_create_dm(&self, a: Uuid, b: Uuid) -> Result<Channel> {
        self.with_tx(|tx| {
            if let Some(existing) = query_dm_channel(tx, a, b)? {
                return Ok(existing);
            }
            let new = NewChannel {
                name: None,
                kind: ChannelKind::Dm,
                is_visible: false,
            };
            insert_channel(tx, &new, Some(a), &[b])
        })
    }

    pub fn join_channel(&self, channel_id: Uuid, user_id: Uuid) -> Result<Participant> {
        self.with_tx(|tx| {
            require_channel(tx, channel_id)?;
            if !user_exists(tx, user_id)? {
                return Err(ChatError::not_found(format!("user {}", user_id)));
            }
            if query_active_participant(tx, channel_id, user_id)?.is_some() {
                return Err(ChatError::bad_request("already joined"));
            }
            insert_participant(tx, channel_id, user_id)
        })
    }

    /// Leave a channel. Returns the channel as it is after the leave.
    pub fn leave_channel(&self, channel_id: Uuid, user_id: Uuid) -> Result<Channel> {
        self.with_tx(|tx| {
            require_channel(tx, channel_id)?;
            let changed = tx.execute(
                "UPDATE participants SET left_at = ?1
                 WHERE channel_id = ?2 AND user_id = ?3 AND left_at IS NULL",
                params![now(), channel_id.to_string(), user_id.to_string()],
            )?;
            if changed == 0 {
                return Err(ChatError::bad_request("not a participant"));
            }
            require_channel(tx, channel_id)
        })
    }

    /// Leave every listed channel the user is in. Channels where the user is
    /// not an active participant are skipped. Returns the channels left.
    pub fn leave_channels(&self, channel_ids: &[Uuid], user_id: Uuid) -> Result<Vec<Uuid>> {
        if channel_ids.is_empty() {
            return Ok(vec![]);
        }
        self.with_tx(|tx| {
            let sql = format!(
                "SELECT p.channel_id FROM participants p
                 JOIN channels c ON c.id = p.channel_id AND c.deleted_at IS NULL
                 WHERE p.user_id = ? AND p.left_at IS NULL AND p.channel_id IN ({})",
                placeholders(channel_ids.len())
            );
            let mut bound = vec![Value::Text(user_id.to_string())];
            bound.extend(channel_ids.iter().map(|id| Value::Text(id.to_string())));

            let mut stmt = tx.prepare(&sql)?;
            let joined = stmt
                .query_map(params_from_iter(bound.iter()), |r| models::get_id(r, 0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let at = now();
            for channel_id in &joined {
                tx.execute(
                    "UPDATE participants SET left_at = ?1
                     WHERE channel_id = ?2 AND user_id = ?3 AND left_at IS NULL",
                    params![at, channel_id.to_string(), user_id.to_string()],
                )?;
            }
            Ok(joined)
        })
    }

    /// Set the caller's own pin flag on a channel.
    pub fn set_pin(&self, channel_id: Uuid, user_id: Uuid, pinned: bool) -> Result<Participant> {
        self.with_tx(|tx| {
            require_channel(tx, channel_id)?;
            let changed = tx.execute(
                "UPDATE participants SET pinned = ?1
                 WHERE channel_id = ?2 AND user_id = ?3 AND left_at IS NULL",
                params![pinned, channel_id.to_string(), user_id.to_string()],
            )?;
            if changed == 0 {
                return Err(ChatError::not_found(format!("participant in channel {}", channel_id)));
            }
            query_active_participant(tx, channel_id, user_id)?
                .ok_or_else(|| {
                    ChatError::not_found(format!("participant in channel {}", channel_id))
                })
        })
    }

    pub fn set_channel_state(&self, channel_id: Uuid, state: ChannelState) -> Result<Channel> {
        self.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE channels SET state = ?1, updated_at = ?2 WHERE id = ?3 AND deleted_at IS NULL",
                params![state.as_str(), now(), channel_id.to_string()],
            )?;
            if changed == 0 {
                return Err(ChatError::not_found(format!("channel {}", channel_id)));
            }
            info!("Channel {} is now {}", channel_id, state.as_str());
            require_channel(tx, channel_id)
        })
    }

    /// Soft-delete channels, their participants and their messages together.
    /// Returns how many live channels were deleted.
    pub fn soft_delete_channels(&self, ids: &[Uuid]) -> Result<usize> {
        self.with_tx(|tx| {
            let live = live_channel_ids(tx, ids)?;
            if live.is_empty() {
                return Err(ChatError::not_found("channel"));
            }

            let at = now();
            for id in &live {
                let id = id.to_string();
                tx.execute("UPDATE channels SET deleted_at = ?1 WHERE id = ?2", params![at, id])?;
                tx.execute(
                    "UPDATE participants SET left_at = ?1 WHERE channel_id = ?2 AND left_at IS NULL",
                    params![at, id],
                )?;
                tx.execute(
                    "UPDATE messages SET deleted_at = ?1 WHERE channel_id = ?2 AND deleted_at IS NULL",
                    params![at, id],
                )?;
            }

            info!("Soft-deleted {} channels", live.len());
            Ok(live.len())
        })
    }

    /// Permanently delete channels that were already soft-deleted. Live
    /// channels in `ids` are left alone. Participants, messages and read
    /// receipts go with them through foreign-key cascades.
    pub fn purge_channels(&self, ids: &[Uuid]) -> Result<usize> {
        if ids.is_empty() {
            return Err(ChatError::not_found("channel"));
        }
        self.with_tx(|tx| {
            let sql = format!(
                "DELETE FROM channels WHERE deleted_at IS NOT NULL AND id IN ({})",
                placeholders(ids.len())
            );
            let removed = tx.execute(&sql, params_from_iter(ids.iter().map(|id| id.to_string())))?;
            if removed == 0 {
                return Err(ChatError::not_found("channel"));
            }
            info!("Purged {} channels", removed);
            Ok(removed)
        })
    }

    // -- Reads --

    pub fn find_channel(&self, id: Uuid) -> Result<Option<Channel>> {
        self.with_conn(|conn| query_channel(conn, id))
    }

    pub fn active_participant(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Participant>> {
        self.with_conn(|conn| query_active_participant(conn, channel_id, user_id))
    }

    pub fn channel_participants(&self, channel_id: Uuid) -> Result<Vec<Participant>> {
        Ok(self
            .participants_for_channels(&[channel_id])?
            .remove(&channel_id)
            .unwrap_or_default())
    }

    /// Active participants of several channels in one query.
    pub fn participants_for_channels(
        &self,
        channel_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<Participant>>> {
        if channel_ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM participants p
                 WHERE p.left_at IS NULL AND p.channel_id IN ({})
                 ORDER BY p.joined_at, p.id",
                PARTICIPANT_COLUMNS,
                placeholders(channel_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params_from_iter(channel_ids.iter().map(|id| id.to_string())),
                    models::participant,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut grouped: HashMap<Uuid, Vec<Participant>> = HashMap::new();
            for p in rows {
                grouped.entry(p.channel_id).or_default().push(p);
            }
            Ok(grouped)
        })
    }

    pub fn list_channels(
        &self,
        scope: ChannelScope,
        filter: &ChannelFilter,
        sort: ChannelSort,
        args: &PageArgs,
    ) -> Result<Page<ChannelListing>> {
        let query = channel_query(scope, filter);
        let order = channel_order(sort);
        self.with_conn(|conn| pagination::paginate(conn, &query, &order, args, channel_listing))
    }

    pub fn count_channels(&self, scope: ChannelScope, filter: &ChannelFilter) -> Result<i64> {
        let query = channel_query(scope, filter);
        self.with_conn(|conn| pagination::count(conn, &query))
    }

    /// The user's pinned channels, most recently active first.
    pub fn pinned_channels(&self, user_id: Uuid) -> Result<Vec<ChannelListing>> {
        let mut query = channel_query(ChannelScope::Member(user_id), &ChannelFilter::default());
        query.filter("p.pinned = 1", vec![]);
        let order = SortOrder::new(vec![SortKey::desc("c.updated_at")], "c.id");
        self.with_conn(|conn| pagination::fetch_all(conn, &query, &order, channel_listing))
    }
}

fn channel_listing(row: &rusqlite::Row) -> rusqlite::Result<ChannelListing> {
    Ok(ChannelListing {
        channel: models::channel(row)?,
        pinned: row.get(9)?,
    })
}

fn channel_query(scope: ChannelScope, filter: &ChannelFilter) -> Query {
    let (join, viewer) = match scope {
        ChannelScope::Member(user_id) => ("JOIN", user_id),
        ChannelScope::Admin(user_id) => ("LEFT JOIN", user_id),
    };
    let viewer = Value::Text(viewer.to_string());

    let mut query = Query::new(
        format!("{}, COALESCE(p.pinned, 0)", CHANNEL_COLUMNS),
        format!(
            "FROM channels c {} participants p
             ON p.channel_id = c.id AND p.user_id = ? AND p.left_at IS NULL",
            join
        ),
        vec![viewer.clone()],
    );
    query.filter("c.deleted_at IS NULL", vec![]);

    if let ChannelScope::Member(_) = scope {
        query.filter(BLOCKED_PEER_ANTI_JOIN, vec![viewer.clone(), viewer.clone(), viewer]);
    }

    if let Some(kind) = filter.kind {
        query.filter("c.kind = ?", vec![Value::Text(kind.as_str().into())]);
    }
    if let Some(state) = filter.state {
        query.filter("c.state = ?", vec![Value::Text(state.as_str().into())]);
    }
    if let Some(visible) = filter.visible {
        query.filter("c.is_visible = ?", vec![Value::Integer(visible as i64)]);
    }
    if let Some(at) = filter.created_after {
        query.filter("c.created_at > ?", vec![Value::Text(timestamp(at))]);
    }
    if let Some(at) = filter.created_before {
        query.filter("c.created_at < ?", vec![Value::Text(timestamp(at))]);
    }
    if let Some(at) = filter.updated_after {
        query.filter("c.updated_at > ?", vec![Value::Text(timestamp(at))]);
    }
    query
}

fn channel_order(sort: ChannelSort) -> SortOrder {
    let keys = match sort {
        ChannelSort::Default => vec![
            SortKey::desc("COALESCE(p.pinned, 0)"),
            SortKey::desc("c.updated_at"),
        ],
        ChannelSort::UpdatedAtAsc => vec![SortKey::asc("c.updated_at")],
        ChannelSort::CreatedAtDesc => vec![SortKey::desc("c.created_at")],
        ChannelSort::CreatedAtAsc => vec![SortKey::asc("c.created_at")],
    };
    SortOrder::new(keys, "c.id")
}

pub(crate) fn query_channel(conn: &Connection, id: Uuid) -> Result<Option<Channel>> {
    let sql = format!(
        "SELECT {} FROM channels c WHERE c.id = ?1 AND c.deleted_at IS NULL",
        CHANNEL_COLUMNS
    );
    let channel = conn.query_row(&sql, [id.to_string()], models::channel).optional()?;
    Ok(channel)
}

pub(crate) fn require_channel(conn: &Connection, id: Uuid) -> Result<Channel> {
    query_channel(conn, id)?.ok_or_else(|| ChatError::not_found(format!("channel {}", id)))
}

pub(crate) fn query_active_participant(
    conn: &Connection,
    channel_id: Uuid,
    user_id: Uuid,
) -> Result<Option<Participant>> {
    let sql = format!(
        "SELECT {} FROM participants p
         WHERE p.channel_id = ?1 AND p.user_id = ?2 AND p.left_at IS NULL",
        PARTICIPANT_COLUMNS
    );
    let participant = conn
        .query_row(&sql, [channel_id.to_string(), user_id.to_string()], models::participant)
        .optional()?;
    Ok(participant)
}

/// The live DM channel whose only active participants are `a` and `b`.
fn query_dm_channel(conn: &Connection, a: Uuid, b: Uuid) -> Result<Option<Channel>> {
    let sql = format!(
        "SELECT {} FROM channels c
         WHERE c.kind = 'DM' AND c.deleted_at IS NULL
           AND EXISTS (SELECT 1 FROM participants p
                       WHERE p.channel_id = c.id AND p.user_id = ?1 AND p.left_at IS NULL)
           AND EXISTS (SELECT 1 FROM participants p
                       WHERE p.channel_id = c.id AND p.user_id = ?2 AND p.left_at IS NULL)
           AND (SELECT COUNT(*) FROM participants p
                WHERE p.channel_id = c.id AND p.left_at IS NULL) = 2
         ORDER BY c.created_at, c.id
         LIMIT 1",
        CHANNEL_COLUMNS
    );
    let channel = conn
        .query_row(&sql, params![a.to_string(), b.to_string()], models::channel)
        .optional()?;
    Ok(channel)
}

fn insert_channel(
    conn: &Connection,
    new: &NewChannel,
    creator_id: Option<Uuid>,
    member_ids: &[Uuid],
) -> Result<Channel> {
    let mut members: Vec<Uuid> = Vec::with_capacity(member_ids.len() + 1);
    for id in creator_id.iter().chain(member_ids) {
        if !members.contains(id) {
            members.push(*id);
        }
    }
    for id in &members {
        if !user_exists(conn, *id)? {
            return Err(ChatError::not_found(format!("user {}", id)));
        }
    }

    let id = Uuid::new_v4();
    let at = now();
    conn.execute(
        "INSERT INTO channels (id, name, kind, state, is_visible, creator_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'ACTIVE', ?4, ?5, ?6, ?6)",
        params![
            id.to_string(),
            new.name,
            new.kind.as_str(),
            new.is_visible,
            creator_id.map(|c| c.to_string()),
            at,
        ],
    )?;
    for user_id in &members {
        insert_participant(conn, id, *user_id)?;
    }

    info!("Created {} channel {} with {} participants", new.kind.as_str(), id, members.len());
    require_channel(conn, id)
}

fn insert_participant(conn: &Connection, channel_id: Uuid, user_id: Uuid) -> Result<Participant> {
    let participant = Participant {
        id: Uuid::new_v4(),
        channel_id,
        user_id,
        pinned: false,
        joined_at: Utc::now(),
        left_at: None,
    };
    conn.execute(
        "INSERT INTO participants (id, channel_id, user_id, pinned, joined_at) VALUES (?1, ?2, ?3, 0, ?4)",
        params![
            participant.id.to_string(),
            channel_id.to_string(),
            user_id.to_string(),
            timestamp(participant.joined_at),
        ],
    )?;
    Ok(participant)
}

fn live_channel_ids(conn: &Connection, ids: &[Uuid]) -> Result<Vec<Uuid>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }
    let sql = format!(
        "SELECT id FROM channels WHERE deleted_at IS NULL AND id IN ({})",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let live = stmt
        .query_map(params_from_iter(ids.iter().map(|id| id.to_string())), |r| models::get_id(r, 0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(live)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageScope;
    use crate::testing::{db, room, user};
    use parlor_types::api::MessageFilter;
    use parlor_types::models::MessageBody;

    fn member_ids(db: &Database, channel_id: Uuid) -> Vec<Uuid> {
        db.channel_participants(channel_id)
            .unwrap()
            .into_iter()
            .map(|p| p.user_id)
            .collect()
    }

    fn participant_rows(db: &Database, channel_id: Uuid) -> i64 {
        db.with_conn(|conn| {
            let sql = "SELECT COUNT(*) FROM participants WHERE channel_id = ?1";
            Ok(conn.query_row(sql, [channel_id.to_string()], |r| r.get(0))?)
        })
        .unwrap()
    }

    fn listed(db: &Database, scope: ChannelScope) -> Vec<Uuid> {
        db.list_channels(
            scope,
            &ChannelFilter::default(),
            ChannelSort::Default,
            &PageArgs::first(50),
        )
        .unwrap()
            .nodes()
            .map(|l| l.channel.id)
            .collect()
    }

    #[test]
    fn create_adds_creator_and_members_once() {
        let db = db();
        let (a, b) = (user(&db, "a"), user(&db, "b"));
        let channel = room(&db, a, &[b, a, b]);

        assert_eq!(channel.state, ChannelState::Active);
        assert_eq!(channel.creator_id, Some(a));
        assert_eq!(member_ids(&db, channel.id), vec![a, b]);
    }

    #[test]
    fn create_with_unknown_member_writes_nothing() {
        let db = db();
        let a = user(&db, "a");
        let new = NewChannel {
            name: None,
            kind: ChannelKind::Room,
            is_visible: true,
        };
        let err = db.create_channel(&new, Some(a), &[Uuid::new_v4()]).unwrap_err();

        assert!(matches!(err, ChatError::NotFound(_)));
        let total = db
            .count_channels(ChannelScope::Admin(a), &ChannelFilter::default())
            .unwrap();
        assert_eq!(total, 0);
    }

    #[test]
    fn join_twice_is_rejected() {
        let db = db();
        let (a, b) = (user(&db, "a"), user(&db, "b"));
        let channel = room(&db, a, &[]);

        db.join_channel(channel.id, b).unwrap();
        let err = db.join_channel(channel.id, b).unwrap_err();
        assert!(matches!(err, ChatError::BadRequest(ref m) if m == "already joined"));
    }

    #[test]
    fn leave_twice_fails_and_changes_nothing() {
        let db = db();
        let (a, b, c) = (user(&db, "a"), user(&db, "b"), user(&db, "c"));
        let channel = room(&db, a, &[b, c]);

        db.leave_channel(channel.id, b).unwrap();
        let before = member_ids(&db, channel.id);

        let err = db.leave_channel(channel.id, b).unwrap_err();
        assert!(matches!(err, ChatError::BadRequest(ref m) if m == "not a participant"));
        assert_eq!(member_ids(&db, channel.id), before);
        assert_eq!(before, vec![a, c]);
    }

    #[test]
    fn storage_allows_one_active_membership_per_user() {
        let db = db();
        let (a, b) = (user(&db, "a"), user(&db, "b"));
        let channel = room(&db, a, &[b]);

        let err = db.with_conn(|conn| insert_participant(conn, channel.id, b)).unwrap_err();
        assert!(matches!(
            err,
            ChatError::Database(rusqlite::Error::SqliteFailure(ref e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        ));

        // A left row does not count against the index.
        db.leave_channel(channel.id, b).unwrap();
        db.with_conn(|conn| insert_participant(conn, channel.id, b)).unwrap();
        assert_eq!(participant_rows(&db, channel.id), 3);
        assert_eq!(member_ids(&db, channel.id), vec![a, b]);
    }

    #[test]
    fn rejoin_after_leave_is_allowed() {
        let db = db();
        let (a, b) = (user(&db, "a"), user(&db, "b"));
        let channel = room(&db, a, &[b]);

        db.leave_channel(channel.id, b).unwrap();
        db.join_channel(channel.id, b).unwrap();
        assert_eq!(member_ids(&db, channel.id), vec![a, b]);
    }

    #[test]
    fn leave_many_skips_channels_without_membership() {
        let db = db();
        let (a, b) = (user(&db, "a"), user(&db, "b"));
        let with_b = room(&db, a, &[b]);
        let without_b = room(&db, a, &[]);

        let left = db.leave_channels(&[with_b.id, without_b.id, Uuid::new_v4()], b).unwrap();
        assert_eq!(left, vec![with_b.id]);
        assert!(db.active_participant(with_b.id, b).unwrap().is_none());
    }

    #[test]
    fn pin_requires_membership_and_sorts_first() {
        let db = db();
        let (a, b) = (user(&db, "a"), user(&db, "b"));
        let older = room(&db, a, &[b]);
        let newer = room(&db, a, &[b]);

        assert_eq!(listed(&db, ChannelScope::Member(a)), vec![newer.id, older.id]);

        db.set_pin(older.id, a, true).unwrap();
        assert_eq!(listed(&db, ChannelScope::Member(a)), vec![older.id, newer.id]);
        // Pins are per user.
        assert_eq!(listed(&db, ChannelScope::Member(b)), vec![newer.id, older.id]);
        assert_eq!(db.pinned_channels(a).unwrap().len(), 1);

        let outsider = user(&db, "c");
        let err = db.set_pin(older.id, outsider, true).unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[test]
    fn member_listing_hides_block_related_channels() {
        let db = db();
        let (a, b, c) = (user(&db, "a"), user(&db, "b"), user(&db, "c"));
        let with_b = room(&db, a, &[b]);
        let with_c = room(&db, a, &[c]);

        db.block_user(b, a).unwrap();
        assert_eq!(listed(&db, ChannelScope::Member(a)), vec![with_c.id]);
        assert!(listed(&db, ChannelScope::Member(b)).is_empty());
        assert_eq!(listed(&db, ChannelScope::Admin(c)).len(), 2);
        assert_eq!(with_b.kind, ChannelKind::Room);
    }

    #[test]
    fn listing_filters_by_state() {
        let db = db();
        let (a, b) = (user(&db, "a"), user(&db, "b"));
        let active = room(&db, a, &[b]);
        let closed = room(&db, a, &[b]);
        db.set_channel_state(closed.id, ChannelState::Inactive).unwrap();

        let filter = ChannelFilter {
            state: Some(ChannelState::Active),
            ..ChannelFilter::default()
        };
        let page = db
            .list_channels(
                ChannelScope::Member(a),
                &filter,
                ChannelSort::CreatedAtAsc,
                &PageArgs::first(10),
            )
            .unwrap();
        assert_eq!(page.nodes().map(|l| l.channel.id).collect::<Vec<_>>(), vec![active.id]);
        assert_eq!(db.count_channels(ChannelScope::Member(a), &filter).unwrap(), 1);
    }

    #[test]
    fn soft_delete_cascades() {
        let db = db();
        let (a, b) = (user(&db, "a"), user(&db, "b"));
        let channel = room(&db, a, &[b]);
        let sent = db.send_message(channel.id, Some(a), &MessageBody::text("hi")).unwrap();

        db.soft_delete_channels(&[channel.id]).unwrap();

        assert!(db.find_channel(channel.id).unwrap().is_none());
        assert!(db.find_message(sent.message.id).unwrap().is_none());
        assert!(db.channel_participants(channel.id).unwrap().is_empty());
        assert_eq!(db.count_messages(MessageScope::All, &MessageFilter::default()).unwrap(), 0);

        let err = db.soft_delete_channels(&[channel.id]).unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[test]
    fn purge_only_takes_soft_deleted_channels() {
        let db = db();
        let (a, b) = (user(&db, "a"), user(&db, "b"));
        let live = room(&db, a, &[b]);
        let gone = room(&db, a, &[b]);
        let sent = db.send_message(gone.id, Some(a), &MessageBody::text("hi")).unwrap();
        db.soft_delete_channels(&[gone.id]).unwrap();

        assert_eq!(db.purge_channels(&[live.id, gone.id, Uuid::new_v4()]).unwrap(), 1);
        assert!(db.find_channel(live.id).unwrap().is_some());
        assert!(db.read_set(sent.message.id).unwrap().is_empty());
        assert_eq!(participant_rows(&db, gone.id), 0);

        let err = db.purge_channels(&[live.id]).unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[test]
    fn dm_is_reused_for_either_side() {
        let db = db();
        let (a, b, c) = (user(&db, "a"), user(&db, "b"), user(&db, "c"));
        let new = NewChannel {
            name: None,
            kind: ChannelKind::Dm,
            is_visible: false,
        };
        let dm = db.create_channel(&new, Some(a), &[b]).unwrap();

        assert_eq!(db.find_or_create_dm(b, a).unwrap().id, dm.id);
        let other = db.find_or_create_dm(a, c).unwrap();
        assert_ne!(other.id, dm.id);
        assert_eq!(other.kind, ChannelKind::Dm);
        assert_eq!(db.find_or_create_dm(c, a).unwrap().id, other.id);
    }
}
