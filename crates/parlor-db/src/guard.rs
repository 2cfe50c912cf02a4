//! Membership checks. A missing target is reported as NotFound before any
//! authorization decision is made.

use uuid::Uuid;

use parlor_types::actor::{Actor, Capabilities, Capability};
use parlor_types::models::{Channel, Message};

use crate::Database;
use crate::channels::{query_active_participant, require_channel};
use crate::error::{ChatError, Result};
use crate::messages::query_message;

/// What the caller wants to do with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageAccess {
    /// See it: participants of its channel, or its author.
    Read,
    /// Act on it as its owner: only its author.
    Own,
}

impl Database {
    /// Load a channel the actor may act in.
    pub fn guard_channel(&self, channel_id: Uuid, actor: &Actor) -> Result<Channel> {
        self.with_conn(|conn| {
            let channel = require_channel(conn, channel_id)?;
            if actor.can(Capability::BypassMembership) {
                return Ok(channel);
            }
            if query_active_participant(conn, channel_id, actor.id)?.is_none() {
                return Err(ChatError::forbidden(format!(
                    "not a participant of channel {}",
                    channel_id
                )));
            }
            Ok(channel)
        })
    }

    /// Load a message the actor may read or own.
    pub fn guard_message(
        &self,
        message_id: Uuid,
        actor: &Actor,
        access: MessageAccess,
    ) -> Result<Message> {
        self.with_conn(|conn| {
            let message = query_message(conn, message_id)?
                .ok_or_else(|| ChatError::not_found(format!("message {}", message_id)))?;
            if actor.can(Capability::BypassMembership) {
                return Ok(message);
            }

            let is_author = message.author_id == Some(actor.id);
            let allowed = match access {
                MessageAccess::Own => is_author,
                MessageAccess::Read => {
                    is_author
                        || query_active_participant(conn, message.channel_id, actor.id)?.is_some()
                }
            };
            if !allowed {
                return Err(ChatError::forbidden(format!("no access to message {}", message_id)));
            }
            Ok(message)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{db, room, user};
    use parlor_types::models::MessageBody;

    #[test]
    fn missing_channel_is_not_found_even_for_outsiders() {
        let db = db();
        let outsider = Actor::member(Uuid::new_v4(), "x");
        let err = db.guard_channel(Uuid::new_v4(), &outsider).unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[test]
    fn outsider_is_forbidden_admin_is_not() {
        let db = db();
        let (a, b, c) = (user(&db, "a"), user(&db, "b"), user(&db, "c"));
        let channel = room(&db, a, &[b]);

        let err = db.guard_channel(channel.id, &Actor::member(c, "c")).unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));

        assert!(db.guard_channel(channel.id, &Actor::member(b, "b")).is_ok());
        assert!(db.guard_channel(channel.id, &Actor::admin(c, "c")).is_ok());
    }

    #[test]
    fn only_the_author_owns_a_message() {
        let db = db();
        let (a, b) = (user(&db, "a"), user(&db, "b"));
        let channel = room(&db, a, &[b]);
        let message = db
            .send_message(channel.id, Some(a), &MessageBody::text("mine"))
            .unwrap()
            .message;

        let reader = Actor::member(b, "b");
        assert!(db.guard_message(message.id, &reader, MessageAccess::Read).is_ok());
        let err = db.guard_message(message.id, &reader, MessageAccess::Own).unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));

        assert!(db.guard_message(message.id, &Actor::member(a, "a"), MessageAccess::Own).is_ok());
    }

    #[test]
    fn author_keeps_read_access_after_leaving() {
        let db = db();
        let (a, b, c) = (user(&db, "a"), user(&db, "b"), user(&db, "c"));
        let channel = room(&db, a, &[b, c]);
        let message = db
            .send_message(channel.id, Some(a), &MessageBody::text("bye"))
            .unwrap()
            .message;
        db.leave_channel(channel.id, a).unwrap();

        assert!(db.guard_message(message.id, &Actor::member(a, "a"), MessageAccess::Read).is_ok());
    }
}
