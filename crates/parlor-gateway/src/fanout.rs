//! Per-subscriber message streams over the shared bus.
//!
//! Every subscription sees every published message and keeps only those for
//! its channel whose author is not block-related to the subscriber. Membership
//! and the block relation are checked on each delivery: a block placed while
//! a subscription is open takes effect on the next message, and leaving the
//! channel (or its deletion) ends the stream.

use std::sync::Arc;

use futures_util::Stream;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, warn};
use uuid::Uuid;

use parlor_db::{ChatError, Database};
use parlor_types::actor::Actor;
use parlor_types::models::Message;

use crate::dispatcher::Dispatcher;

/// Check membership, then open a message stream for the channel.
pub async fn subscribe(
    dispatcher: Dispatcher,
    db: Arc<Database>,
    actor: Actor,
    channel_id: Uuid,
) -> Result<impl Stream<Item = Message> + Send + 'static, ChatError> {
    let guard_db = db.clone();
    let guard_actor = actor.clone();
    tokio::task::spawn_blocking(move || guard_db.guard_channel(channel_id, &guard_actor))
        .await
        .map_err(|e| ChatError::Internal(e.into()))??;

    Ok(message_stream(dispatcher, db, channel_id, actor))
}

/// What to do with one message for one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Deliver,
    Skip,
    End,
}

/// Stream of new messages in `channel_id` visible to `subscriber`.
/// Ends when the bus closes or the subscriber loses access to the channel.
pub fn message_stream(
    dispatcher: Dispatcher,
    db: Arc<Database>,
    channel_id: Uuid,
    subscriber: Actor,
) -> impl Stream<Item = Message> + Send + 'static {
    let mut rx = dispatcher.subscribe();
    let closed = dispatcher.closed();

    async_stream::stream! {
        loop {
            let message = tokio::select! {
                _ = closed.cancelled() => break,
                received = rx.recv() => match received {
                    Ok(message) => message,
                    Err(RecvError::Lagged(n)) => {
                        warn!(
                            "Subscriber {} lagged by {} messages on channel {}",
                            subscriber.id, n, channel_id
                        );
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            if message.channel_id != channel_id {
                continue;
            }
            match check_delivery(&db, &subscriber, &message).await {
                Delivery::Deliver => yield message,
                Delivery::Skip => {}
                Delivery::End => break,
            }
        }
    }
}

async fn check_delivery(db: &Arc<Database>, subscriber: &Actor, message: &Message) -> Delivery {
    let db = db.clone();
    let subscriber = subscriber.clone();
    let channel_id = message.channel_id;
    let author_id = message.author_id;

    let checked = tokio::task::spawn_blocking(move || -> Result<Delivery, ChatError> {
        match db.guard_channel(channel_id, &subscriber) {
            Ok(_) => {}
            Err(ChatError::Forbidden(_) | ChatError::NotFound(_)) => {
                debug!(
                    "{} lost access to channel {}, ending subscription",
                    subscriber.id, channel_id
                );
                return Ok(Delivery::End);
            }
            Err(e) => return Err(e),
        }

        let Some(author_id) = author_id else {
            return Ok(Delivery::Deliver);
        };
        if author_id == subscriber.id || !db.is_block_related(subscriber.id, author_id)? {
            Ok(Delivery::Deliver)
        } else {
            Ok(Delivery::Skip)
        }
    })
    .await;

    match checked {
        Ok(Ok(delivery)) => delivery,
        Ok(Err(e)) => {
            warn!("Delivery check failed on channel {}: {}", channel_id, e);
            Delivery::Skip
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            Delivery::Skip
        }
    }
}
