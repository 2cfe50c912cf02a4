//! Every public chat operation, with authorization and validation applied in
//! a fixed order: existence, then access, then operation preconditions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use parlor_db::channels::{ChannelListing, ChannelScope, NewChannel};
use parlor_db::guard::MessageAccess;
use parlor_db::messages::MessageScope;
use parlor_db::{ChatError, Database, Result};
use parlor_gateway::dispatcher::Dispatcher;
use parlor_gateway::fanout;
use parlor_types::actor::{Actor, Capabilities, Capability};
use parlor_types::api::{
    ChannelListRequest, CreateChannelRequest, MessageListRequest, SendMessageRequest,
};
use parlor_types::models::{
    Channel, ChannelKind, ChannelState, ChannelView, Message, MessageBody, MessageView, Participant,
    PayloadNode,
};
use parlor_types::pagination::{Connection as Page, PageArgs};

use crate::loader::UserLoader;
use crate::notify::{Notification, NotificationKind, Notifier};

#[derive(Clone)]
pub struct ChatService {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    notifier: Arc<dyn Notifier>,
    loader_ttl: Duration,
}

impl ChatService {
    pub fn new(
        db: Arc<Database>,
        dispatcher: Dispatcher,
        notifier: Arc<dyn Notifier>,
        loader_ttl: Duration,
    ) -> Self {
        Self {
            db,
            dispatcher,
            notifier,
            loader_ttl,
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Run a store call off the async runtime.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db)).await.map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ChatError::Internal(e.into())
        })?
    }

    fn loader(&self) -> UserLoader {
        UserLoader::new(self.db.clone(), self.loader_ttl)
    }

    /// Mirror the caller into the local user directory.
    pub async fn ensure_user(&self, actor: &Actor) -> Result<()> {
        let actor = actor.clone();
        self.blocking(move |db| db.ensure_user(actor.id, &actor.username, actor.role)).await
    }

    // -- Channel queries --

    pub async fn get_channel(&self, actor: &Actor, channel_id: Uuid) -> Result<ChannelView> {
        let actor = actor.clone();
        self.blocking(move |db| {
            let channel = db.guard_channel(channel_id, &actor)?;
            let pinned = db.active_participant(channel_id, actor.id)?.is_some_and(|p| p.pinned);
            let mut views = ChannelViews::load(db, &[channel.id], actor.id)?;
            Ok(views.view(ChannelListing { channel, pinned }))
        })
        .await
    }

    pub async fn list_my_channels(
        &self,
        actor: &Actor,
        req: ChannelListRequest,
    ) -> Result<Page<ChannelView>> {
        self.list_channels(ChannelScope::Member(actor.id), actor.id, req).await
    }

    pub async fn list_channels_admin(
        &self,
        actor: &Actor,
        req: ChannelListRequest,
    ) -> Result<Page<ChannelView>> {
        require(actor, Capability::ManageChannels)?;
        self.list_channels(ChannelScope::Admin(actor.id), actor.id, req).await
    }

    async fn list_channels(
        &self,
        scope: ChannelScope,
        viewer: Uuid,
        req: ChannelListRequest,
    ) -> Result<Page<ChannelView>> {
        self.blocking(move |db| {
            let mut page = db.list_channels(scope, &req.filter, req.sort, &req.page)?;
            if req.with_total_count {
                page.total_count = Some(db.count_channels(scope, &req.filter)?);
            }

            let ids: Vec<Uuid> = page.nodes().map(|l| l.channel.id).collect();
            let mut views = ChannelViews::load(db, &ids, viewer)?;
            Ok(page.map(|listing| views.view(listing)))
        })
        .await
    }

    pub async fn list_pinned_channels(&self, actor: &Actor) -> Result<Vec<ChannelView>> {
        let viewer = actor.id;
        self.blocking(move |db| {
            let listings = db.pinned_channels(viewer)?;
            let ids: Vec<Uuid> = listings.iter().map(|l| l.channel.id).collect();
            let mut views = ChannelViews::load(db, &ids, viewer)?;
            Ok(listings.into_iter().map(|listing| views.view(listing)).collect())
        })
        .await
    }

    pub async fn unread_count(&self, actor: &Actor, channel_id: Uuid) -> Result<i64> {
        let actor = actor.clone();
        self.blocking(move |db| {
            db.guard_channel(channel_id, &actor)?;
            db.unread_count(channel_id, actor.id)
        })
        .await
    }

    // -- Channel mutations --

    pub async fn create_channel_admin(
        &self,
        actor: &Actor,
        req: CreateChannelRequest,
    ) -> Result<Channel> {
        require(actor, Capability::ManageChannels)?;
        if req.kind == ChannelKind::Dm && req.member_ids.len() != 1 {
            return Err(ChatError::bad_request("a DM channel has exactly one other member"));
        }
        let creator = actor.id;
        self.blocking(move |db| {
            let new = NewChannel {
                name: req.name,
                kind: req.kind,
                is_visible: req.is_visible,
            };
            db.create_channel(&new, Some(creator), &req.member_ids)
        })
        .await
    }

    /// Open (or reopen) the DM between the caller and `other`.
    pub async fn create_dm_channel(&self, actor: &Actor, other: Uuid) -> Result<ChannelView> {
        if other == actor.id {
            return Err(ChatError::bad_request("cannot open a DM with yourself"));
        }
        let me = actor.id;
        self.blocking(move |db| {
            if db.find_user(other)?.is_none() {
                return Err(ChatError::not_found(format!("user {}", other)));
            }
            if db.is_block_related(me, other)? {
                return Err(ChatError::bad_request("user is blocked"));
            }

            let channel = db.find_or_create_dm(me, other)?;
            let pinned = db.active_participant(channel.id, me)?.is_some_and(|p| p.pinned);
            let mut views = ChannelViews::load(db, &[channel.id], me)?;
            Ok(views.view(ChannelListing { channel, pinned }))
        })
        .await
    }

    /// Members may join visible, active rooms. Admins may join any channel.
    pub async fn join_channel(&self, actor: &Actor, channel_id: Uuid) -> Result<Participant> {
        let actor = actor.clone();
        self.blocking(move |db| {
            let channel = db
                .find_channel(channel_id)?
                .ok_or_else(|| ChatError::not_found(format!("channel {}", channel_id)))?;
            if !actor.can(Capability::BypassMembership) {
                if channel.kind != ChannelKind::Room || !channel.is_visible {
                    return Err(ChatError::forbidden("channel is not open for joining"));
                }
                if channel.state == ChannelState::Inactive {
                    return Err(ChatError::bad_request("channel is inactive"));
                }
            }
            db.join_channel(channel_id, actor.id)
        })
        .await
    }

    pub async fn leave_channel(&self, actor: &Actor, channel_id: Uuid) -> Result<Channel> {
        let user_id = actor.id;
        self.blocking(move |db| db.leave_channel(channel_id, user_id)).await
    }

    pub async fn leave_channels(&self, actor: &Actor, channel_ids: Vec<Uuid>) -> Result<Vec<Uuid>> {
        let user_id = actor.id;
        self.blocking(move |db| db.leave_channels(&channel_ids, user_id)).await
    }

    pub async fn set_channel_state(
        &self,
        actor: &Actor,
        channel_id: Uuid,
        state: ChannelState,
    ) -> Result<Channel> {
        require(actor, Capability::ManageChannels)?;
        info!("{} sets channel {} to {}", actor.username, channel_id, state.as_str());
        self.blocking(move |db| db.set_channel_state(channel_id, state)).await
    }

    pub async fn set_channel_pin(
        &self,
        actor: &Actor,
        channel_id: Uuid,
        pinned: bool,
    ) -> Result<Participant> {
        let user_id = actor.id;
        self.blocking(move |db| db.set_pin(channel_id, user_id, pinned)).await
    }

    /// Soft delete.
    pub async fn delete_channels(&self, actor: &Actor, channel_ids: Vec<Uuid>) -> Result<usize> {
        require(actor, Capability::ManageChannels)?;
        self.blocking(move |db| db.soft_delete_channels(&channel_ids)).await
    }

    /// Permanently remove channels that were soft-deleted earlier.
    pub async fn purge_channels(&self, actor: &Actor, channel_ids: Vec<Uuid>) -> Result<usize> {
        require(actor, Capability::ManageChannels)?;
        self.blocking(move |db| db.purge_channels(&channel_ids)).await
    }

    // -- Message queries --

    pub async fn get_message(&self, actor: &Actor, message_id: Uuid) -> Result<MessageView> {
        let reader = actor.clone();
        let message = self
            .blocking(move |db| {
                let message = db.guard_message(message_id, &reader, MessageAccess::Read)?;
                if let Some(author_id) = message.author_id {
                    if author_id != reader.id && db.is_block_related(reader.id, author_id)? {
                        return Err(ChatError::bad_request("message is from a blocked user"));
                    }
                }
                Ok(message)
            })
            .await?;

        let author = match message.author_id {
            Some(id) => self.loader().load(id).await?,
            None => None,
        };
        Ok(MessageView { message, author })
    }

    pub async fn list_messages_admin(
        &self,
        actor: &Actor,
        req: MessageListRequest,
    ) -> Result<Page<MessageView>> {
        require(actor, Capability::ViewAllMessages)?;
        self.list_messages(MessageScope::All, req).await
    }

    pub async fn list_messages_by_channel(
        &self,
        actor: &Actor,
        channel_id: Uuid,
        mut req: MessageListRequest,
    ) -> Result<Page<MessageView>> {
        self.guard_channel(actor, channel_id).await?;
        req.filter.channel_id = None;
        let scope = MessageScope::Channel {
            channel_id,
            viewer: actor.id,
        };
        self.list_messages(scope, req).await
    }

    async fn list_messages(
        &self,
        scope: MessageScope,
        req: MessageListRequest,
    ) -> Result<Page<MessageView>> {
        let page = self
            .blocking(move |db| {
                let mut page = db.list_messages(scope, &req.filter, req.sort, &req.page)?;
                if req.with_total_count {
                    page.total_count = Some(db.count_messages(scope, &req.filter)?);
                }
                Ok(page)
            })
            .await?;

        let author_ids: Vec<Uuid> = page.nodes().filter_map(|m| m.author_id).collect();
        let authors = self.loader().load_many(&author_ids).await?;
        Ok(page.map(|message| {
            let author = message.author_id.and_then(|id| authors.get(&id).cloned());
            MessageView { message, author }
        }))
    }

    /// FILE, IMAGE and VIDEO payloads of a channel.
    pub async fn list_payloads_by_channel(
        &self,
        actor: &Actor,
        channel_id: Uuid,
        args: PageArgs,
        with_total_count: bool,
    ) -> Result<Page<PayloadNode>> {
        self.guard_channel(actor, channel_id).await?;
        let viewer = actor.id;
        self.blocking(move |db| {
            let mut page = db.list_payloads(channel_id, viewer, &args)?;
            if with_total_count {
                page.total_count = Some(db.count_payloads(channel_id, viewer)?);
            }
            Ok(page)
        })
        .await
    }

    // -- Message mutations --

    pub async fn send_message(&self, actor: &Actor, req: SendMessageRequest) -> Result<Message> {
        let channel_id = req.channel_id;
        self.guard_channel(actor, channel_id).await?;

        let author_id = match &req.body {
            MessageBody::System { .. } => {
                require(actor, Capability::SendSystemMessages)?;
                None
            }
            _ => Some(actor.id),
        };

        let body = req.body;
        let sent = self.blocking(move |db| db.send_message(channel_id, author_id, &body)).await?;

        let reached = self.dispatcher.publish(sent.message.clone());
        debug!("Message {} published to {} subscribers", sent.message.id, reached);

        if !sent.recipients.is_empty() {
            let notification = Notification {
                title: sent.channel.name.clone().unwrap_or_else(|| actor.username.clone()),
                message: sent.message.body.preview(),
                kind: NotificationKind::Chat,
                relation_id: channel_id,
                recipients: sent.recipients,
            };
            if let Err(e) = self.notifier.send(notification).await {
                warn!("Notification for message {} failed: {}", sent.message.id, e);
            }
        }

        Ok(sent.message)
    }

    pub async fn delete_message(&self, actor: &Actor, message_id: Uuid) -> Result<()> {
        self.delete_messages(actor, vec![message_id]).await.map(|_| ())
    }

    /// All-or-nothing: every id must exist and belong to the caller unless
    /// the caller is an admin.
    pub async fn delete_messages(&self, actor: &Actor, message_ids: Vec<Uuid>) -> Result<usize> {
        let actor = actor.clone();
        self.blocking(move |db| {
            for id in &message_ids {
                db.guard_message(*id, &actor, MessageAccess::Own)?;
            }
            db.delete_messages(&message_ids)
        })
        .await
    }

    /// Mark every message in the channel read for the caller.
    pub async fn read_all_messages(&self, actor: &Actor, channel_id: Uuid) -> Result<usize> {
        let actor = actor.clone();
        self.blocking(move |db| {
            db.guard_channel(channel_id, &actor)?;
            db.read_all(channel_id, actor.id)
        })
        .await
    }

    // -- Blocks --

    pub async fn block_user(&self, actor: &Actor, target: Uuid) -> Result<()> {
        let source = actor.id;
        self.blocking(move |db| db.block_user(source, target)).await
    }

    pub async fn unblock_user(&self, actor: &Actor, target: Uuid) -> Result<()> {
        let source = actor.id;
        self.blocking(move |db| db.unblock_user(source, target)).await
    }

    // -- Subscription --

    /// New messages in a channel, checked per delivery for membership and
    /// block relations.
    pub async fn on_message_received(
        &self,
        actor: &Actor,
        channel_id: Uuid,
    ) -> Result<BoxStream<'static, Message>> {
        let stream = fanout::subscribe(
            self.dispatcher.clone(),
            self.db.clone(),
            actor.clone(),
            channel_id,
        )
        .await?;
        Ok(stream.boxed())
    }

    async fn guard_channel(&self, actor: &Actor, channel_id: Uuid) -> Result<Channel> {
        let actor = actor.clone();
        self.blocking(move |db| db.guard_channel(channel_id, &actor)).await
    }
}

fn require(actor: &Actor, capability: Capability) -> Result<()> {
    if actor.can(capability) {
        Ok(())
    } else {
        Err(ChatError::forbidden("admin only"))
    }
}

/// Participants and the viewer's unread counts for a batch of channels.
struct ChannelViews {
    participants: HashMap<Uuid, Vec<Participant>>,
    unread: HashMap<Uuid, i64>,
}

impl ChannelViews {
    fn load(db: &Database, channel_ids: &[Uuid], viewer: Uuid) -> Result<Self> {
        Ok(Self {
            participants: db.participants_for_channels(channel_ids)?,
            unread: db.unread_counts(channel_ids, viewer)?,
        })
    }

    fn view(&mut self, listing: ChannelListing) -> ChannelView {
        let id = listing.channel.id;
        ChannelView {
            participants: self.participants.remove(&id).unwrap_or_default(),
            unread_count: self.unread.get(&id).copied().unwrap_or(0),
            pinned: listing.pinned,
            channel: listing.channel,
        }
    }
}
