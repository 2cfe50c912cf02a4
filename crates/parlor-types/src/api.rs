use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChannelKind, ChannelState, MessageBody, MessageType};
use crate::pagination::PageArgs;

// -- Channels --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateChannelRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_room")]
    pub kind: ChannelKind,
    #[serde(default = "default_visible")]
    pub is_visible: bool,
    #[serde(default)]
    pub member_ids: Vec<Uuid>,
}

fn default_room() -> ChannelKind {
    ChannelKind::Room
}

fn default_visible() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateDmRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetChannelStateRequest {
    pub state: ChannelState,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetChannelPinRequest {
    pub pinned: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdsRequest {
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct AffectedResponse {
    pub affected: usize,
}

/// Field-level predicates for channel listings. All set fields must hold.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelFilter {
    pub kind: Option<ChannelKind>,
    pub state: Option<ChannelState>,
    pub visible: Option<bool>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub updated_after: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelSort {
    /// Pinned first, then most recently active.
    #[default]
    Default,
    UpdatedAtAsc,
    CreatedAtDesc,
    CreatedAtAsc,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelListRequest {
    pub page: PageArgs,
    pub filter: ChannelFilter,
    pub sort: ChannelSort,
    pub with_total_count: bool,
}

// -- Messages --

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub channel_id: Uuid,
    #[serde(flatten)]
    pub body: MessageBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageFilter {
    pub channel_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub kind: Option<MessageType>,
    pub author_id: Option<Uuid>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageSort {
    #[default]
    CreatedAtDesc,
    CreatedAtAsc,
}

#[derive(Debug, Clone, Default)]
pub struct MessageListRequest {
    pub page: PageArgs,
    pub filter: MessageFilter,
    pub sort: MessageSort,
    pub with_total_count: bool,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub channel_id: Uuid,
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}
