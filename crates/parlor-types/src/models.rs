use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::actor::Role;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

// -- Channels --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelKind {
    Dm,
    Room,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dm => "DM",
            Self::Room => "ROOM",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DM" => Some(Self::Dm),
            "ROOM" => Some(Self::Room),
            _ => None,
        }
    }
}

/// Channels start ACTIVE. INACTIVE channels reject new messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelState {
    #[default]
    Active,
    Inactive,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(Self::Active),
            "INACTIVE" => Some(Self::Inactive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    pub id: Uuid,
    pub name: Option<String>,
    pub kind: ChannelKind,
    pub state: ChannelState,
    pub is_visible: bool,
    pub creator_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Membership of one user in one channel. `left_at` set means the user left.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub pinned: bool,
    pub joined_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_at: Option<DateTime<Utc>>,
}

/// A channel as seen by one caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelView {
    #[serde(flatten)]
    pub channel: Channel,
    pub participants: Vec<Participant>,
    pub pinned: bool,
    pub unread_count: i64,
}

// -- Messages --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    System,
    Card,
    Text,
    Image,
    Video,
    File,
    Link,
}

impl MessageType {
    /// Types listed by the per-channel media gallery.
    pub const MEDIA: [MessageType; 3] = [Self::File, Self::Image, Self::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "SYSTEM",
            Self::Card => "CARD",
            Self::Text => "TEXT",
            Self::Image => "IMAGE",
            Self::Video => "VIDEO",
            Self::File => "FILE",
            Self::Link => "LINK",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SYSTEM" => Some(Self::System),
            "CARD" => Some(Self::Card),
            "TEXT" => Some(Self::Text),
            "IMAGE" => Some(Self::Image),
            "VIDEO" => Some(Self::Video),
            "FILE" => Some(Self::File),
            "LINK" => Some(Self::Link),
            _ => None,
        }
    }
}

/// Message content, one variant per kind. Only TEXT carries free text;
/// every other kind is a structured payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageBody {
    System {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    Card {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action_url: Option<String>,
    },
    Text {
        text: String,
    },
    Image {
        file_id: Uuid,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        height: Option<u32>,
    },
    Video {
        file_id: Uuid,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    File {
        file_id: Uuid,
        url: String,
        name: String,
        size: u64,
    },
    Link {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
}

impl MessageBody {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::System { .. } => MessageType::System,
            Self::Card { .. } => MessageType::Card,
            Self::Text { .. } => MessageType::Text,
            Self::Image { .. } => MessageType::Image,
            Self::Video { .. } => MessageType::Video,
            Self::File { .. } => MessageType::File,
            Self::Link { .. } => MessageType::Link,
        }
    }

    /// The free text of a TEXT message.
    pub fn text_content(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Structured payload without the type tag. `None` for TEXT.
    pub fn payload(&self) -> serde_json::Result<Option<serde_json::Value>> {
        if let Self::Text { .. } = self {
            return Ok(None);
        }
        let mut value = serde_json::to_value(self)?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("type");
        }
        Ok(Some(value))
    }

    /// Rebuild a body from its stored parts, dispatching on the type tag.
    pub fn from_parts(
        kind: MessageType,
        text: Option<String>,
        payload: Option<serde_json::Value>,
    ) -> serde_json::Result<Self> {
        if kind == MessageType::Text {
            return Ok(Self::Text {
                text: text.unwrap_or_default(),
            });
        }
        let mut obj = match payload {
            Some(serde_json::Value::Object(obj)) => obj,
            _ => serde_json::Map::new(),
        };
        obj.insert("type".into(), serde_json::Value::String(kind.as_str().into()));
        serde_json::from_value(serde_json::Value::Object(obj))
    }

    /// Short human-readable preview used for push notifications.
    pub fn preview(&self) -> String {
        match self {
            Self::Text { text } => text.chars().take(120).collect(),
            Self::System { event, .. } => event.clone(),
            Self::Card { title, .. } => title.clone(),
            Self::Image { .. } => "[image]".into(),
            Self::Video { .. } => "[video]".into(),
            Self::File { name, .. } => format!("[file] {}", name),
            Self::Link { url, title } => title.clone().unwrap_or_else(|| url.clone()),
        }
    }
}

/// A persisted message. `author_id` is `None` for system messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub author_id: Option<Uuid>,
    #[serde(flatten)]
    pub body: MessageBody,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub author: Option<User>,
}

/// Gallery entry: the payload of a FILE/IMAGE/VIDEO message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadNode {
    pub message_id: Uuid,
    #[serde(flatten)]
    pub body: MessageBody,
    pub created_at: DateTime<Utc>,
}
