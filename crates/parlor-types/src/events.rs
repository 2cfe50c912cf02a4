use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A channel subscription is live
    Subscribed { channel_id: Uuid },

    /// A channel subscription was stopped
    Unsubscribed { channel_id: Uuid },

    /// A new message was posted to a subscribed channel
    MessageCreate { message: Message },

    /// A command could not be served
    Error { code: String, message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Start receiving new messages for a channel
    Subscribe { channel_id: Uuid },

    /// Stop receiving new messages for a channel
    Unsubscribe { channel_id: Uuid },
}
