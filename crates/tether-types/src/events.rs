use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A user came online or went offline. Broadcast to every live channel.
    UserStatus {
        user_id: Uuid,
        status: PresenceStatus,
    },

    /// A direct message addressed to this channel's user.
    NewMessage {
        message: String,
        sender_id: Uuid,
        sender_name: String,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Send a direct message to another user
    PrivateMessage { receiver_id: Uuid, content: String },

    /// Mark every unread message from `peer_id` to this user as read
    MarkRead { peer_id: Uuid },
}
