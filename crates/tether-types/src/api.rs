use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ConnectionStatus;

// -- JWT Claims --

/// JWT claims shared across tether-api (REST middleware) and tether-gateway
/// (WebSocket Identify handshake). Canonical definition lives here in
/// tether-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- User search --

#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub id: Uuid,
    pub username: String,
    /// Absent when no connection record exists for the pair.
    pub connection_status: Option<ConnectionStatus>,
}

// -- Invitations --

#[derive(Debug, Serialize)]
pub struct InvitationResponse {
    pub status: InvitationOutcome,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationOutcome {
    Success,
    /// A record for the pair already exists (either direction, any status).
    Exists,
}

#[derive(Debug, Serialize)]
pub struct PendingInvitation {
    pub id: i64,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub timestamp: DateTime<Utc>,
}

// -- Conversations / history --

#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    /// The peer's user id. Conversations are keyed by peer, not by record.
    pub id: Uuid,
    pub username: String,
    pub last_message: Option<String>,
    /// Wall-clock preview time, `%H:%M`.
    pub last_message_time: Option<String>,
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
pub struct HistoryMessage {
    pub content: String,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}
