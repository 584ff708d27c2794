//! Database row types — these map directly to SQLite rows.
//! Distinct from tether-types API models to keep the DB layer independent.

use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use tether_types::models::{Connection, ConnectionStatus, Message};

use crate::error::StoreError;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: i64,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub timestamp: String,
    pub read: bool,
}

/// A message row joined with the sender's username, for history queries.
pub struct HistoryRow {
    pub id: i64,
    pub sender_id: String,
    pub receiver_id: String,
    pub sender_username: String,
    pub content: String,
    pub timestamp: String,
    pub read: bool,
}

#[derive(Debug)]
pub struct ConnectionRow {
    pub id: i64,
    pub user_id: String,
    pub connected_user_id: String,
    pub status: String,
    pub created_at: String,
}

/// A pending invitation joined with the requester's username.
pub struct PendingInvitationRow {
    pub id: i64,
    pub sender_id: String,
    pub sender_username: String,
    pub created_at: String,
}

/// A user-search hit annotated with the pair's connection status, if any.
pub struct SearchRow {
    pub id: String,
    pub username: String,
    pub connection_status: Option<String>,
}

impl MessageRow {
    pub fn into_model(self) -> Result<Message, StoreError> {
        Ok(Message {
            id: self.id,
            sender_id: parse_uuid(&self.sender_id)?,
            receiver_id: parse_uuid(&self.receiver_id)?,
            content: self.content,
            timestamp: parse_timestamp(&self.timestamp)?,
            read: self.read,
        })
    }
}

impl ConnectionRow {
    pub fn into_model(self) -> Result<Connection, StoreError> {
        let status = ConnectionStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("connection status '{}'", self.status)))?;
        Ok(Connection {
            id: self.id,
            user_id: parse_uuid(&self.user_id)?,
            connected_user_id: parse_uuid(&self.connected_user_id)?,
            status,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    s.parse()
        .map_err(|_| StoreError::Corrupt(format!("uuid '{}'", s)))
}

/// Timestamps we write are RFC 3339; `users.created_at` falls back to the
/// SQLite default `datetime('now')` format, which has no timezone marker.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    s.parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .map_err(|_| StoreError::Corrupt(format!("timestamp '{}'", s)))
}
