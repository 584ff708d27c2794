use std::sync::Arc;

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use tether_db::{Database, StoreError};
use tether_types::events::GatewayEvent;
use tether_types::models::{ConnectionStatus, Message};

use crate::dispatcher::Dispatcher;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("no accepted connection between sender and receiver")]
    NotConnected,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// The one entry point for sending a direct message: authorization against
/// the connection ledger, durable persistence, then best-effort live push.
///
/// Persistence success is the only success criterion: an offline recipient
/// is not an error, and live-delivery failure is never reported to the
/// sender.
pub async fn send_private_message(
    db: Arc<Database>,
    dispatcher: &Dispatcher,
    sender_id: Uuid,
    sender_name: String,
    receiver_id: Uuid,
    content: String,
) -> Result<Message, SendError> {
    // Only an accepted pair may talk.
    let gate_db = db.clone();
    let status =
        tokio::task::spawn_blocking(move || gate_db.status_between(sender_id, receiver_id))
            .await??;
    if status != Some(ConnectionStatus::Accepted) {
        return Err(SendError::NotConnected);
    }

    // Persist before any delivery attempt; the message survives whether or
    // not the recipient is reachable.
    let row =
        tokio::task::spawn_blocking(move || db.append_message(sender_id, receiver_id, &content))
            .await??;
    let message = row.into_model()?;

    let delivered = dispatcher
        .send_to_user(
            receiver_id,
            GatewayEvent::NewMessage {
                message: message.content.clone(),
                sender_id,
                sender_name,
                timestamp: message.timestamp,
            },
        )
        .await;
    if !delivered {
        debug!(
            "receiver {} has no live channel, message {} stored only",
            receiver_id, message.id
        );
    }

    Ok(message)
}
