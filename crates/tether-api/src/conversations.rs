use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, warn};
use uuid::Uuid;

use tether_db::StoreError;
use tether_db::models::parse_timestamp;
use tether_types::api::{Claims, ConversationSummary, HistoryMessage};

use crate::auth::AppState;

/// One row per accepted peer: username, last message preview, unread count.
pub async fn get_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let me = claims.sub;

    // One blocking hop for the whole fan-out of per-peer lookups.
    let rows = tokio::task::spawn_blocking(move || {
        let peers = db.accepted_peers_of(me)?;

        let mut rows = Vec::with_capacity(peers.len());
        for peer in peers {
            let username = db
                .get_username_by_id(peer)?
                .unwrap_or_else(|| "unknown".to_string());
            let last = db.last_message(me, peer)?;
            let unread = db.unread_count(peer, me)?;
            rows.push((peer, username, last, unread));
        }
        Ok::<_, StoreError>(rows)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let conversations: Vec<ConversationSummary> = rows
        .into_iter()
        .map(|(peer, username, last, unread_count)| {
            let (last_message, last_message_time) = match last {
                Some(row) => {
                    let time = parse_timestamp(&row.timestamp)
                        .map(|ts| ts.format("%H:%M").to_string())
                        .unwrap_or_else(|e| {
                            warn!("Corrupt timestamp on message {}: {}", row.id, e);
                            String::new()
                        });
                    (Some(row.content), Some(time))
                }
                None => (None, None),
            };

            ConversationSummary {
                id: peer,
                username,
                last_message,
                last_message_time,
                unread_count,
            }
        })
        .collect();

    Ok(Json(conversations))
}

/// Full message history between the caller and a peer, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let me = claims.sub;

    let rows = tokio::task::spawn_blocking(move || db.history_between(me, user_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let messages: Vec<HistoryMessage> = rows
        .into_iter()
        .map(|row| HistoryMessage {
            content: row.content,
            sender_id: row.sender_id.parse().unwrap_or_else(|e| {
                warn!("Corrupt sender id '{}' on message {}: {}", row.sender_id, row.id, e);
                Uuid::default()
            }),
            sender_name: row.sender_username,
            timestamp: parse_timestamp(&row.timestamp).unwrap_or_else(|e| {
                warn!("Corrupt timestamp on message {}: {}", row.id, e);
                chrono::DateTime::default()
            }),
            read: row.read,
        })
        .collect();

    Ok(Json(messages))
}
