use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use tether_db::Database;
use tether_types::events::{GatewayCommand, GatewayEvent, PresenceStatus};

use crate::delivery::{SendError, send_private_message};
use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single WebSocket connection: Identify handshake, Ready, roster
/// push, then the command/event loop until the socket closes or the
/// heartbeat gives up on it.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let Some((user_id, username)) = wait_for_identify(&mut receiver, &jwt_secret).await else {
        warn!("WebSocket client failed to identify, closing");
        return;
    };

    info!("{} ({}) connected to gateway", username, user_id);

    // Step 2: Send Ready event
    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    // Send the current roster to this client so it sees who's already here
    for (uid, _) in dispatcher.online_users().await {
        let event = GatewayEvent::UserStatus {
            user_id: uid,
            status: PresenceStatus::Online,
        };
        if sender
            .send(Message::Text(serde_json::to_string(&event).unwrap().into()))
            .await
            .is_err()
        {
            return;
        }
    }

    // Subscribe before announcing so this client receives its own online
    // status along with everyone else.
    let mut broadcast_rx = dispatcher.subscribe();

    let (conn_id, mut user_rx) = dispatcher.register(user_id, username.clone()).await;
    dispatcher.broadcast(GatewayEvent::UserStatus {
        user_id,
        status: PresenceStatus::Online,
    });

    let dispatcher_clone = dispatcher.clone();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Spawn task to forward broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if sender
                        .send(Message::Text(serde_json::to_string(&event).unwrap().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let Some(event) = result else { break };

                    if sender
                        .send(Message::Text(serde_json::to_string(&event).unwrap().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&dispatcher_clone, &db, user_id, &username_recv, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            &text[..text.len().min(200)]
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Only announce offline if this connection still owned the entry. A
    // reconnect that replaced it must not be knocked offline by the stale
    // connection's teardown.
    if dispatcher.unregister(user_id, conn_id).await {
        dispatcher.broadcast(GatewayEvent::UserStatus {
            user_id,
            status: PresenceStatus::Offline,
        });
    }
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    use jsonwebtoken::{DecodingKey, Validation, decode};
    use tether_types::api::Claims;

    let timeout = tokio::time::timeout(std::time::Duration::from_secs(10), async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some((token_data.claims.sub, token_data.claims.username));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    user_id: Uuid,
    username: &str,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::PrivateMessage {
            receiver_id,
            content,
        } => {
            match send_private_message(
                db.clone(),
                dispatcher,
                user_id,
                username.to_string(),
                receiver_id,
                content,
            )
            .await
            {
                Ok(message) => {
                    info!(
                        "{} ({}) -> message {} to {}",
                        username, user_id, message.id, receiver_id
                    );
                }
                Err(SendError::NotConnected) => {
                    warn!(
                        "{} ({}) tried to message {} without an accepted connection",
                        username, user_id, receiver_id
                    );
                }
                Err(e) => {
                    warn!(
                        "{} ({}) message to {} failed: {}",
                        username, user_id, receiver_id, e
                    );
                }
            }
        }

        GatewayCommand::MarkRead { peer_id } => {
            let db = db.clone();
            match tokio::task::spawn_blocking(move || db.mark_read_from(user_id, peer_id)).await {
                Ok(Ok(n)) => {
                    if n > 0 {
                        info!(
                            "{} ({}) marked {} messages from {} read",
                            username, user_id, n, peer_id
                        );
                    }
                }
                Ok(Err(e)) => warn!("mark_read for {} failed: {}", user_id, e),
                Err(e) => warn!("spawn_blocking join error: {}", e),
            }
        }
    }
}
