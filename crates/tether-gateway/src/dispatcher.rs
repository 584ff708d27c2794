use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use tether_types::events::GatewayEvent;

/// One live gateway connection for a user. The conn_id distinguishes this
/// connection from any later one that replaces it.
struct PresenceEntry {
    conn_id: Uuid,
    username: String,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

/// The presence registry: at most one delivery channel per user, plus the
/// broadcast fan-out every connection subscribes to. Holds state only;
/// status broadcasts are the connection loop's job.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for gateway events — all connected clients receive all events
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Per-user delivery channels: user_id -> live connection entry
    entries: RwLock<HashMap<Uuid, PresenceEntry>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                entries: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a user's delivery channel, replacing any prior entry (last
    /// write wins, so a reconnect without an explicit disconnect is fine).
    /// Returns (conn_id, receiver).
    pub async fn register(
        &self,
        user_id: Uuid,
        username: String,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.entries.write().await.insert(
            user_id,
            PresenceEntry {
                conn_id,
                username,
                tx,
            },
        );
        (conn_id, rx)
    }

    /// Remove a user's entry, but only if conn_id still matches, so a newer
    /// connection's entry is never clobbered by a stale disconnect.
    /// Returns whether the entry was actually removed.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let mut entries = self.inner.entries.write().await;
        if entries.get(&user_id).is_some_and(|e| e.conn_id == conn_id) {
            entries.remove(&user_id);
            true
        } else {
            false
        }
    }

    /// Push a targeted event to a specific user. Returns false when the user
    /// has no live channel (offline) or the channel is already closed.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> bool {
        let entries = self.inner.entries.read().await;
        match entries.get(&user_id) {
            Some(entry) => entry.tx.send(event).is_ok(),
            None => false,
        }
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.entries.read().await.contains_key(&user_id)
    }

    /// Snapshot of everyone currently online.
    pub async fn online_users(&self) -> Vec<(Uuid, String)> {
        self.inner
            .entries
            .read()
            .await
            .iter()
            .map(|(id, entry)| (*id, entry.username.clone()))
            .collect()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_types::events::PresenceStatus;

    fn status_event(user_id: Uuid) -> GatewayEvent {
        GatewayEvent::UserStatus {
            user_id,
            status: PresenceStatus::Online,
        }
    }

    #[tokio::test]
    async fn register_last_write_wins() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (_c1, mut rx1) = dispatcher.register(user, "alice".into()).await;
        let (_c2, mut rx2) = dispatcher.register(user, "alice".into()).await;

        assert!(dispatcher.send_to_user(user, status_event(user)).await);

        // Only the newest channel receives; the replaced one is closed off.
        assert!(rx2.recv().await.is_some());
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_disconnect_does_not_remove_newer_entry() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (old_conn, _rx1) = dispatcher.register(user, "alice".into()).await;
        let (new_conn, _rx2) = dispatcher.register(user, "alice".into()).await;

        assert!(!dispatcher.unregister(user, old_conn).await);
        assert!(dispatcher.is_online(user).await);

        assert!(dispatcher.unregister(user, new_conn).await);
        assert!(!dispatcher.is_online(user).await);
    }

    #[tokio::test]
    async fn send_to_offline_user_is_false() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        assert!(!dispatcher.send_to_user(user, status_event(user)).await);

        let (conn_id, rx) = dispatcher.register(user, "alice".into()).await;
        drop(rx);
        // Entry exists but the receiver is gone; still not deliverable.
        assert!(!dispatcher.send_to_user(user, status_event(user)).await);

        dispatcher.unregister(user, conn_id).await;
        assert!(!dispatcher.send_to_user(user, status_event(user)).await);
    }

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let mut sub1 = dispatcher.subscribe();
        let mut sub2 = dispatcher.subscribe();

        dispatcher.broadcast(status_event(user));

        assert!(matches!(
            sub1.recv().await.unwrap(),
            GatewayEvent::UserStatus { .. }
        ));
        assert!(matches!(
            sub2.recv().await.unwrap(),
            GatewayEvent::UserStatus { .. }
        ));
    }

    #[tokio::test]
    async fn online_users_snapshot() {
        let dispatcher = Dispatcher::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let (_ca, _rxa) = dispatcher.register(alice, "alice".into()).await;
        let (cb, _rxb) = dispatcher.register(bob, "bob".into()).await;

        let mut online = dispatcher.online_users().await;
        online.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(online.len(), 2);
        assert_eq!(online[0].1, "alice");

        dispatcher.unregister(bob, cb).await;
        assert_eq!(dispatcher.online_users().await.len(), 1);
    }
}
