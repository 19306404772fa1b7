use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use spilka_types::events::SyncEvent;
use spilka_types::models::UserPresence;

/// A typing start with no explicit stop is treated as stale after this long.
/// Repeated starts inside the window are suppressed to avoid broadcast spam.
pub const TYPING_TTL: Duration = Duration::from_secs(3);

/// Manages connected clients, fans out change events, and carries the
/// ephemeral typing/presence state that is never persisted.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for change projections — connections filter by
    /// their conversation subscriptions before forwarding.
    broadcast_tx: broadcast::Sender<SyncEvent>,

    /// Advisory presence per user; overwritten continuously.
    presence: RwLock<HashMap<Uuid, UserPresence>>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender)
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<SyncEvent>)>>,

    /// Last typing-start per (conversation, user)
    typing: RwLock<HashMap<(Uuid, Uuid), Instant>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                presence: RwLock::new(HashMap::new()),
                user_channels: RwLock::new(HashMap::new()),
                typing: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to the event stream. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish an event to all connections. Fire-and-forget: a publish with
    /// no listeners is not an error.
    pub fn publish(&self, event: SyncEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a per-user targeted channel. Returns (conn_id, receiver).
    pub async fn register_user_channel(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<SyncEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a per-user targeted channel, but only if conn_id matches.
    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some((stored_conn_id, _)) = channels.get(&user_id) {
            if *stored_conn_id == conn_id {
                channels.remove(&user_id);
            }
        }
    }

    /// Send a targeted event to a specific user.
    pub async fn send_to_user(&self, user_id: Uuid, event: SyncEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some((_, tx)) = channels.get(&user_id) {
            let _ = tx.send(event);
        }
    }

    /// Mark a user online and announce it.
    pub async fn connect(&self, user_id: Uuid) {
        self.inner.presence.write().await.insert(
            user_id,
            UserPresence {
                user_id,
                is_online: true,
                last_seen_at: Utc::now(),
                current_conversation_id: None,
            },
        );

        self.publish(SyncEvent::PresenceUpdate {
            user_id,
            online: true,
            current_conversation_id: None,
        });
    }

    /// Mark a user offline. Only cleans up if conn_id still owns the user
    /// channel — a newer connection may have taken over.
    pub async fn disconnect(&self, user_id: Uuid, conn_id: Uuid) {
        let is_current = {
            let channels = self.inner.user_channels.read().await;
            channels.get(&user_id).is_some_and(|(cid, _)| *cid == conn_id)
        };

        if !is_current {
            return;
        }

        if let Some(presence) = self.inner.presence.write().await.get_mut(&user_id) {
            presence.is_online = false;
            presence.last_seen_at = Utc::now();
            presence.current_conversation_id = None;
        }

        self.inner
            .typing
            .write()
            .await
            .retain(|(_, uid), _| *uid != user_id);

        self.unregister_user_channel(user_id, conn_id).await;

        self.publish(SyncEvent::PresenceUpdate {
            user_id,
            online: false,
            current_conversation_id: None,
        });
    }

    /// Best-effort presence write: which conversation the user is viewing.
    /// Never part of the message path; callers ignore the outcome.
    pub async fn set_viewing(&self, user_id: Uuid, conversation_id: Option<Uuid>) {
        if let Some(presence) = self.inner.presence.write().await.get_mut(&user_id) {
            presence.current_conversation_id = conversation_id;
            presence.last_seen_at = Utc::now();
        }

        self.publish(SyncEvent::PresenceUpdate {
            user_id,
            online: true,
            current_conversation_id: conversation_id,
        });
    }

    /// Broadcast a typing start. Returns false when a recent start is still
    /// fresh and the broadcast was suppressed.
    pub async fn typing_start(&self, conversation_id: Uuid, user_id: Uuid) -> bool {
        let now = Instant::now();
        {
            let mut typing = self.inner.typing.write().await;
            if let Some(last) = typing.get(&(conversation_id, user_id)) {
                if now.duration_since(*last) < TYPING_TTL {
                    return false;
                }
            }
            typing.insert((conversation_id, user_id), now);
        }

        self.publish(SyncEvent::Typing {
            conversation_id,
            user_id,
            is_typing: true,
        });
        true
    }

    pub async fn typing_stop(&self, conversation_id: Uuid, user_id: Uuid) {
        self.inner
            .typing
            .write()
            .await
            .remove(&(conversation_id, user_id));

        self.publish(SyncEvent::Typing {
            conversation_id,
            user_id,
            is_typing: false,
        });
    }

    /// Snapshot of users currently online.
    pub async fn online_users(&self) -> Vec<UserPresence> {
        self.inner
            .presence
            .read()
            .await
            .values()
            .filter(|p| p.is_online)
            .cloned()
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

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        let conversation_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        dispatcher.publish(SyncEvent::Typing {
            conversation_id,
            user_id,
            is_typing: true,
        });

        match rx.recv().await.unwrap() {
            SyncEvent::Typing { conversation_id: cid, is_typing, .. } => {
                assert_eq!(cid, conversation_id);
                assert!(is_typing);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn repeated_typing_starts_are_suppressed() {
        let dispatcher = Dispatcher::new();
        let conversation_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        assert!(dispatcher.typing_start(conversation_id, user_id).await);
        assert!(!dispatcher.typing_start(conversation_id, user_id).await);

        dispatcher.typing_stop(conversation_id, user_id).await;
        assert!(dispatcher.typing_start(conversation_id, user_id).await);
    }

    #[tokio::test]
    async fn disconnect_clears_presence_and_typing() {
        let dispatcher = Dispatcher::new();
        let user_id = Uuid::new_v4();
        let conversation_id = Uuid::new_v4();

        let (conn_id, _rx) = dispatcher.register_user_channel(user_id).await;
        dispatcher.connect(user_id).await;
        dispatcher.typing_start(conversation_id, user_id).await;
        assert_eq!(dispatcher.online_users().await.len(), 1);

        dispatcher.disconnect(user_id, conn_id).await;
        assert!(dispatcher.online_users().await.is_empty());
        // typing state was cleared, so a new start broadcasts again
        assert!(dispatcher.typing_start(conversation_id, user_id).await);
    }

    #[tokio::test]
    async fn stale_connection_cannot_disconnect_newer_one() {
        let dispatcher = Dispatcher::new();
        let user_id = Uuid::new_v4();

        let (old_conn, _old_rx) = dispatcher.register_user_channel(user_id).await;
        dispatcher.connect(user_id).await;
        let (_new_conn, _new_rx) = dispatcher.register_user_channel(user_id).await;

        dispatcher.disconnect(user_id, old_conn).await;
        assert_eq!(dispatcher.online_users().await.len(), 1);
    }
}
