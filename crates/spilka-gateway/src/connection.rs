use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use spilka_db::Database;
use spilka_types::api::Claims;
use spilka_types::events::{ClientCommand, SyncEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a single WebSocket connection: Identify handshake, Ready, presence
/// snapshot, then the event loop.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    let user_id = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!(%user_id, "connected to gateway");

    if send_event(&mut sender, &SyncEvent::Ready { user_id }).await.is_err() {
        return;
    }

    // Send who is already online before announcing this client.
    for presence in dispatcher.online_users().await {
        let event = SyncEvent::PresenceUpdate {
            user_id: presence.user_id,
            online: true,
            current_conversation_id: presence.current_conversation_id,
        };
        if send_event(&mut sender, &event).await.is_err() {
            return;
        }
    }

    let (conn_id, mut user_rx) = dispatcher.register_user_channel(user_id).await;
    dispatcher.connect(user_id).await;

    let mut broadcast_rx = dispatcher.subscribe();
    let dispatcher_recv = dispatcher.clone();

    // Per-connection conversation subscriptions (shared between tasks).
    let subscriptions: Arc<std::sync::RwLock<HashSet<Uuid>>> =
        Arc::new(std::sync::RwLock::new(HashSet::new()));
    let send_subscriptions = subscriptions.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat.
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
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if let Some(conversation_id) = event.conversation_id() {
                        let subs = send_subscriptions.read()
                            .expect("subscription lock poisoned");
                        if !subs.contains(&conversation_id) {
                            continue;
                        }
                    }

                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    if send_event(&mut sender, &event).await.is_err() {
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

    // Read commands from the client.
    let recv_subscriptions = subscriptions.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&dispatcher_recv, &db, user_id, cmd, &recv_subscriptions)
                            .await;
                    }
                    Err(e) => {
                        warn!(
                            %user_id,
                            "bad command: {} -- raw: {}",
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

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.disconnect(user_id, conn_id).await;
    info!(%user_id, "disconnected from gateway");
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &SyncEvent,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).expect("event serialization failed");
    sender.send(Message::Text(text.into())).await
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<Uuid> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(ClientCommand::Identify { token }) =
                    serde_json::from_str::<ClientCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(token_data.claims.sub);
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
    cmd: ClientCommand,
    subscriptions: &Arc<std::sync::RwLock<HashSet<Uuid>>>,
) {
    match cmd {
        ClientCommand::Identify { .. } => {} // Already handled

        ClientCommand::Subscribe { conversation_ids } => {
            // Only conversations the user actively participates in are
            // eligible; everything else is silently dropped.
            let db = db.clone();
            let verified: HashSet<Uuid> = tokio::task::spawn_blocking(move || {
                conversation_ids
                    .into_iter()
                    .filter(|cid| {
                        matches!(
                            db.get_participant(*cid, user_id),
                            Ok(Some(p)) if p.is_active
                        )
                    })
                    .collect()
            })
            .await
            .unwrap_or_default();

            info!(%user_id, "subscribing to {} conversations", verified.len());
            let mut subs = subscriptions.write().expect("subscription lock poisoned");
            *subs = verified;
        }

        ClientCommand::TypingStart { conversation_id } => {
            let subscribed = {
                let subs = subscriptions.read().expect("subscription lock poisoned");
                subs.contains(&conversation_id)
            };
            if subscribed {
                dispatcher.typing_start(conversation_id, user_id).await;
            }
        }

        ClientCommand::TypingStop { conversation_id } => {
            dispatcher.typing_stop(conversation_id, user_id).await;
        }

        ClientCommand::ViewConversation { conversation_id } => {
            dispatcher.set_viewing(user_id, conversation_id).await;
        }
    }
}
