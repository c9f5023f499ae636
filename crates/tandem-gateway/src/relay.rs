use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tandem_types::events::{RelayCommand, RelayEvent};

/// Peer-to-peer relay: sockets register a user id and exchange typing and
/// message events directly, without touching the store.
#[derive(Clone, Default)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

#[derive(Default)]
struct RelayInner {
    /// conn_id -> outbound channel of every open relay socket
    connections: RwLock<HashMap<Uuid, mpsc::UnboundedSender<RelayEvent>>>,

    /// user id -> the connection that registered it
    users: RwLock<HashMap<String, Uuid>>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection. Returns (conn_id, receiver).
    pub async fn open(&self) -> (Uuid, mpsc::UnboundedReceiver<RelayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connections.write().await.insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Bind a user id to a connection and tell every socket the new user list.
    /// A later registration of the same id takes it over.
    pub async fn add_user(&self, conn_id: Uuid, user_id: String) {
        info!("Relay user {} registered on {}", user_id, conn_id);
        self.inner.users.write().await.insert(user_id, conn_id);
        self.broadcast_users().await;
    }

    /// Close a connection, releasing only the user ids it still owns.
    pub async fn close(&self, conn_id: Uuid) {
        self.inner.connections.write().await.remove(&conn_id);
        self.inner.users.write().await.retain(|_, owner| *owner != conn_id);
        self.broadcast_users().await;
    }

    /// Registered user ids, sorted.
    pub async fn user_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.users.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn typing(&self, sender_id: String, receiver_id: &str) {
        self.send_to_user(receiver_id, RelayEvent::Typing { sender_id }).await;
    }

    pub async fn send_message(&self, sender_id: String, receiver_id: &str, text: String) {
        let event = RelayEvent::GetMessage {
            sender_id,
            text,
            created_at: Utc::now(),
        };
        self.send_to_user(receiver_id, event).await;
    }

    /// Deliver to the connection owning `user_id`. Unknown receivers are
    /// dropped silently.
    async fn send_to_user(&self, user_id: &str, event: RelayEvent) {
        let Some(conn_id) = self.inner.users.read().await.get(user_id).copied() else {
            debug!("Relay receiver {} not registered, dropping event", user_id);
            return;
        };
        if let Some(tx) = self.inner.connections.read().await.get(&conn_id) {
            let _ = tx.send(event);
        }
    }

    async fn broadcast_users(&self) {
        let event = RelayEvent::GetUsers(self.user_ids().await);
        for tx in self.inner.connections.read().await.values() {
            let _ = tx.send(event.clone());
        }
    }
}

/// Serve one relay socket until it closes.
pub async fn handle_relay_connection(socket: WebSocket, relay: Relay) {
    let (mut sender, mut receiver) = socket.split();
    let (conn_id, mut event_rx) = relay.open().await;
    info!("Relay socket {} connected", conn_id);

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode relay event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let relay_recv = relay.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<RelayCommand>(&text) {
                    Ok(RelayCommand::AddUser(user_id)) => relay_recv.add_user(conn_id, user_id).await,
                    Ok(RelayCommand::Typing { sender_id, receiver_id }) => {
                        relay_recv.typing(sender_id, &receiver_id).await;
                    }
                    Ok(RelayCommand::SendMessage { sender_id, receiver_id, text }) => {
                        relay_recv.send_message(sender_id, &receiver_id, text).await;
                    }
                    Err(e) => warn!("Relay socket {} bad command: {}", conn_id, e),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    relay.close(conn_id).await;
    info!("Relay socket {} disconnected", conn_id);
}
