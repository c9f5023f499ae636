use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use tandem_types::events::{GatewayCommand, GatewayEvent, SubscriptionTarget};

use crate::dispatcher::{Dispatcher, Identity};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh socket may take to send Identify.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Subscriptions = Arc<std::sync::Mutex<HashMap<SubscriptionTarget, JoinHandle<()>>>>;

/// Handle a single gateway socket: Identify, Ready, then subscriptions
/// until either side goes away.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let identity = match wait_for_identify(&mut receiver, &dispatcher, &jwt_secret).await {
        Some(identity) => identity,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", identity.name, identity.user_id);

    let ready = GatewayEvent::Ready {
        user_id: identity.user_id,
        name: identity.name.clone(),
        role: identity.role,
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, identity).await;
}

async fn run_connection_loop(
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut receiver: futures_util::stream::SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    identity: Identity,
) {
    let user_id = identity.user_id;
    let conn_id = dispatcher.connect(user_id).await;

    // Every subscription task writes into this connection's channel
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<GatewayEvent>();
    let subscriptions: Subscriptions = Arc::new(std::sync::Mutex::new(HashMap::new()));

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    let Some(event) = event else { break };
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

    let dispatcher_recv = dispatcher.clone();
    let identity_recv = identity.clone();
    let recv_subscriptions = subscriptions.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&dispatcher_recv, &identity_recv, cmd, &recv_subscriptions, &event_tx)
                            .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            identity_recv.name,
                            identity_recv.user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        let _ = event_tx.send(GatewayEvent::Error {
                            message: format!("bad command: {}", e),
                        });
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

    match subscriptions.lock() {
        Ok(mut subs) => {
            for (_, task) in subs.drain() {
                task.abort();
            }
        }
        Err(e) => error!("Subscription lock poisoned for {}: {}", user_id, e),
    }

    dispatcher.disconnect(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", identity.name, user_id);
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    dispatcher: &Dispatcher,
    jwt_secret: &str,
) -> Option<Identity> {
    use jsonwebtoken::{DecodingKey, Validation, decode};
    use tandem_types::api::Claims;

    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
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

                    let claims = token_data.claims;
                    return Some(Identity {
                        user_id: claims.sub,
                        role: dispatcher.tree().role_of(&claims.email),
                        email: claims.email,
                        name: claims.name,
                    });
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    identity: &Identity,
    cmd: GatewayCommand,
    subscriptions: &Subscriptions,
    event_tx: &mpsc::UnboundedSender<GatewayEvent>,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::Subscribe { target } => {
            let already = subscriptions
                .lock()
                .map(|subs| subs.get(&target).is_some_and(|task| !task.is_finished()))
                .unwrap_or(false);
            if already {
                return;
            }

            match dispatcher.subscribe(identity, target, event_tx.clone()).await {
                Ok(task) => match subscriptions.lock() {
                    Ok(mut subs) => {
                        if let Some(previous) = subs.insert(target, task) {
                            previous.abort();
                        }
                    }
                    Err(e) => {
                        error!("Subscription lock poisoned: {}", e);
                        task.abort();
                    }
                },
                Err(e) => {
                    warn!("{} ({}) cannot subscribe to {:?}: {}", identity.name, identity.user_id, target, e);
                    let _ = event_tx.send(GatewayEvent::Error { message: e.to_string() });
                }
            }
        }

        GatewayCommand::Unsubscribe { target } => {
            let task = subscriptions.lock().ok().and_then(|mut subs| subs.remove(&target));
            if let Some(task) = task {
                task.abort();
                info!("{} ({}) unsubscribed from {:?}", identity.name, identity.user_id, target);
            }
        }
    }
}
