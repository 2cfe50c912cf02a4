use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use parlor_db::Database;
use parlor_types::actor::{Actor, Claims};
use parlor_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;
use crate::fanout;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Time a client has to send Identify after connecting.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Subscriptions = Arc<std::sync::Mutex<HashMap<Uuid, JoinHandle<()>>>>;

/// Handle a single WebSocket connection: Identify handshake, then channel
/// subscriptions until either side goes away or the bus closes.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    let actor = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(actor) => actor,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    let ensure_db = db.clone();
    let ensure_actor = actor.clone();
    let ensured = tokio::task::spawn_blocking(move || {
        ensure_db.ensure_user(ensure_actor.id, &ensure_actor.username, ensure_actor.role)
    })
    .await;
    if !matches!(ensured, Ok(Ok(()))) {
        error!("Failed to record gateway user {}", actor.id);
        return;
    }

    info!("{} ({}) connected to gateway", actor.username, actor.id);

    let ready = GatewayEvent::Ready {
        user_id: actor.id,
        username: actor.username.clone(),
    };
    let Some(frame) = frame(&ready) else { return };
    if sender.send(frame).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, db, actor).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, WsMessage>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    actor: Actor,
) {
    // Events for this client: command replies and forwarded messages
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<GatewayEvent>();
    let subscriptions: Subscriptions = Arc::new(std::sync::Mutex::new(HashMap::new()));

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let closed = dispatcher.closed();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                _ = closed.cancelled() => {
                    let _ = sender.send(WsMessage::Close(None)).await;
                    break;
                }
                event = out_rx.recv() => {
                    let Some(event) = event else { break };
                    let Some(frame) = frame(&event) else { continue };
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(
                                "Heartbeat timeout (missed {} pongs), dropping connection",
                                missed_heartbeats
                            );
                            break;
                        }
                    }
                    if sender.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_actor = actor.clone();
    let recv_subscriptions = subscriptions.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let raw = text.as_str();
                    match serde_json::from_str::<GatewayCommand>(raw) {
                        Ok(cmd) => {
                            handle_command(
                                &dispatcher,
                                &db,
                                &recv_actor,
                                cmd,
                                &recv_subscriptions,
                                &out_tx,
                            )
                            .await;
                        }
                        Err(e) => {
                            warn!(
                                "{} ({}) bad command: {} -- raw: {}",
                                recv_actor.username,
                                recv_actor.id,
                                e,
                                raw.chars().take(200).collect::<String>()
                            );
                        }
                    }
                }
                WsMessage::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    if let Ok(mut subs) = subscriptions.lock() {
        for (_, task) in subs.drain() {
            task.abort();
        }
    }
    info!("{} ({}) disconnected from gateway", actor.username, actor.id);
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<Actor> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let WsMessage::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(text.as_str())
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(Actor::from(token_data.claims));
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
    actor: &Actor,
    cmd: GatewayCommand,
    subscriptions: &Subscriptions,
    out_tx: &mpsc::UnboundedSender<GatewayEvent>,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::Subscribe { channel_id } => {
            let subscribed =
                fanout::subscribe(dispatcher.clone(), db.clone(), actor.clone(), channel_id).await;
            let stream = match subscribed {
                Ok(stream) => stream,
                Err(e) => {
                    debug!(
                        "{} ({}) subscribe to {} refused: {}",
                        actor.username, actor.id, channel_id, e
                    );
                    let _ = out_tx.send(GatewayEvent::Error {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    });
                    return;
                }
            };

            info!("{} ({}) subscribed to channel {}", actor.username, actor.id, channel_id);
            let forward_tx = out_tx.clone();
            let task = tokio::spawn(async move {
                let mut stream = Box::pin(stream);
                while let Some(message) = stream.next().await {
                    if forward_tx.send(GatewayEvent::MessageCreate { message }).is_err() {
                        break;
                    }
                }
            });

            if let Ok(mut subs) = subscriptions.lock() {
                if let Some(previous) = subs.insert(channel_id, task) {
                    previous.abort();
                }
            }
            let _ = out_tx.send(GatewayEvent::Subscribed { channel_id });
        }

        GatewayCommand::Unsubscribe { channel_id } => {
            let removed = subscriptions.lock().ok().and_then(|mut subs| subs.remove(&channel_id));
            if let Some(task) = removed {
                task.abort();
                info!("{} ({}) unsubscribed from channel {}", actor.username, actor.id, channel_id);
            }
            let _ = out_tx.send(GatewayEvent::Unsubscribed { channel_id });
        }
    }
}

fn frame(event: &GatewayEvent) -> Option<WsMessage> {
    match serde_json::to_string(event) {
        Ok(json) => Some(WsMessage::Text(json.into())),
        Err(e) => {
            error!("Failed to encode gateway event: {}", e);
            None
        }
    }
}
