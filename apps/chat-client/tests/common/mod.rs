//! In-process STOMP broker + REST seed server used by the integration
//! tests. Mirrors the production broker contract: CONNECT/CONNECTED,
//! per-connection SUBSCRIBE bookkeeping, and SEND to `/app/chat.send`
//! persisted and fanned out to `/topic/groupbuying/{id}` subscribers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use chat_client::stomp::frame::{self, Command, Frame};
use sikboo_common::{group_buying_topic, ChatMessage, ChatMessageCreate, APP_CHAT_SEND};

const FANOUT_CAPACITY: usize = 256;

#[derive(Clone)]
struct BrokerState {
    messages: Arc<Mutex<HashMap<i64, Vec<ChatMessage>>>>,
    next_message_id: Arc<AtomicI64>,
    next_delivery_id: Arc<AtomicUsize>,
    upgrades: Arc<AtomicUsize>,
    seed_fetches: Arc<AtomicUsize>,
    sends: Arc<AtomicUsize>,
    unsubscribes: Arc<AtomicUsize>,
    // (sx, sy) advertised in CONNECTED. The broker never actually emits
    // heartbeats, so a nonzero sx makes it look half-open to the client.
    heart_beat: Arc<Mutex<(u64, u64)>>,
    fanout: broadcast::Sender<Delivery>,
    kick: broadcast::Sender<()>,
}

#[derive(Debug, Clone)]
struct Delivery {
    destination: String,
    body: String,
}

pub struct Broker {
    pub addr: SocketAddr,
    state: BrokerState,
}

impl Broker {
    /// Bind 127.0.0.1:0 and serve the broker in the background.
    pub async fn start() -> Broker {
        let (fanout, _) = broadcast::channel(FANOUT_CAPACITY);
        let (kick, _) = broadcast::channel(8);
        let state = BrokerState {
            messages: Arc::new(Mutex::new(HashMap::new())),
            next_message_id: Arc::new(AtomicI64::new(1000)),
            next_delivery_id: Arc::new(AtomicUsize::new(0)),
            upgrades: Arc::new(AtomicUsize::new(0)),
            seed_fetches: Arc::new(AtomicUsize::new(0)),
            sends: Arc::new(AtomicUsize::new(0)),
            unsubscribes: Arc::new(AtomicUsize::new(0)),
            heart_beat: Arc::new(Mutex::new((0, 0))),
            fanout,
            kick,
        };

        let app = Router::new()
            .route("/ws", get(ws_upgrade))
            .route(
                "/api/chat/groupbuying/{group_buying_id}/messages",
                get(list_messages),
            )
            .route(
                "/api/chat/groupbuying/{group_buying_id}/count",
                get(count_messages),
            )
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Broker { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Pre-populate a room's persisted history.
    pub fn seed_messages(&self, group_buying_id: i64, messages: Vec<ChatMessage>) {
        self.state
            .messages
            .lock()
            .insert(group_buying_id, messages);
    }

    /// Number of WebSocket upgrades served so far.
    pub fn upgrade_count(&self) -> usize {
        self.state.upgrades.load(Ordering::SeqCst)
    }

    /// Number of REST seed fetches served so far.
    pub fn seed_fetch_count(&self) -> usize {
        self.state.seed_fetches.load(Ordering::SeqCst)
    }

    /// Number of SEND frames received so far.
    pub fn send_count(&self) -> usize {
        self.state.sends.load(Ordering::SeqCst)
    }

    /// Number of UNSUBSCRIBE frames received so far.
    pub fn unsubscribe_count(&self) -> usize {
        self.state.unsubscribes.load(Ordering::SeqCst)
    }

    /// Broadcast a raw MESSAGE body to subscribers of a destination,
    /// bypassing the send path (used to inject malformed payloads and
    /// duplicate ids).
    pub fn inject(&self, destination: &str, body: &str) {
        let _ = self.state.fanout.send(Delivery {
            destination: destination.to_string(),
            body: body.to_string(),
        });
    }

    /// Hard-drop every open WebSocket connection.
    pub fn drop_connections(&self) {
        let _ = self.state.kick.send(());
    }

    /// Advertise a `heart-beat:sx,sy` offer in subsequent CONNECTED
    /// replies. The broker sends no heartbeats of its own, so a nonzero
    /// `sx` lets tests observe the client's silence detection.
    pub fn set_heart_beat(&self, sx: u64, sy: u64) {
        *self.state.heart_beat.lock() = (sx, sy);
    }
}

/// Build a ChatMessage the way the broker would mint one.
pub fn make_message(group_buying_id: i64, message_id: i64, member_id: i64, text: &str) -> ChatMessage {
    ChatMessage {
        message_id,
        group_buying_id,
        member_id,
        member_name: format!("member-{member_id}"),
        message: text.to_string(),
        created_at: Utc::now(),
    }
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<BrokerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn list_messages(
    State(state): State<BrokerState>,
    Path(group_buying_id): Path<i64>,
) -> Json<Vec<ChatMessage>> {
    state.seed_fetches.fetch_add(1, Ordering::SeqCst);
    Json(
        state
            .messages
            .lock()
            .get(&group_buying_id)
            .cloned()
            .unwrap_or_default(),
    )
}

async fn count_messages(
    State(state): State<BrokerState>,
    Path(group_buying_id): Path<i64>,
) -> Json<u64> {
    Json(
        state
            .messages
            .lock()
            .get(&group_buying_id)
            .map(|m| m.len() as u64)
            .unwrap_or(0),
    )
}

async fn handle_socket(socket: WebSocket, state: BrokerState) {
    state.upgrades.fetch_add(1, Ordering::SeqCst);
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut fanout = state.fanout.subscribe();
    let mut kick = state.kick.subscribe();

    // destination -> subscription id, per connection.
    let mut subs: HashMap<String, String> = HashMap::new();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => break,
                };
                if frame::is_heartbeat(text.as_str()) {
                    continue;
                }
                let Ok(frame) = Frame::parse(text.as_str()) else {
                    continue;
                };
                match frame.command {
                    Command::Connect => {
                        let (sx, sy) = *state.heart_beat.lock();
                        let connected = Frame::new(Command::Connected)
                            .header("version", "1.2")
                            .header("heart-beat", &format!("{sx},{sy}"));
                        if ws_tx
                            .send(Message::Text(connected.encode().into()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Command::Subscribe => {
                        let destination = frame.get("destination").unwrap_or("").to_string();
                        let id = frame.get("id").unwrap_or("").to_string();
                        subs.insert(destination, id);
                    }
                    Command::Unsubscribe => {
                        state.unsubscribes.fetch_add(1, Ordering::SeqCst);
                        let id = frame.get("id").unwrap_or("").to_string();
                        subs.retain(|_, v| *v != id);
                    }
                    Command::Send => {
                        state.sends.fetch_add(1, Ordering::SeqCst);
                        if frame.get("destination") == Some(APP_CHAT_SEND) {
                            if let Ok(request) =
                                serde_json::from_str::<ChatMessageCreate>(&frame.body)
                            {
                                let message = store_message(&state, request);
                                let destination = group_buying_topic(message.group_buying_id);
                                let body = serde_json::to_string(&message).unwrap();
                                let _ = state.fanout.send(Delivery { destination, body });
                            }
                        }
                    }
                    Command::Disconnect => break,
                    _ => {}
                }
            }

            delivery = fanout.recv() => {
                let Ok(delivery) = delivery else { continue };
                let Some(sub_id) = subs.get(&delivery.destination) else { continue };
                let delivery_id = state.next_delivery_id.fetch_add(1, Ordering::SeqCst);
                let frame = Frame::new(Command::Message)
                    .header("destination", &delivery.destination)
                    .header("subscription", sub_id)
                    .header("message-id", &delivery_id.to_string())
                    .with_body(delivery.body);
                if ws_tx
                    .send(Message::Text(frame.encode().into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }

            _ = kick.recv() => break,
        }
    }
}

fn store_message(state: &BrokerState, request: ChatMessageCreate) -> ChatMessage {
    let message_id = state.next_message_id.fetch_add(1, Ordering::SeqCst);
    let message = ChatMessage {
        message_id,
        group_buying_id: request.group_buying_id,
        member_id: request.member_id,
        member_name: format!("member-{}", request.member_id),
        message: request.message,
        created_at: Utc::now(),
    };
    state
        .messages
        .lock()
        .entry(request.group_buying_id)
        .or_default()
        .push(message.clone());
    message
}
