//! Chat room view model: one-shot seed fetch + live subscription,
//! producing a single ordered, deduplicated message list.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use sikboo_common::{group_buying_topic, ChatMessage, ChatMessageCreate, APP_CHAT_SEND};

use crate::cache::MessageCache;
use crate::error::Result;
use crate::manager::ConnectionManager;
use crate::rest::ChatApi;

// ---------------------------------------------------------------------------
// Phase machine
// ---------------------------------------------------------------------------

/// Connection phase of a mounted room, as observed by the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    Idle,
    Connecting,
    Connected,
    Subscribed,
    Disconnected,
}

/// Events that drive the phase machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomEvent {
    ConnectRequested,
    TransportUp,
    SubscriptionOpened,
    SubscriptionClosed,
    TransportDown,
    Closed,
}

/// An event that is not legal in the current phase. Typed so callers log
/// it instead of silently corrupting the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition: {event:?} while {phase:?}")]
pub struct PhaseError {
    pub phase: RoomPhase,
    pub event: RoomEvent,
}

impl RoomPhase {
    pub fn apply(self, event: RoomEvent) -> std::result::Result<RoomPhase, PhaseError> {
        use RoomEvent::*;
        use RoomPhase::*;
        let next = match (self, event) {
            (Idle, ConnectRequested) => Connecting,
            // The transport's own reconnect timer can bring a failed room
            // back up without a fresh ConnectRequested.
            (Connecting | Idle, TransportUp) => Connected,
            (Connected, SubscriptionOpened) => Subscribed,
            (Subscribed, SubscriptionClosed) => Connected,
            (Connected | Subscribed, TransportDown) => Connecting,
            // Handshake failure: back to idle, error surfaced elsewhere.
            (Connecting, TransportDown) => Idle,
            (_, Closed) => Disconnected,
            (phase, event) => return Err(PhaseError { phase, event }),
        };
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

struct RoomShared {
    group_buying_id: i64,
    messages: Mutex<Vec<ChatMessage>>,
    seen: Mutex<HashSet<i64>>,
    phase: Mutex<RoomPhase>,
    cache: MessageCache,
    updates: mpsc::UnboundedSender<ChatMessage>,
}

impl RoomShared {
    fn transition(&self, event: RoomEvent) {
        let mut phase = self.phase.lock();
        match phase.apply(event) {
            Ok(next) => *phase = next,
            Err(err) => tracing::warn!(%err, "phase transition rejected"),
        }
    }

    /// Append a live-delivered message to the local list, the shared
    /// cache entry, and the update channel. Messages whose id was already
    /// seen (seed or live) are dropped.
    fn absorb(&self, message: ChatMessage) {
        if !self.seen.lock().insert(message.message_id) {
            tracing::debug!(message_id = message.message_id, "duplicate message dropped");
            return;
        }
        self.cache.append(self.group_buying_id, message.clone());
        self.messages.lock().push(message.clone());
        let _ = self.updates.send(message);
    }
}

/// A mounted chat room. Owns its connection; closing (or dropping) the
/// room tears the subscription and the socket down unconditionally.
pub struct ChatRoom {
    shared: Arc<RoomShared>,
    manager: ConnectionManager,
    member_id: Option<i64>,
    updates_rx: Option<mpsc::UnboundedReceiver<ChatMessage>>,
    live_task: tokio::task::JoinHandle<()>,
    closed: bool,
}

impl ChatRoom {
    /// Mount a room: seed the message list from the cache (or one REST
    /// fetch on a cold key — never refetched afterwards, live delivery
    /// supersedes polling), start the connection, and subscribe to the
    /// room topic once the transport reports up.
    pub async fn open(
        api: &ChatApi,
        cache: &MessageCache,
        manager: ConnectionManager,
        group_buying_id: i64,
        member_id: Option<i64>,
    ) -> Result<ChatRoom> {
        let seed = match cache.get(group_buying_id) {
            Some(messages) => messages,
            None => {
                let messages = api.messages(group_buying_id).await?;
                cache.replace(group_buying_id, messages.clone());
                messages
            }
        };
        let seen: HashSet<i64> = seed.iter().map(|m| m.message_id).collect();

        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(RoomShared {
            group_buying_id,
            messages: Mutex::new(seed),
            seen: Mutex::new(seen),
            phase: Mutex::new(RoomPhase::Idle),
            cache: cache.clone(),
            updates: updates_tx,
        });

        shared.transition(RoomEvent::ConnectRequested);
        manager.connect();

        let live_task = tokio::spawn(run_live(shared.clone(), manager.clone()));

        Ok(ChatRoom {
            shared,
            manager,
            member_id,
            updates_rx: Some(updates_rx),
            live_task,
            closed: false,
        })
    }

    /// Send a chat message. Returns false without any network call when
    /// the trimmed input is empty or the current member is unknown, and
    /// false from the manager when the connection is down.
    pub fn send(&self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            tracing::warn!("empty message not sent");
            return false;
        }
        let Some(member_id) = self.member_id else {
            tracing::warn!("no current member id; message not sent");
            return false;
        };
        let body = ChatMessageCreate {
            group_buying_id: self.shared.group_buying_id,
            member_id,
            message: trimmed.to_string(),
        };
        self.manager.send(APP_CHAT_SEND, &body)
    }

    /// Snapshot of the ordered message list: seed messages in fetch
    /// order, then live messages in delivery order.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.shared.messages.lock().clone()
    }

    pub fn phase(&self) -> RoomPhase {
        *self.shared.phase.lock()
    }

    /// Take the live update receiver (once) for rendering.
    pub fn updates(&mut self) -> Option<mpsc::UnboundedReceiver<ChatMessage>> {
        self.updates_rx.take()
    }

    /// The room's connection, for status display.
    pub fn connection(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Unmount: unsubscribe, disconnect, stop the live task. Also runs on
    /// drop, so a room cannot leak its socket across navigations.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.manager.disconnect();
        self.live_task.abort();
        self.shared.transition(RoomEvent::Closed);
    }
}

impl Drop for ChatRoom {
    fn drop(&mut self) {
        self.close();
    }
}

/// Background half of the room: waits for the connection, subscribes, and
/// absorbs deliveries until the subscription is torn down.
async fn run_live(shared: Arc<RoomShared>, manager: ConnectionManager) {
    let mut state = manager.state();

    // Subscribing before the handshake completes would be rejected with
    // an inert handle, so wait for the first connected state. A failed
    // handshake surfaces as a disconnected state carrying an error; fall
    // back to Idle (once) until the retry timer brings the transport up.
    let mut reported_failure = false;
    loop {
        let (connected, failed) = {
            let current = state.borrow_and_update();
            (current.is_connected, current.error.is_some())
        };
        if connected {
            break;
        }
        if failed && !reported_failure {
            reported_failure = true;
            shared.transition(RoomEvent::TransportDown);
        }
        if state.changed().await.is_err() {
            return;
        }
    }
    shared.transition(RoomEvent::TransportUp);

    let destination = group_buying_topic(shared.group_buying_id);
    let mut subscription = manager.subscribe(&destination);
    shared.transition(RoomEvent::SubscriptionOpened);
    tracing::debug!(%destination, "room subscribed");

    loop {
        tokio::select! {
            value = subscription.recv() => match value {
                Some(value) => match serde_json::from_value::<ChatMessage>(value) {
                    Ok(message) => shared.absorb(message),
                    Err(err) => tracing::warn!(%err, "undecodable chat payload dropped"),
                },
                // Registry entry cancelled: close() or a displacing mount.
                None => break,
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                if state.borrow_and_update().is_connected {
                    // The client re-issued our SUBSCRIBE during its
                    // re-handshake; no new registry entry is needed.
                    shared.transition(RoomEvent::TransportUp);
                    shared.transition(RoomEvent::SubscriptionOpened);
                } else {
                    shared.transition(RoomEvent::TransportDown);
                }
            }
        }
    }
}
