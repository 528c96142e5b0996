//! Connection manager: single owner of one STOMP client per session.
//!
//! Exposes connect/disconnect/subscribe/send and a watchable
//! [`ConnectionState`], hiding all protocol detail. Precondition
//! violations (subscribe or send while down) degrade to inert handles and
//! `false` returns with a logged warning — nothing here panics or returns
//! an error into a caller's render path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::registry::{SubscriptionEntry, SubscriptionRegistry};
use crate::stomp::client::{self, ClientCommand, ClientEvent, SocketOptions, StompHandle};

/// Connection status exposed to views. Reset to `{false, None}` on every
/// new connection attempt; transport and protocol failures land in
/// `error` as plain text.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectionState {
    pub is_connected: bool,
    pub error: Option<String>,
}

struct ManagerInner {
    url: String,
    options: SocketOptions,
    registry: SubscriptionRegistry,
    state_tx: watch::Sender<ConnectionState>,
    client: Mutex<Option<StompHandle>>,
    next_sub_id: AtomicU64,
}

impl ManagerInner {
    fn send_command(&self, cmd: ClientCommand) -> bool {
        match self.client.lock().as_ref() {
            Some(handle) => handle.command(cmd),
            None => {
                tracing::debug!("command dropped; no active client");
                false
            }
        }
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        // Guaranteed socket release even without an explicit disconnect().
        if let Some(handle) = self.client.get_mut().take() {
            handle.deactivate();
        }
    }
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self::with_options(ws_url, SocketOptions::default())
    }

    pub fn with_options(ws_url: impl Into<String>, options: SocketOptions) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::default());
        Self {
            inner: Arc::new(ManagerInner {
                url: ws_url.into(),
                options,
                registry: SubscriptionRegistry::new(),
                state_tx,
                client: Mutex::new(None),
                next_sub_id: AtomicU64::new(0),
            }),
        }
    }

    /// Start the connection. Idempotent: while a client task is active
    /// (connected or waiting out its reconnect timer), repeated calls do
    /// nothing and open no second socket.
    pub fn connect(&self) {
        let mut client = self.inner.client.lock();
        if client.is_some() {
            tracing::debug!("connect() ignored; client already active");
            return;
        }
        self.inner.state_tx.send_replace(ConnectionState::default());

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        *client = Some(client::activate(
            self.inner.url.clone(),
            self.inner.options.clone(),
            event_tx,
        ));
        drop(client);

        tokio::spawn(pump_events(Arc::downgrade(&self.inner), event_rx));
    }

    /// Tear the connection down: cancel every registered subscription,
    /// deactivate the client (suppressing its reconnect timer), and mark
    /// the state disconnected. Safe to call when already down.
    pub fn disconnect(&self) {
        let handle = self.inner.client.lock().take();
        let Some(handle) = handle else {
            tracing::debug!("disconnect() with no active client");
            return;
        };

        for (destination, entry) in self.inner.registry.drain() {
            tracing::debug!(%destination, "unsubscribing on disconnect");
            handle.command(ClientCommand::Unsubscribe { id: entry.id });
        }
        handle.deactivate();
        self.inner.state_tx.send_modify(|s| s.is_connected = false);
    }

    /// Subscribe to a destination. Requires an established connection:
    /// when called while down, logs the precondition violation and
    /// returns an inert handle (closed receiver, no-op unsubscribe, no
    /// registry entry) instead of failing the caller.
    pub fn subscribe(&self, destination: &str) -> Subscription {
        if !self.is_connected() {
            tracing::warn!(%destination, "subscribe() while disconnected; returning inert handle");
            let (_tx, receiver) = mpsc::unbounded_channel();
            return Subscription {
                receiver,
                canceller: Unsubscriber { inner: None },
            };
        }

        let id = self.inner.next_sub_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, receiver) = mpsc::unbounded_channel();

        // One live subscription per destination: displace any prior entry
        // and cancel its server-side interest.
        if let Some(old) = self
            .inner
            .registry
            .insert(destination, SubscriptionEntry { id, tx })
        {
            self.inner
                .send_command(ClientCommand::Unsubscribe { id: old.id });
        }
        self.inner.send_command(ClientCommand::Subscribe {
            id,
            destination: destination.to_string(),
        });

        Subscription {
            receiver,
            canceller: Unsubscriber {
                inner: Some((self.inner.clone(), destination.to_string(), id)),
            },
        }
    }

    /// Serialize and send a message. Returns false — never an error —
    /// when disconnected or when the body fails to serialize, so UI code
    /// can show "failed, please retry" without an exception boundary.
    pub fn send<T: Serialize>(&self, destination: &str, body: &T) -> bool {
        if !self.is_connected() {
            tracing::warn!(%destination, "send() while disconnected");
            return false;
        }
        let body = match serde_json::to_string(body) {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(%destination, %err, "failed to serialize outgoing message");
                self.inner
                    .state_tx
                    .send_modify(|s| s.error = Some(err.to_string()));
                return false;
            }
        };
        self.inner.send_command(ClientCommand::Send {
            destination: destination.to_string(),
            body,
        })
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state_tx.borrow().is_connected
    }

    /// Number of live registry entries (observability for teardown).
    pub fn subscription_count(&self) -> usize {
        self.inner.registry.len()
    }
}

/// Translate client events into state updates and routed deliveries.
async fn pump_events(
    inner: Weak<ManagerInner>,
    mut event_rx: mpsc::UnboundedReceiver<ClientEvent>,
) {
    while let Some(event) = event_rx.recv().await {
        let Some(inner) = inner.upgrade() else { return };
        match event {
            ClientEvent::Connected => {
                inner.state_tx.send_replace(ConnectionState {
                    is_connected: true,
                    error: None,
                });
            }
            ClientEvent::Disconnected { reason } => {
                tracing::debug!(%reason, "socket disconnected");
                inner.state_tx.send_modify(|s| s.is_connected = false);
            }
            ClientEvent::ProtocolError(message) => {
                tracing::warn!(%message, "stomp error");
                inner.state_tx.send_replace(ConnectionState {
                    is_connected: false,
                    error: Some(message),
                });
            }
            ClientEvent::Message { destination, body } => match serde_json::from_str::<Value>(&body)
            {
                Ok(value) => {
                    if !inner.registry.deliver(&destination, value) {
                        tracing::debug!(%destination, "delivery for inactive subscription dropped");
                    }
                }
                // One malformed body never reaches a handler and never
                // tears down the subscription.
                Err(err) => {
                    tracing::warn!(%destination, %err, "malformed message body dropped");
                }
            },
        }
    }
}

/// Live subscription handle: receives parsed message bodies and cancels
/// the subscription when dropped or explicitly unsubscribed.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Value>,
    canceller: Unsubscriber,
}

impl Subscription {
    /// Next delivered body; `None` once the subscription is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }

    /// Cancel now instead of at drop time.
    pub fn unsubscribe(mut self) {
        self.canceller.run();
    }

    /// Split into the delivery receiver and a standalone canceller.
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<Value>, Unsubscriber) {
        (self.receiver, self.canceller)
    }
}

/// Removes the registry entry and the server-side subscription, exactly
/// once, and only while the registry still holds this exact id.
pub struct Unsubscriber {
    inner: Option<(Arc<ManagerInner>, String, u64)>,
}

impl Unsubscriber {
    pub fn cancel(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some((inner, destination, id)) = self.inner.take() {
            if inner.registry.remove(&destination, id).is_some() {
                inner.send_command(ClientCommand::Unsubscribe { id });
            }
        }
    }
}

impl Drop for Unsubscriber {
    fn drop(&mut self) {
        self.run();
    }
}
