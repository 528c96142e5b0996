//! STOMP connection task: CONNECT handshake, heartbeats, automatic
//! reconnect with explicit resubscription.
//!
//! The task owns the transport. Its owner talks to it over a command
//! channel and hears back over an event channel; nothing here blocks or
//! panics on a dead socket — drops become [`ClientEvent::Disconnected`]
//! followed by a timed reconnect, and [`ClientCommand::Deactivate`] is the
//! only way to suppress that timer.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{ChatClientError, Result};
use crate::stomp::frame::{self, Command, Frame};
use crate::transport::{self, WsStream};

/// Outgoing heartbeat interval offered in the CONNECT frame (ms).
pub const HEARTBEAT_OUTGOING_MS: u64 = 4000;
/// Heartbeat interval expected from the server (ms).
pub const HEARTBEAT_INCOMING_MS: u64 = 4000;
/// Delay before a reconnect attempt after an unexpected drop (ms).
pub const RECONNECT_DELAY_MS: u64 = 5000;
/// Timeout for the CONNECTED reply after sending CONNECT (seconds).
const HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Stand-in period for timers that are disabled by heartbeat negotiation.
const TIMER_DISABLED: Duration = Duration::from_secs(3600);

/// Connection timers. Defaults are the production values; tests inject
/// shorter ones.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    pub heartbeat_outgoing: Duration,
    pub heartbeat_incoming: Duration,
    pub reconnect_delay: Duration,
    pub handshake_timeout: Duration,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            heartbeat_outgoing: Duration::from_millis(HEARTBEAT_OUTGOING_MS),
            heartbeat_incoming: Duration::from_millis(HEARTBEAT_INCOMING_MS),
            reconnect_delay: Duration::from_millis(RECONNECT_DELAY_MS),
            handshake_timeout: Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
        }
    }
}

/// Commands from the connection manager into the task.
#[derive(Debug)]
pub enum ClientCommand {
    Subscribe { id: u64, destination: String },
    Unsubscribe { id: u64 },
    Send { destination: String, body: String },
    Deactivate,
}

/// Lifecycle and delivery events out of the task.
#[derive(Debug)]
pub enum ClientEvent {
    Connected,
    Disconnected { reason: String },
    ProtocolError(String),
    Message { destination: String, body: String },
}

/// Handle to a running connection task.
pub struct StompHandle {
    cmd_tx: mpsc::UnboundedSender<ClientCommand>,
}

impl StompHandle {
    /// Queue a command. Returns false when the task has already ended.
    pub fn command(&self, cmd: ClientCommand) -> bool {
        self.cmd_tx.send(cmd).is_ok()
    }

    pub fn deactivate(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Deactivate);
    }
}

/// Spawn the connection task. Completion of the handshake is signaled via
/// [`ClientEvent::Connected`] on `event_tx`, failure via
/// [`ClientEvent::ProtocolError`]; this call itself never blocks.
pub fn activate(
    url: String,
    options: SocketOptions,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
) -> StompHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    tokio::spawn(run(url, options, cmd_rx, event_tx));
    StompHandle { cmd_tx }
}

enum SessionEnd {
    Deactivated,
    Dropped(String),
}

async fn run(
    url: String,
    options: SocketOptions,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientCommand>,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
) {
    // Subscriptions that must hold across reconnects. Reconnecting means
    // re-issuing SUBSCRIBE for every one of these before anything else.
    let mut subscriptions: HashMap<u64, String> = HashMap::new();

    loop {
        let (ws, intervals) = match connect_and_handshake(&url, &options).await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::debug!(%err, "handshake failed");
                let _ = event_tx.send(ClientEvent::ProtocolError(err.to_string()));
                if !backoff(&mut cmd_rx, options.reconnect_delay, &mut subscriptions).await {
                    break;
                }
                continue;
            }
        };

        let (mut ws_tx, mut ws_rx) = ws.split();

        // Replay server-side interest before reporting the connection up,
        // so subscribers never observe a connected-but-unsubscribed gap.
        let mut resubscribed = true;
        for (id, destination) in &subscriptions {
            if send_frame(&mut ws_tx, Frame::subscribe(*id, destination))
                .await
                .is_err()
            {
                resubscribed = false;
                break;
            }
            tracing::debug!(%destination, "resubscribed after reconnect");
        }
        if !resubscribed {
            let _ = event_tx.send(ClientEvent::Disconnected {
                reason: "write failed during resubscribe".to_string(),
            });
            if !backoff(&mut cmd_rx, options.reconnect_delay, &mut subscriptions).await {
                break;
            }
            continue;
        }

        let _ = event_tx.send(ClientEvent::Connected);

        let end = session(
            &mut ws_tx,
            &mut ws_rx,
            intervals,
            &mut cmd_rx,
            &event_tx,
            &mut subscriptions,
        )
        .await;

        match end {
            SessionEnd::Deactivated => {
                let _ = send_frame(&mut ws_tx, Frame::disconnect()).await;
                let _ = ws_tx.close().await;
                let _ = event_tx.send(ClientEvent::Disconnected {
                    reason: "deactivated".to_string(),
                });
                break;
            }
            SessionEnd::Dropped(reason) => {
                tracing::debug!(%reason, "connection dropped; scheduling reconnect");
                let _ = event_tx.send(ClientEvent::Disconnected { reason });
                if !backoff(&mut cmd_rx, options.reconnect_delay, &mut subscriptions).await {
                    break;
                }
            }
        }
    }

    tracing::debug!("stomp client task ended");
}

/// Open the transport and complete the CONNECT/CONNECTED exchange.
/// Returns the stream plus the negotiated (outgoing, incoming) heartbeat
/// intervals; `None` means that direction is disabled.
async fn connect_and_handshake(
    url: &str,
    options: &SocketOptions,
) -> Result<(WsStream, (Option<Duration>, Option<Duration>))> {
    let mut ws = transport::open(url).await?;

    let cx = options.heartbeat_outgoing.as_millis() as u64;
    let cy = options.heartbeat_incoming.as_millis() as u64;
    let connect = Frame::connect(host_of(url), cx, cy);
    ws.send(Message::Text(connect.encode().into())).await?;

    let connected = time::timeout(options.handshake_timeout, async {
        while let Some(msg) = ws.next().await {
            match msg? {
                Message::Text(text) => {
                    if frame::is_heartbeat(text.as_str()) {
                        continue;
                    }
                    let frame = Frame::parse(text.as_str())?;
                    return match frame.command {
                        Command::Connected => Ok(frame),
                        Command::Error => Err(ChatClientError::Protocol(
                            frame
                                .get("message")
                                .unwrap_or("handshake rejected")
                                .to_string(),
                        )),
                        other => Err(ChatClientError::Protocol(format!(
                            "expected CONNECTED, got {}",
                            other.as_str()
                        ))),
                    };
                }
                Message::Close(_) => {
                    return Err(ChatClientError::Protocol(
                        "connection closed during handshake".to_string(),
                    ))
                }
                _ => continue,
            }
        }
        Err(ChatClientError::Protocol(
            "stream ended during handshake".to_string(),
        ))
    })
    .await
    .map_err(|_| ChatClientError::HandshakeTimeout)??;

    let (sx, sy) = connected
        .get("heart-beat")
        .and_then(frame::parse_heart_beat)
        .unwrap_or((0, 0));
    // Per STOMP 1.2: each direction runs at the larger of the two offers,
    // and is off entirely when either side offered 0.
    let outgoing = (cx > 0 && sy > 0).then(|| Duration::from_millis(cx.max(sy)));
    let incoming = (cy > 0 && sx > 0).then(|| Duration::from_millis(cy.max(sx)));

    Ok((ws, (outgoing, incoming)))
}

/// Main connected loop: route server frames, apply commands, keep both
/// heartbeat directions honest.
async fn session(
    ws_tx: &mut SplitSink<WsStream, Message>,
    ws_rx: &mut SplitStream<WsStream>,
    (outgoing, incoming): (Option<Duration>, Option<Duration>),
    cmd_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
    event_tx: &mpsc::UnboundedSender<ClientEvent>,
    subscriptions: &mut HashMap<u64, String>,
) -> SessionEnd {
    let mut send_beat = time::interval(outgoing.unwrap_or(TIMER_DISABLED));
    send_beat.tick().await; // First tick fires immediately; skip it.
    let has_outgoing = outgoing.is_some();

    // Server liveness: any inbound data counts, and silence beyond 1.5x
    // the negotiated interval means the connection is half-open.
    let liveness_window = incoming.map(|d| d * 3 / 2);
    let mut check_beat = time::interval(liveness_window.unwrap_or(TIMER_DISABLED));
    check_beat.tick().await;
    let has_incoming = liveness_window.is_some();
    let mut saw_activity = true;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        saw_activity = true;
                        if frame::is_heartbeat(text.as_str()) {
                            continue;
                        }
                        match Frame::parse(text.as_str()) {
                            Ok(frame) => match frame.command {
                                Command::Message => {
                                    let destination = frame
                                        .get("destination")
                                        .unwrap_or_default()
                                        .to_string();
                                    let _ = event_tx.send(ClientEvent::Message {
                                        destination,
                                        body: frame.body,
                                    });
                                }
                                Command::Error => {
                                    let message = frame
                                        .get("message")
                                        .map(str::to_string)
                                        .unwrap_or_else(|| frame.body.clone());
                                    let _ = event_tx.send(ClientEvent::ProtocolError(message.clone()));
                                    return SessionEnd::Dropped(message);
                                }
                                Command::Receipt => {}
                                other => {
                                    tracing::debug!(command = other.as_str(), "unexpected frame ignored");
                                }
                            },
                            // One unparseable frame never tears down the session.
                            Err(err) => tracing::warn!(%err, "unparseable frame dropped"),
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        saw_activity = true;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return SessionEnd::Dropped("connection closed".to_string());
                    }
                    Some(Ok(_)) => {
                        saw_activity = true;
                    }
                    Some(Err(err)) => return SessionEnd::Dropped(err.to_string()),
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Subscribe { id, destination }) => {
                        subscriptions.insert(id, destination.clone());
                        if send_frame(ws_tx, Frame::subscribe(id, &destination)).await.is_err() {
                            return SessionEnd::Dropped("write failed".to_string());
                        }
                    }
                    Some(ClientCommand::Unsubscribe { id }) => {
                        subscriptions.remove(&id);
                        if send_frame(ws_tx, Frame::unsubscribe(id)).await.is_err() {
                            return SessionEnd::Dropped("write failed".to_string());
                        }
                    }
                    Some(ClientCommand::Send { destination, body }) => {
                        if send_frame(ws_tx, Frame::send(&destination, body)).await.is_err() {
                            return SessionEnd::Dropped("write failed".to_string());
                        }
                    }
                    Some(ClientCommand::Deactivate) | None => return SessionEnd::Deactivated,
                }
            }

            _ = send_beat.tick(), if has_outgoing => {
                if ws_tx.send(Message::Text("\n".into())).await.is_err() {
                    return SessionEnd::Dropped("heartbeat write failed".to_string());
                }
            }

            _ = check_beat.tick(), if has_incoming => {
                if !saw_activity {
                    return SessionEnd::Dropped("heartbeat timeout".to_string());
                }
                saw_activity = false;
            }
        }
    }
}

/// Wait out the reconnect delay. Returns false when a Deactivate (or the
/// loss of every command sender) means the task should stop instead.
async fn backoff(
    cmd_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
    delay: Duration,
    subscriptions: &mut HashMap<u64, String>,
) -> bool {
    let deadline = time::sleep(delay);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => return true,
            cmd = cmd_rx.recv() => match cmd {
                Some(ClientCommand::Deactivate) | None => return false,
                Some(ClientCommand::Subscribe { id, destination }) => {
                    // Queued while down (or still in flight when the
                    // session dropped): record it so the reconnect
                    // replay covers it.
                    subscriptions.insert(id, destination);
                }
                Some(ClientCommand::Unsubscribe { id }) => {
                    // Cancelled while down: must not come back on reconnect.
                    subscriptions.remove(&id);
                }
                Some(cmd @ ClientCommand::Send { .. }) => {
                    tracing::debug!(?cmd, "send dropped while disconnected");
                }
            }
        }
    }
}

async fn send_frame(
    ws_tx: &mut SplitSink<WsStream, Message>,
    frame: Frame,
) -> std::result::Result<(), tokio_tungstenite::tungstenite::Error> {
    ws_tx.send(Message::Text(frame.encode().into())).await
}

fn host_of(url: &str) -> &str {
    let rest = url.split("://").nth(1).unwrap_or(url);
    rest.split('/').next().unwrap_or(rest)
}
