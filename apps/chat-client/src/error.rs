use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatClientError>;

/// Failures surfaced by the chat client library.
///
/// Live-path failures (drops, broker errors) are not represented here —
/// they become `ConnectionState.error` strings and trigger the reconnect
/// timer instead of propagating to the caller.
#[derive(Debug, Error)]
pub enum ChatClientError {
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server did not complete the STOMP handshake in time")]
    HandshakeTimeout,
}
