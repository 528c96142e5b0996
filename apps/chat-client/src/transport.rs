//! WebSocket transport. Opens the stream to the broker endpoint; all
//! retry logic lives in the STOMP client, not here.

use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::Result;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a WebSocket connection to the given URL.
pub async fn open(url: &str) -> Result<WsStream> {
    let (stream, response) = connect_async(url).await?;
    tracing::debug!(%url, status = %response.status(), "websocket open");
    Ok(stream)
}
