//! Broker destination naming and WebSocket endpoint derivation.

/// Application destination for outgoing chat sends. One fixed destination
/// for all rooms; the room id is carried in the message body.
pub const APP_CHAT_SEND: &str = "/app/chat.send";

/// Path suffix appended to the API base URL to reach the STOMP endpoint.
pub const WS_ENDPOINT_SUFFIX: &str = "/ws";

/// Broadcast topic for a group-buying room.
pub fn group_buying_topic(group_buying_id: i64) -> String {
    format!("/topic/groupbuying/{group_buying_id}")
}

/// Derive the WebSocket URL from the configured API base URL.
///
/// Rewrites the scheme (`http` → `ws`, `https` → `wss`) and appends the
/// endpoint suffix. A base URL without a known scheme is passed through
/// with only the suffix appended.
pub fn websocket_url(api_base_url: &str) -> String {
    let base = api_base_url.trim_end_matches('/');
    let rewritten = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{rewritten}{WS_ENDPOINT_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_embeds_room_id() {
        assert_eq!(group_buying_topic(42), "/topic/groupbuying/42");
    }

    #[test]
    fn websocket_url_rewrites_scheme() {
        assert_eq!(
            websocket_url("http://localhost:8080"),
            "ws://localhost:8080/ws"
        );
        assert_eq!(
            websocket_url("https://api.sikboo.app/"),
            "wss://api.sikboo.app/ws"
        );
    }

    #[test]
    fn websocket_url_passes_through_ws_scheme() {
        assert_eq!(
            websocket_url("ws://127.0.0.1:9000"),
            "ws://127.0.0.1:9000/ws"
        );
    }
}
