pub mod destination;
pub mod message;

pub use destination::{group_buying_topic, websocket_url, APP_CHAT_SEND, WS_ENDPOINT_SUFFIX};
pub use message::{ChatMessage, ChatMessageCreate};
