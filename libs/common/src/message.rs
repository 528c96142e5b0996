//! Chat wire types shared by the client, the CLI, and test tooling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat message as broadcast by the server.
///
/// `message_id` is server-assigned and unique within a group-buying room.
/// Messages are immutable once received; the client never mutates or
/// deletes one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message_id: i64,
    pub group_buying_id: i64,
    pub member_id: i64,
    pub member_name: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// The outgoing send envelope. The room id travels in the body — the send
/// destination is the same for every room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageCreate {
    pub group_buying_id: i64,
    pub member_id: i64,
    pub message: String,
}
