//! REST client for the chat endpoints that seed a room before live
//! delivery takes over.

use sikboo_common::ChatMessage;

use crate::error::Result;

#[derive(Clone)]
pub struct ChatApi {
    base_url: String,
    http: reqwest::Client,
}

impl ChatApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Fetch the persisted messages for a room, oldest first.
    pub async fn messages(&self, group_buying_id: i64) -> Result<Vec<ChatMessage>> {
        let url = format!(
            "{}/api/chat/groupbuying/{group_buying_id}/messages",
            self.base_url
        );
        let response = self.http.get(&url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    /// Number of persisted messages in a room.
    pub async fn message_count(&self, group_buying_id: i64) -> Result<u64> {
        let url = format!(
            "{}/api/chat/groupbuying/{group_buying_id}/count",
            self.base_url
        );
        let response = self.http.get(&url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}
