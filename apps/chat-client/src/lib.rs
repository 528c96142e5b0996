pub mod cache;
pub mod config;
pub mod error;
pub mod manager;
pub mod registry;
pub mod rest;
pub mod room;
pub mod stomp;
pub mod transport;

use std::sync::Arc;

use cache::MessageCache;
use config::Config;
use error::Result;
use manager::ConnectionManager;
use rest::ChatApi;
use room::ChatRoom;
use stomp::client::SocketOptions;

/// Explicitly constructed session dependencies: REST client, shared
/// message cache, socket timers. There is no module-level connection
/// state — independent sessions coexist without cross-contamination.
#[derive(Clone)]
pub struct ChatSession {
    config: Arc<Config>,
    api: ChatApi,
    cache: MessageCache,
    options: SocketOptions,
}

impl ChatSession {
    pub fn new(config: Config) -> Self {
        Self::with_options(config, SocketOptions::default())
    }

    pub fn with_options(config: Config, options: SocketOptions) -> Self {
        let api = ChatApi::new(&config.api_base_url);
        Self {
            config: Arc::new(config),
            api,
            cache: MessageCache::new(),
            options,
        }
    }

    pub fn api(&self) -> &ChatApi {
        &self.api
    }

    pub fn cache(&self) -> &MessageCache {
        &self.cache
    }

    /// Mount the chat view for a room. Each mount owns its connection,
    /// released again by [`ChatRoom::close`] (or drop).
    pub async fn join(&self, group_buying_id: i64) -> Result<ChatRoom> {
        let manager =
            ConnectionManager::with_options(self.config.websocket_url(), self.options.clone());
        ChatRoom::open(
            &self.api,
            &self.cache,
            manager,
            group_buying_id,
            self.config.member_id,
        )
        .await
    }
}
