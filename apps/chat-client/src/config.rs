/// Chat client configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// API origin (e.g. `http://localhost:8080`). The STOMP endpoint is
    /// derived from this by scheme rewrite plus the `/ws` suffix.
    pub api_base_url: String,
    /// Current member id stamped into outgoing messages. Sends are
    /// rejected client-side while this is unset.
    pub member_id: Option<i64>,
    /// Display name for the terminal prompt.
    pub member_name: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            api_base_url: required_var("API_BASE_URL"),
            member_id: std::env::var("MEMBER_ID").ok().and_then(|v| v.parse().ok()),
            member_name: std::env::var("MEMBER_NAME").ok().filter(|s| !s.is_empty()),
        }
    }

    /// The derived STOMP WebSocket URL.
    pub fn websocket_url(&self) -> String {
        sikboo_common::websocket_url(&self.api_base_url)
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}
