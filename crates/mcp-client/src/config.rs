//! Construction-time configuration for [`crate::Client`].

use std::time::Duration;

use mcp_transport::url_validator::UrlValidatorConfig;

/// Identity the client advertises to the server during `initialize`.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "mcp-client".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// A filesystem root the client advertises via the `roots/list` handler.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Root {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Client-side configuration. Construction is always explicit Rust values; there is no
/// config-file format (an explicit non-goal).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identity sent in the `initialize` request.
    pub client_info: ClientInfo,
    /// MCP protocol version advertised during `initialize`.
    pub protocol_version: String,
    /// Per-request timeout. Zero/negative (represented as `None`) disables the timer.
    pub request_timeout: Option<Duration>,
    /// Bounds how long a synchronous server-request handler (elicitation, sampling, roots)
    /// is allowed to run before the client gives up and returns a timeout error to the server.
    pub handler_timeout: Duration,
    /// Whether `connect` performs the `initialize` handshake automatically.
    pub auto_initialize: bool,
    /// Filesystem roots returned by the default `roots/list` handler.
    pub roots: Vec<Root>,
    /// Policy consulted when an `elicitation/create` request arrives in `url` mode.
    pub url_validator: UrlValidatorConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_info: ClientInfo::default(),
            protocol_version: "2025-06-18".to_string(),
            request_timeout: Some(Duration::from_secs(30)),
            handler_timeout: Duration::from_secs(60),
            auto_initialize: true,
            roots: Vec::new(),
            url_validator: UrlValidatorConfig::default(),
        }
    }
}

/// The cached outcome of a successful `initialize` handshake.
#[derive(Debug, Clone, Default)]
pub struct ServerState {
    pub server_info: Option<serde_json::Value>,
    pub capabilities: Option<serde_json::Value>,
    pub instructions: Option<String>,
}

impl ServerState {
    /// Whether the server's capability descriptor advertises resource subscriptions.
    /// Used to gate `resources/subscribe` without contacting the server (§4.6 capability
    /// gating). A missing or unparseable descriptor is treated as "not advertised".
    #[must_use]
    pub fn supports_resource_subscriptions(&self) -> bool {
        self.capabilities
            .as_ref()
            .and_then(|c| c.get("resources"))
            .and_then(|r| r.get("subscribe"))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}
