use std::sync::atomic::Ordering;

use serde_json::json;
use tracing::info;

use mcp_protocol::Result;
use mcp_transport_traits::Transport;

use crate::client::core::Client;
use crate::config::ServerState;

impl<T: Transport + 'static> Client<T> {
    /// Perform the `initialize` handshake: advertise this client's identity and
    /// capabilities, record what the server sent back, then send
    /// `notifications/initialized`. Called automatically by `connect()` unless
    /// [`crate::ClientConfig::auto_initialize`] is `false`.
    pub async fn initialize(&self) -> Result<ServerState> {
        let capabilities = json!({
            "elicitation": {},
            "roots": { "listChanged": true },
        });
        let params = json!({
            "protocolVersion": self.inner.config.protocol_version,
            "capabilities": capabilities,
            "clientInfo": {
                "name": self.inner.config.client_info.name,
                "version": self.inner.config.client_info.version,
            },
        });

        let result = self.call_raw("initialize", Some(params)).await?;

        let state = ServerState {
            server_info: result.get("serverInfo").cloned(),
            capabilities: result.get("capabilities").cloned(),
            instructions: result
                .get("instructions")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string),
        };
        *self.inner.server_state.write() = state.clone();
        self.inner.initialized.store(true, Ordering::SeqCst);

        self.notify_raw("notifications/initialized", None).await?;
        info!("handshake complete");
        Ok(state)
    }
}
