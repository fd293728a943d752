use serde_json::{json, Value};

use mcp_protocol::Result;
use mcp_transport_traits::Transport;

use crate::client::core::Client;

impl<T: Transport + 'static> Client<T> {
    /// `ping`: a liveness check that bypasses the `initialize` gate, so it can be used to
    /// probe a connection before or independent of the handshake.
    pub async fn ping(&self) -> Result<()> {
        self.call_raw("ping", None).await?;
        Ok(())
    }

    /// `logging/setLevel`.
    pub async fn set_log_level(&self, level: &str) -> Result<()> {
        self.call("logging/setLevel", Some(json!({ "level": level })))
            .await?;
        Ok(())
    }

    /// `notifications/cancelled`, informing the server that a previously sent request
    /// (identified by its numeric id) is no longer wanted.
    pub async fn notify_cancelled(&self, request_id: i64, reason: Option<&str>) -> Result<()> {
        let mut params = json!({ "requestId": request_id });
        if let Some(reason) = reason {
            params["reason"] = Value::String(reason.to_string());
        }
        self.notify_raw("notifications/cancelled", Some(params)).await
    }

    /// `notifications/roots/list_changed`, telling the server the client's root set has
    /// changed and it should re-issue `roots/list` if it cares.
    pub async fn notify_roots_list_changed(&self) -> Result<()> {
        self.notify_raw("notifications/roots/list_changed", None).await
    }
}
