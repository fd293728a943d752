use serde_json::{json, Value};

use mcp_protocol::{Error, Result};
use mcp_transport_traits::Transport;

use crate::client::core::Client;

impl<T: Transport + 'static> Client<T> {
    /// `resources/list`.
    pub async fn list_resources(&self) -> Result<Value> {
        self.call("resources/list", None).await
    }

    /// `resources/read`.
    pub async fn read_resource(&self, uri: &str) -> Result<Value> {
        self.call("resources/read", Some(json!({ "uri": uri }))).await
    }

    /// `resources/templates/list`.
    pub async fn list_resource_templates(&self) -> Result<Value> {
        self.call("resources/templates/list", None).await
    }

    /// `resources/subscribe`. Gated on the server having advertised
    /// `capabilities.resources.subscribe` during `initialize` (§4.6); returns
    /// [`Error::Validation`] locally rather than sending a request the server never
    /// declared support for.
    pub async fn subscribe_resource(&self, uri: &str) -> Result<()> {
        if !self.server_state().supports_resource_subscriptions() {
            return Err(Error::validation(
                "server did not advertise resources.subscribe capability",
            ));
        }
        self.call("resources/subscribe", Some(json!({ "uri": uri })))
            .await?;
        Ok(())
    }

    /// `resources/unsubscribe`.
    pub async fn unsubscribe_resource(&self, uri: &str) -> Result<()> {
        self.call("resources/unsubscribe", Some(json!({ "uri": uri })))
            .await?;
        Ok(())
    }
}
