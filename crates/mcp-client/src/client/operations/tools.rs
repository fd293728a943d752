use serde_json::{json, Value};

use mcp_protocol::Result;
use mcp_transport_traits::Transport;

use crate::client::core::Client;

impl<T: Transport + 'static> Client<T> {
    /// `tools/list`.
    pub async fn list_tools(&self) -> Result<Value> {
        self.call("tools/list", None).await
    }

    /// `tools/call`. `arguments` is the tool's input object, passed through unchanged.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<Value> {
        let params = json!({
            "name": name,
            "arguments": arguments.unwrap_or(Value::Object(Default::default())),
        });
        self.call("tools/call", Some(params)).await
    }
}
