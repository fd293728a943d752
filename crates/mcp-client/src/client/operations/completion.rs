use serde_json::{json, Value};

use mcp_protocol::Result;
use mcp_transport_traits::Transport;

use crate::client::core::Client;

impl<T: Transport + 'static> Client<T> {
    /// `completion/complete`: argument-completion suggestions for a prompt or resource
    /// template reference.
    pub async fn complete(&self, reference: Value, argument: Value) -> Result<Value> {
        let params = json!({ "ref": reference, "argument": argument });
        self.call("completion/complete", Some(params)).await
    }
}
