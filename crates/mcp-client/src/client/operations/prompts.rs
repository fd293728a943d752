use serde_json::{json, Value};

use mcp_protocol::Result;
use mcp_transport_traits::Transport;

use crate::client::core::Client;

impl<T: Transport + 'static> Client<T> {
    /// `prompts/list`.
    pub async fn list_prompts(&self) -> Result<Value> {
        self.call("prompts/list", None).await
    }

    /// `prompts/get`. `arguments` fills the prompt template's declared variables.
    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> Result<Value> {
        let mut params = json!({ "name": name });
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        self.call("prompts/get", Some(params)).await
    }
}
