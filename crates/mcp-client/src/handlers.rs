//! Server-initiated request handlers: elicitation, sampling, and filesystem roots.
//!
//! The MCP protocol is bidirectional — the server can issue requests back to the client,
//! asking it to obtain user input (elicitation), perform LLM generation (sampling), or list
//! the filesystem scopes it's allowed to reason about (roots). Each is a pluggable
//! `#[async_trait]` handler the host application registers on the [`crate::ClientBuilder`];
//! every handler has a safe default except sampling, for which there is none (§4.6).

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use mcp_protocol::jsonrpc::JsonRpcError;

use crate::config::Root;

/// Errors a handler may report back to the dispatcher, mapped onto a JSON-RPC error object
/// before being sent to the server. Modeled on the MCP-specific codes the teacher's
/// `handlers.rs` defines (`-32800`/`-32801` are this crate's reserved application range, not
/// standard JSON-RPC).
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum HandlerError {
    #[error("user cancelled the request")]
    Cancelled,

    #[error("handler timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("handler error: {0}")]
    Internal(String),
}

impl HandlerError {
    #[must_use]
    pub fn into_jsonrpc_error(self) -> JsonRpcError {
        match self {
            HandlerError::Cancelled => JsonRpcError::new(-32800, "request cancelled by user"),
            HandlerError::Timeout(d) => {
                JsonRpcError::new(-32801, format!("handler timed out after {d:?}"))
            }
            HandlerError::InvalidInput(details) => {
                JsonRpcError::new(-32602, format!("invalid input: {details}"))
            }
            HandlerError::Internal(message) => {
                JsonRpcError::new(-32603, format!("handler error: {message}"))
            }
        }
    }
}

/// How the server is asking the client to elicit information from its user.
#[derive(Debug, Clone)]
pub enum ElicitationMode {
    /// The server supplied a JSON schema describing the fields it wants filled in.
    Form { schema: Value },
    /// The server wants the user directed to a URL (e.g. an OAuth consent page). Validated
    /// by [`mcp_transport::url_validator`] before this handler ever sees it (§4.7).
    Url { url: String },
}

/// A parsed `elicitation/create` request.
#[derive(Debug, Clone)]
pub struct ElicitationRequest {
    pub message: String,
    pub mode: ElicitationMode,
}

/// The user's answer to an elicitation request.
#[derive(Debug, Clone)]
pub enum ElicitationOutcome {
    /// The user supplied data conforming to the requested schema/URL flow.
    Accept(Value),
    /// The user was asked and declined.
    Decline,
    /// The elicitation was dismissed without an explicit answer.
    Cancel,
}

impl ElicitationOutcome {
    pub(crate) fn into_result_value(self) -> Value {
        match self {
            ElicitationOutcome::Accept(content) => {
                serde_json::json!({ "action": "accept", "content": content })
            }
            ElicitationOutcome::Decline => serde_json::json!({ "action": "decline" }),
            ElicitationOutcome::Cancel => serde_json::json!({ "action": "cancel" }),
        }
    }
}

/// Handles `elicitation/create`. The default ([`DeclineElicitation`]) always declines —
/// a safe default per §4.6, since silently fabricating user input would be worse than
/// refusing.
#[async_trait]
pub trait ElicitationHandler: Send + Sync + std::fmt::Debug {
    async fn handle_elicitation(
        &self,
        request: ElicitationRequest,
    ) -> Result<ElicitationOutcome, HandlerError>;
}

#[derive(Debug, Default)]
pub struct DeclineElicitation;

#[async_trait]
impl ElicitationHandler for DeclineElicitation {
    async fn handle_elicitation(
        &self,
        _request: ElicitationRequest,
    ) -> Result<ElicitationOutcome, HandlerError> {
        Ok(ElicitationOutcome::Decline)
    }
}

/// A `sampling/createMessage` request, passed through opaquely — the MCP sampling schema
/// (messages, model preferences, system prompt, stop sequences, …) is an external
/// collaborator this crate does not re-type (§1 non-goals).
#[derive(Debug, Clone)]
pub struct SamplingRequest {
    pub messages: Value,
    pub params: Value,
}

/// Handles `sampling/createMessage` by performing (or delegating) LLM generation on the
/// host's behalf. There is deliberately no default implementation — a default would have to
/// either silently fabricate a model response or silently spend the host's money, and
/// neither is a safe default (§4.6: "there is no safe default for LLM sampling").
#[async_trait]
pub trait SamplingHandler: Send + Sync + std::fmt::Debug {
    async fn handle_sampling(&self, request: SamplingRequest) -> Result<Value, HandlerError>;
}

/// Handles `roots/list`. The default returns the static list from [`crate::ClientConfig`].
#[async_trait]
pub trait RootsHandler: Send + Sync + std::fmt::Debug {
    async fn list_roots(&self) -> Vec<Root>;
}

#[derive(Debug)]
pub struct StaticRoots(pub Vec<Root>);

#[async_trait]
impl RootsHandler for StaticRoots {
    async fn list_roots(&self) -> Vec<Root> {
        self.0.clone()
    }
}
