//! JSON-RPC 2.0 envelope types and the crate-wide error taxonomy shared by every layer
//! of this workspace (transport, client).
//!
//! This crate carries no transport or client logic; it is the wire vocabulary the other
//! crates speak. Operation params and results pass through as [`serde_json::Value`] — the
//! MCP schema itself is an external collaborator, not something this crate encodes.

pub mod error;
pub mod jsonrpc;
pub mod message_id;

pub use error::{Error, Result};
pub use jsonrpc::{
    JsonRpcError, JsonRpcErrorCode, JsonRpcMessage, JsonRpcMessageKind, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, JsonRpcResponsePayload, JsonRpcVersion,
};
pub use message_id::MessageId;
