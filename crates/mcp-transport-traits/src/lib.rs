//! The `Transport` contract shared by every wire implementation in this workspace
//! (framed stdio, HTTP+SSE) and consumed generically by `mcp-client`.
//!
//! This crate is deliberately thin: it names the lifecycle (`start`/`stop`) and the two
//! data-plane operations (`send`/`receive`) a transport must provide, and nothing else.
//! Capability negotiation, metrics, and transport discovery live above this layer, if at
//! all — the client only ever needs to move JSON-RPC frames across one concrete transport
//! it was constructed with.

pub mod transport;

pub use transport::Transport;
