//! Request identifiers.
//!
//! The JSON-RPC spec allows an id to be a string or a number; this client only ever
//! *generates* integer ids (see `mcp-client`'s request correlation), but must be able to
//! round-trip whatever shape a peer sends back.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A JSON-RPC request/response id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    /// Integer id. This is the only variant this crate ever constructs for outbound requests.
    Number(i64),
    /// String id, accepted from peers for spec compliance.
    String(String),
}

impl MessageId {
    /// The id as an integer, if it is (or can be losslessly read as) one.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MessageId::Number(n) => Some(*n),
            MessageId::String(s) => s.parse().ok(),
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Number(n) => write!(f, "{n}"),
            MessageId::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for MessageId {
    fn from(v: i64) -> Self {
        MessageId::Number(v)
    }
}

impl From<String> for MessageId {
    fn from(v: String) -> Self {
        MessageId::String(v)
    }
}

impl From<&str> for MessageId {
    fn from(v: &str) -> Self {
        MessageId::String(v.to_string())
    }
}
