//! The crate-wide error taxonomy.
//!
//! Surface kinds, not exhaustive wrapped types: every layer (transport, client) maps its
//! own failure modes onto this one enum so callers have a single `match` to write.

use thiserror::Error;

/// A result alias for this crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by any component in this workspace.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum Error {
    /// I/O or connectivity failure: pipe closed, connection refused, read EOF.
    #[error("transport network error: {0}")]
    TransportNetwork(String),

    /// A read/poll/request deadline was exceeded.
    #[error("transport timeout: {0}")]
    TransportTimeout(String),

    /// Framing violation, malformed JSON at a frame boundary, invalid `Content-Length`.
    #[error("transport protocol error: {0}")]
    TransportProtocol(String),

    /// A non-2xx HTTP response, with the status code and a body snippet.
    #[error("http status {status}: {body_snippet}")]
    HttpStatus { status: u16, body_snippet: String },

    /// A session-bearing request got a 404; internal, usually converted into a retry.
    #[error("session expired")]
    SessionExpired,

    /// The server returned a JSON-RPC `error` object, carried through unchanged.
    #[error("rpc error {code}: {message}")]
    RpcError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The caller attempted an operation outside the transport/client's valid lifecycle.
    #[error("not connected")]
    NotConnected,

    /// The caller attempted an operation that requires a completed `initialize` handshake.
    #[error("not initialized")]
    NotInitialized,

    /// The circuit breaker rejected the operation before it was sent.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The request was cancelled, by timeout, disconnect, or explicit cancellation.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Configuration was invalid: a bad URL, a missing required field, and similar.
    #[error("validation error: {0}")]
    Validation(String),
}

impl Error {
    #[must_use]
    pub fn network(msg: impl Into<String>) -> Self {
        Error::TransportNetwork(msg.into())
    }

    #[must_use]
    pub fn timeout(msg: impl Into<String>) -> Self {
        Error::TransportTimeout(msg.into())
    }

    #[must_use]
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::TransportProtocol(msg.into())
    }

    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    #[must_use]
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Error::Cancelled(msg.into())
    }

    #[must_use]
    pub fn rpc(code: i32, message: impl Into<String>) -> Self {
        Error::RpcError {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// As [`Self::rpc`], carrying the server's `error.data` payload through unchanged.
    #[must_use]
    pub fn rpc_with_data(
        code: i32,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Error::RpcError {
            code,
            message: message.into(),
            data,
        }
    }

    /// Whether this error should count as a circuit-breaker failure.
    ///
    /// RPC errors returned by the server are an ordinary failure mode of the call, not a
    /// transport-level failure, and must not trip the breaker. Everything else that
    /// reaches this type originates below the RPC layer and does trip it.
    #[must_use]
    pub fn trips_circuit_breaker(&self) -> bool {
        !matches!(self, Error::RpcError { .. } | Error::CircuitOpen)
    }
}
