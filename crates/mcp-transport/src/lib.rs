//! Wire transports for the MCP client: framed stdio (child process) and HTTP+SSE, plus the
//! leaf components both of them share — the SSE parser, the circuit breaker, the HTTP
//! session state machine, and the elicitation URL validator.
//!
//! This crate implements [`mcp_transport_traits::Transport`] twice (once per transport) and
//! exposes nothing else to `mcp-client`: callers construct a concrete transport, hand it to
//! the client behind the shared trait, and never touch the modules below directly except to
//! build a `*Config`.

pub mod circuit_breaker;
pub mod http;
pub mod session;
pub mod sse;
pub mod stdio;
pub mod url_validator;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use http::{HttpRetryConfig, HttpTransport, HttpTransportConfig};
pub use session::{SessionEvent, SessionManager, SessionManagerConfig, SessionState};
pub use sse::{SseEvent, SseParser, SseParserConfig};
pub use stdio::{Framing, StderrPolicy, StdioTransport, StdioTransportConfig};
pub use url_validator::{UrlValidationResult, UrlValidatorConfig, validate as validate_url};

pub use mcp_transport_traits::Transport;
