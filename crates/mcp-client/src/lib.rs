//! A bidirectional MCP client: request correlation over one [`mcp_transport_traits::Transport`],
//! a background receive loop demultiplexing responses/notifications/server-initiated requests,
//! and the operation catalog (tools, resources, prompts, completion) built on top of it.
//!
//! ```ignore
//! let transport = mcp_transport::StdioTransport::new(
//!     mcp_transport::StdioTransportConfig::new("my-mcp-server"),
//! )?;
//! let client = mcp_client::ClientBuilder::new(transport)
//!     .roots_handler(Arc::new(my_roots))
//!     .build();
//! client.connect().await?;
//! let tools = client.list_tools().await?;
//! ```

mod client;
mod config;
mod handlers;
mod notifications;
mod pending;

pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, ClientInfo, Root, ServerState};
pub use handlers::{
    DeclineElicitation, ElicitationHandler, ElicitationMode, ElicitationOutcome,
    ElicitationRequest, HandlerError, RootsHandler, SamplingHandler, SamplingRequest, StaticRoots,
};

pub use mcp_protocol::{Error, Result};
