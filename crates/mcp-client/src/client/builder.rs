//! Fluent construction of a [`Client`] before it's ever connected.

use std::sync::Arc;
use std::time::Duration;

use mcp_transport_traits::Transport;

use crate::client::core::Client;
use crate::config::{ClientConfig, ClientInfo, Root};
use crate::handlers::{ElicitationHandler, RootsHandler, SamplingHandler};

/// Builds a [`Client`] around one transport, registering handlers and config before the
/// first `connect()`. Handlers may also be changed later via `Client::set_*_handler`.
pub struct ClientBuilder<T: Transport> {
    transport: T,
    config: ClientConfig,
    elicitation: Option<Arc<dyn ElicitationHandler>>,
    sampling: Option<Arc<dyn SamplingHandler>>,
    roots: Option<Arc<dyn RootsHandler>>,
}

impl<T: Transport + 'static> ClientBuilder<T> {
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            config: ClientConfig::default(),
            elicitation: None,
            sampling: None,
            roots: None,
        }
    }

    #[must_use]
    pub fn client_info(mut self, info: ClientInfo) -> Self {
        self.config.client_info = info;
        self
    }

    #[must_use]
    pub fn protocol_version(mut self, version: impl Into<String>) -> Self {
        self.config.protocol_version = version.into();
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.config.handler_timeout = timeout;
        self
    }

    #[must_use]
    pub fn auto_initialize(mut self, auto: bool) -> Self {
        self.config.auto_initialize = auto;
        self
    }

    #[must_use]
    pub fn roots(mut self, roots: Vec<Root>) -> Self {
        self.config.roots = roots;
        self
    }

    #[must_use]
    pub fn url_validator(mut self, config: mcp_transport::url_validator::UrlValidatorConfig) -> Self {
        self.config.url_validator = config;
        self
    }

    #[must_use]
    pub fn elicitation_handler(mut self, handler: Arc<dyn ElicitationHandler>) -> Self {
        self.elicitation = Some(handler);
        self
    }

    #[must_use]
    pub fn sampling_handler(mut self, handler: Arc<dyn SamplingHandler>) -> Self {
        self.sampling = Some(handler);
        self
    }

    #[must_use]
    pub fn roots_handler(mut self, handler: Arc<dyn RootsHandler>) -> Self {
        self.roots = Some(handler);
        self
    }

    /// Build the client. Does not connect — call [`Client::connect`] next.
    #[must_use]
    pub fn build(self) -> Client<T> {
        let client = Client::new(self.transport, self.config);
        if let Some(h) = self.elicitation {
            client.set_elicitation_handler(h);
        }
        if let Some(h) = self.sampling {
            client.set_sampling_handler(h);
        }
        if let Some(h) = self.roots {
            client.set_roots_handler(h);
        }
        client
    }
}
