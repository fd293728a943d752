//! The `Client` struct: request correlation, connect/disconnect lifecycle, and the two
//! primitives (`call`, `notify`) every operation in `operations/` is built from.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use mcp_protocol::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcVersion};
use mcp_protocol::{Error, MessageId, Result};
use mcp_transport::CircuitBreaker;
use mcp_transport_traits::Transport;

use crate::config::{ClientConfig, ServerState};
use crate::handlers::{DeclineElicitation, ElicitationHandler, RootsHandler, SamplingHandler, StaticRoots};
use crate::notifications::NotificationRegistry;
use crate::pending::PendingTable;

/// Handler registrations, grouped so `Client` doesn't need one field per trait. Each slot is
/// read under its own lock and released before the handler is invoked (§5), so a handler may
/// re-register itself without deadlocking the dispatcher.
pub(crate) struct HandlerSlots {
    pub(crate) elicitation: RwLock<Arc<dyn ElicitationHandler>>,
    pub(crate) sampling: RwLock<Option<Arc<dyn SamplingHandler>>>,
    pub(crate) roots: RwLock<Arc<dyn RootsHandler>>,
}

pub(crate) struct ClientInner<T: Transport> {
    pub(crate) transport: Arc<T>,
    pub(crate) config: ClientConfig,
    pub(crate) breaker: Arc<CircuitBreaker>,
    pub(crate) pending: Arc<PendingTable>,
    pub(crate) next_id: AtomicI64,
    pub(crate) notifications: Arc<NotificationRegistry>,
    pub(crate) handlers: Arc<HandlerSlots>,
    pub(crate) server_state: RwLock<ServerState>,
    pub(crate) connected: AtomicBool,
    pub(crate) initialized: AtomicBool,
    pub(crate) shutdown: Arc<AtomicBool>,
    pub(crate) receive_task: AsyncMutex<Option<JoinHandle<()>>>,
}

/// A bidirectional endpoint on top of one [`Transport`]. Cheap to clone (an `Arc` around
/// shared state); every method takes `&self` so the client can be shared between the caller
/// and its own background receive-loop task.
pub struct Client<T: Transport> {
    pub(crate) inner: Arc<ClientInner<T>>,
}

impl<T: Transport> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connected", &self.inner.connected.load(Ordering::Relaxed))
            .field(
                "initialized",
                &self.inner.initialized.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl<T: Transport + 'static> Client<T> {
    pub(crate) fn new(transport: T, config: ClientConfig) -> Self {
        let roots = config.roots.clone();
        Self {
            inner: Arc::new(ClientInner {
                transport: Arc::new(transport),
                breaker: Arc::new(CircuitBreaker::new(Default::default())),
                pending: Arc::new(PendingTable::new()),
                next_id: AtomicI64::new(1),
                notifications: Arc::new(NotificationRegistry::new()),
                handlers: Arc::new(HandlerSlots {
                    elicitation: RwLock::new(Arc::new(DeclineElicitation)),
                    sampling: RwLock::new(None),
                    roots: RwLock::new(Arc::new(StaticRoots(roots))),
                }),
                server_state: RwLock::new(ServerState::default()),
                connected: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
                shutdown: Arc::new(AtomicBool::new(false)),
                receive_task: AsyncMutex::new(None),
                config,
            }),
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    #[must_use]
    pub fn server_state(&self) -> crate::config::ServerState {
        self.inner.server_state.read().clone()
    }

    pub fn set_elicitation_handler(&self, handler: Arc<dyn ElicitationHandler>) {
        *self.inner.handlers.elicitation.write() = handler;
    }

    pub fn set_sampling_handler(&self, handler: Arc<dyn SamplingHandler>) {
        *self.inner.handlers.sampling.write() = Some(handler);
    }

    pub fn set_roots_handler(&self, handler: Arc<dyn RootsHandler>) {
        *self.inner.handlers.roots.write() = handler;
    }

    /// Register a callback invoked for every inbound notification, before any per-method
    /// callback (§4.6).
    pub fn on_notification<F>(&self, callback: F)
    where
        F: Fn(&str, Option<&Value>) + Send + Sync + 'static,
    {
        self.inner.notifications.on_notification(callback);
    }

    /// Register a callback for `notifications/tools/list_changed`.
    pub fn on_tools_list_changed<F>(&self, callback: F)
    where
        F: Fn(Option<&Value>) + Send + Sync + 'static,
    {
        self.inner
            .notifications
            .on_method("notifications/tools/list_changed", callback);
    }

    /// Register a callback for `notifications/resources/list_changed`.
    pub fn on_resources_list_changed<F>(&self, callback: F)
    where
        F: Fn(Option<&Value>) + Send + Sync + 'static,
    {
        self.inner
            .notifications
            .on_method("notifications/resources/list_changed", callback);
    }

    /// Register a callback for `notifications/resources/updated`.
    pub fn on_resource_updated<F>(&self, callback: F)
    where
        F: Fn(Option<&Value>) + Send + Sync + 'static,
    {
        self.inner
            .notifications
            .on_method("notifications/resources/updated", callback);
    }

    /// Register a callback for `notifications/prompts/list_changed`.
    pub fn on_prompts_list_changed<F>(&self, callback: F)
    where
        F: Fn(Option<&Value>) + Send + Sync + 'static,
    {
        self.inner
            .notifications
            .on_method("notifications/prompts/list_changed", callback);
    }

    /// Register a callback for `notifications/message` (server log messages).
    pub fn on_log_message<F>(&self, callback: F)
    where
        F: Fn(Option<&Value>) + Send + Sync + 'static,
    {
        self.inner
            .notifications
            .on_method("notifications/message", callback);
    }

    /// Register a callback for `notifications/progress`.
    pub fn on_progress<F>(&self, callback: F)
    where
        F: Fn(Option<&Value>) + Send + Sync + 'static,
    {
        self.inner
            .notifications
            .on_method("notifications/progress", callback);
    }

    /// Bring the transport online, start the receive loop, and — unless
    /// [`ClientConfig::auto_initialize`] is `false` — perform the `initialize` handshake.
    ///
    /// # Errors
    /// On any failure the client is left (or rolled back to) disconnected with the transport
    /// stopped, per §7.
    pub async fn connect(&self) -> Result<()> {
        self.inner.transport.start().await?;
        self.inner.shutdown.store(false, Ordering::SeqCst);
        self.inner.connected.store(true, Ordering::SeqCst);

        let task = crate::client::dispatcher::spawn(self.inner.clone());
        *self.inner.receive_task.lock().await = Some(task);

        if self.inner.config.auto_initialize {
            if let Err(e) = self.initialize().await {
                warn!("auto-initialize failed, rolling back to disconnected: {e}");
                self.disconnect().await?;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Tear the client down: stop the receive loop, drain every pending call with a
    /// cancelled error, stop the transport. Always safe to call; idempotent (§7, §8).
    pub async fn disconnect(&self) -> Result<()> {
        if !self.inner.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.initialized.store(false, Ordering::SeqCst);

        if let Some(task) = self.inner.receive_task.lock().await.take() {
            task.abort();
        }
        self.inner
            .pending
            .drain(|| Error::cancelled("client disconnected"));
        *self.inner.server_state.write() = ServerState::default();

        self.inner.transport.stop().await
    }

    /// Send a request and await its correlated response, consulting the circuit breaker and
    /// respecting [`ClientConfig::request_timeout`]. Used by `initialize` itself, which must
    /// run before `initialized` is set.
    pub(crate) async fn call_raw(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if !self.inner.connected.load(Ordering::Relaxed) {
            return Err(Error::NotConnected);
        }
        let inner = &self.inner;
        inner
            .breaker
            .guard(|| async move { Self::send_and_await(inner, method, params).await })
            .await
    }

    /// [`Self::call_raw`], additionally requiring a completed `initialize` handshake.
    pub(crate) async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if !self.inner.initialized.load(Ordering::Relaxed) {
            return Err(Error::NotInitialized);
        }
        self.call_raw(method, params).await
    }

    async fn send_and_await(
        inner: &Arc<ClientInner<T>>,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value> {
        let id = inner.next_id.fetch_add(1, Ordering::SeqCst);
        let rx = inner.pending.insert(id);

        let request = JsonRpcRequest {
            jsonrpc: JsonRpcVersion,
            id: MessageId::Number(id),
            method: method.to_string(),
            params,
        };
        let value = serde_json::to_value(&request)
            .map_err(|e| Error::protocol(format!("failed to serialize request: {e}")))?;

        if let Err(e) = inner.transport.send(value).await {
            inner.pending.remove(id);
            return Err(e);
        }

        match inner.config.request_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(Error::cancelled("client disconnected")),
                Err(_) => {
                    inner.pending.remove(id);
                    Err(Error::timeout(format!(
                        "no response to `{method}` (id {id}) within {timeout:?}"
                    )))
                }
            },
            None => match rx.await {
                Ok(result) => result,
                Err(_) => Err(Error::cancelled("client disconnected")),
            },
        }
    }

    /// Send a notification (no response expected, no id assigned).
    pub(crate) async fn notify_raw(&self, method: &str, params: Option<Value>) -> Result<()> {
        if !self.inner.connected.load(Ordering::Relaxed) {
            return Err(Error::NotConnected);
        }
        let notification = JsonRpcNotification {
            jsonrpc: JsonRpcVersion,
            method: method.to_string(),
            params,
        };
        let value = serde_json::to_value(&notification)
            .map_err(|e| Error::protocol(format!("failed to serialize notification: {e}")))?;
        debug!(method, "sending notification");
        self.inner.transport.send(value).await
    }
}

impl<T: Transport> Drop for ClientInner<T> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}
