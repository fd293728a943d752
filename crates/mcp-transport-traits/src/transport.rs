use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use mcp_protocol::{Error, Result};
use serde_json::Value;

/// A bidirectional channel for JSON-RPC frames.
///
/// Implementations own their lifecycle: `start` brings the underlying pipes/client online,
/// `stop` tears them down, and both are idempotent — calling either twice has no additional
/// effect beyond the first call. `send`/`receive` operate on already-framed JSON values; this
/// trait has no opinion on envelope shape (request/response/notification), only on moving
/// bytes reliably in both directions.
///
/// Every method takes `&self` rather than `&mut self`: implementations serialize their own
/// internal mutable state (a mutex for stdio, a queue plus background task for HTTP+SSE) so
/// that a transport can be shared behind an `Arc` and driven concurrently by a sender and a
/// receive loop.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Bring the transport online: spawn the child process, or reset the HTTP client and
    /// (if configured) start the background SSE reader. Calling `start` on an already-started
    /// transport is a no-op.
    async fn start(&self) -> Result<()>;

    /// Tear the transport down: reap the child, or cancel in-flight HTTP requests and join
    /// the SSE reader. Idempotent; safe to call on a transport that never started.
    async fn stop(&self) -> Result<()>;

    /// Write one JSON-RPC frame. For stdio this frames and writes synchronously under a
    /// mutex; for HTTP this issues (and retries, per policy) a POST.
    async fn send(&self, message: Value) -> Result<()>;

    /// Read the next available JSON-RPC frame, blocking the caller until one arrives or the
    /// transport fails. Message order within one direction is preserved.
    async fn receive(&self) -> Result<Value>;

    /// Whether the transport believes it is currently usable for `send`/`receive`.
    async fn is_running(&self) -> bool;

    /// [`Transport::receive`], bounded by a deadline. The default implementation races
    /// `receive` against a `tokio::time::sleep`; transports with a more precise native
    /// timeout (e.g. one already threaded through a read syscall) may override this.
    async fn receive_with_timeout(&self, timeout: Duration) -> Result<Value> {
        match tokio::time::timeout(timeout, self.receive()).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(format!(
                "no message received within {timeout:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Default)]
    struct NeverReplies {
        running: AtomicBool,
    }

    #[async_trait]
    impl Transport for NeverReplies {
        async fn start(&self) -> Result<()> {
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.running.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, _message: Value) -> Result<()> {
            Ok(())
        }

        async fn receive(&self) -> Result<Value> {
            std::future::pending().await
        }

        async fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn receive_with_timeout_times_out() {
        let transport = NeverReplies::default();
        transport.start().await.unwrap();
        let err = transport
            .receive_with_timeout(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransportTimeout(_)));
    }

    #[tokio::test]
    async fn is_object_safe_behind_arc() {
        let transport: std::sync::Arc<dyn Transport> = std::sync::Arc::new(NeverReplies::default());
        transport.start().await.unwrap();
        assert!(transport.is_running().await);
        transport.stop().await.unwrap();
        assert!(!transport.is_running().await);
    }
}
