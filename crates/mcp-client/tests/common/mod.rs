//! An in-memory [`Transport`] for driving the client against scripted frames without a real
//! process or socket.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;

use mcp_protocol::{Error, Result};
use mcp_transport_traits::Transport;

#[derive(Default)]
struct State {
    running: bool,
    inbound: VecDeque<Value>,
    outbound: Vec<Value>,
}

/// Cloning shares the underlying queues — the clone handed to the client and the handle kept
/// by the test both observe the same state.
#[derive(Clone, Default, Debug)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
    fail_send: Arc<AtomicBool>,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("running", &self.running)
            .field("inbound_len", &self.inbound.len())
            .field("outbound_len", &self.outbound.len())
            .finish()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inbound(&self, value: Value) {
        self.state.lock().inbound.push_back(value);
        self.notify.notify_waiters();
    }

    pub fn sent(&self) -> Vec<Value> {
        self.state.lock().outbound.clone()
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    /// Wait until at least `count` messages have been sent, and return them.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<Value> {
        loop {
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    /// Respond to the `idx`-th outbound message (0-based) with `result`, using its own id.
    pub async fn respond_success(&self, idx: usize, result: Value) {
        let sent = self.wait_for_sent(idx + 1).await;
        let id = sent[idx]["id"].clone();
        self.push_inbound(serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        }));
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn start(&self) -> Result<()> {
        self.state.lock().running = true;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.state.lock().running = false;
        Ok(())
    }

    async fn send(&self, message: Value) -> Result<()> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(Error::network("mock transport configured to fail sends"));
        }
        self.state.lock().outbound.push(message);
        Ok(())
    }

    async fn receive(&self) -> Result<Value> {
        loop {
            if let Some(value) = self.state.lock().inbound.pop_front() {
                return Ok(value);
            }
            self.notify.notified().await;
        }
    }

    async fn is_running(&self) -> bool {
        self.state.lock().running
    }
}
