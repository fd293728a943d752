//! The pending-request table: correlates an outbound request id with a single-shot reply
//! channel, per §3 ("Pending request") and §9 ("Pending-request table with timer-driven
//! removal").
//!
//! Mutation is single-writer (the sending half inserts, the receive loop or a timeout
//! removes) but lookups race a timer firing concurrently with a response arriving; the
//! table itself is the arbiter of "whoever removes the entry first wins" — `HashMap::remove`
//! returning `Some` vs `None` is that decision, made atomic by the surrounding mutex.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use mcp_protocol::{Error, Result};

type Reply = oneshot::Sender<Result<serde_json::Value>>;

/// `id -> reply channel` for every outstanding request this client has sent and not yet
/// resolved.
#[derive(Default)]
pub(crate) struct PendingTable {
    inner: Mutex<HashMap<i64, Reply>>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a new pending request, returning the receiver half the caller awaits.
    pub(crate) fn insert(&self, id: i64) -> oneshot::Receiver<Result<serde_json::Value>> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().insert(id, tx);
        rx
    }

    /// Remove `id`'s entry, if still present, and complete it. Used by response delivery,
    /// timeout firing, and disconnect-driven draining alike; only the first of these to run
    /// for a given `id` has any effect — later callers observe `remove` return `None`.
    pub(crate) fn complete(&self, id: i64, result: Result<serde_json::Value>) {
        if let Some(tx) = self.inner.lock().remove(&id) {
            let _ = tx.send(result);
        }
    }

    /// Drop `id`'s entry without resolving it (the receiver is simply dropped, which the
    /// caller observes as a closed channel). Used when a send fails before any response can
    /// possibly arrive, and when a request-timeout fires.
    pub(crate) fn remove(&self, id: i64) {
        self.inner.lock().remove(&id);
    }

    /// Drain every pending entry, completing each with `err_for(id)`. Used by `disconnect`.
    pub(crate) fn drain(&self, err_for: impl Fn() -> Error) {
        let mut table = self.inner.lock();
        for (_, tx) in table.drain() {
            let _ = tx.send(Err(err_for()));
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
