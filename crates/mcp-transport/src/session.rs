//! HTTP session state machine: owns the server-issued session id, the last SSE event id
//! seen (for `Last-Event-ID` resumption), and the connection lifecycle between them.
//!
//! The precise syntactic rules for a `Session-Id` are not wire-standardized by MCP; this
//! enforces a conservative non-empty/printable/length-bounded rule and rejects anything
//! else without tearing down an otherwise-healthy session.

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Connection lifecycle of the HTTP transport's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Active,
    Reconnecting,
    Closing,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Disconnected
    }
}

/// An event a [`SessionManager`] subscriber may want to react to.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        old: SessionState,
        new: SessionState,
    },
    SessionEstablished(String),
    SessionLost,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionManagerConfig {
    /// Upper bound on an accepted `Session-Id`'s length.
    pub max_session_id_len: usize,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            max_session_id_len: 256,
        }
    }
}

struct Inner {
    state: SessionState,
    session_id: Option<String>,
    last_event_id: Option<String>,
}

type Callback = dyn Fn(SessionEvent) + Send + Sync;

/// Owns the session id / last-event-id / connection state triple for one HTTP transport.
pub struct SessionManager {
    config: SessionManagerConfig,
    inner: Mutex<Inner>,
    callbacks: Mutex<Vec<Box<Callback>>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SessionManager")
            .field("state", &inner.state)
            .field("session_id", &inner.session_id)
            .field("last_event_id", &inner.last_event_id)
            .finish()
    }
}

impl SessionManager {
    #[must_use]
    pub fn new(config: SessionManagerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: SessionState::Disconnected,
                session_id: None,
                last_event_id: None,
            }),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn on_event<F>(&self, callback: F)
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        self.callbacks.lock().push(Box::new(callback));
    }

    fn fire(&self, event: SessionEvent) {
        for cb in self.callbacks.lock().iter() {
            cb(event.clone());
        }
    }

    fn transition(&self, inner: &mut Inner, new: SessionState) {
        let old = inner.state;
        if old == new {
            return;
        }
        inner.state = new;
        debug!(?old, ?new, "session state transition");
        self.fire(SessionEvent::StateChanged { old, new });
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.inner.lock().session_id.clone()
    }

    #[must_use]
    pub fn last_event_id(&self) -> Option<String> {
        self.inner.lock().last_event_id.clone()
    }

    /// `Disconnected|Reconnecting -> Connecting`. Returns whether the transition happened.
    pub fn begin_connect(&self) -> bool {
        let mut inner = self.inner.lock();
        if matches!(
            inner.state,
            SessionState::Disconnected | SessionState::Reconnecting
        ) {
            self.transition(&mut inner, SessionState::Connecting);
            true
        } else {
            false
        }
    }

    /// `Connecting|Reconnecting -> Active`, storing `sid` iff it passes [`is_valid_session_id`].
    /// An invalid id is rejected (logged redacted) without changing state.
    pub fn connection_established(&self, sid: &str) -> bool {
        if !self.is_valid_session_id(sid) {
            warn!(sid_preview = %redact(sid), "rejected invalid session id");
            return false;
        }
        let mut inner = self.inner.lock();
        if matches!(
            inner.state,
            SessionState::Connecting | SessionState::Reconnecting
        ) {
            inner.session_id = Some(sid.to_string());
            self.transition(&mut inner, SessionState::Active);
            drop(inner);
            self.fire(SessionEvent::SessionEstablished(sid.to_string()));
            true
        } else {
            false
        }
    }

    /// `Connecting|Reconnecting -> Disconnected`.
    pub fn connection_failed(&self, reason: &str) -> bool {
        let mut inner = self.inner.lock();
        if matches!(
            inner.state,
            SessionState::Connecting | SessionState::Reconnecting
        ) {
            debug!(reason, "connection attempt failed");
            self.transition(&mut inner, SessionState::Disconnected);
            true
        } else {
            false
        }
    }

    /// `Active -> Reconnecting`, clearing the stored session id.
    pub fn session_expired(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Active {
            inner.session_id = None;
            self.transition(&mut inner, SessionState::Reconnecting);
            drop(inner);
            self.fire(SessionEvent::SessionLost);
            true
        } else {
            false
        }
    }

    pub fn record_event_id(&self, eid: impl Into<String>) {
        self.inner.lock().last_event_id = Some(eid.into());
    }

    pub fn clear_last_event_id(&self) {
        self.inner.lock().last_event_id = None;
    }

    pub fn begin_close(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, SessionState::Closing);
    }

    pub fn close_complete(&self) {
        let mut inner = self.inner.lock();
        inner.session_id = None;
        inner.last_event_id = None;
        self.transition(&mut inner, SessionState::Disconnected);
    }

    fn is_valid_session_id(&self, sid: &str) -> bool {
        !sid.is_empty()
            && sid.len() <= self.config.max_session_id_len
            && sid.chars().all(|c| !c.is_control())
    }
}

fn redact(sid: &str) -> String {
    let preview: String = sid.chars().take(8).collect();
    format!("{preview}…({} bytes)", sid.len())
}
