//! Notification dispatch: the generic callback fires for every inbound notification, then
//! the per-method callback for one of the recognized set (§4.6). Handlers are invoked with
//! exception isolation — a panicking callback is caught and logged, never kills the receive
//! loop (§7, §9).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error};

/// Method names the client recognizes for per-method dispatch, beyond the generic callback.
pub const RECOGNIZED_METHODS: &[&str] = &[
    "notifications/tools/list_changed",
    "notifications/resources/list_changed",
    "notifications/resources/updated",
    "notifications/prompts/list_changed",
    "notifications/message",
    "notifications/progress",
];

type Generic = Arc<dyn Fn(&str, Option<&Value>) + Send + Sync>;
type PerMethod = Arc<dyn Fn(Option<&Value>) + Send + Sync>;

#[derive(Default)]
pub(crate) struct NotificationRegistry {
    generic: Mutex<Vec<Generic>>,
    per_method: Mutex<Vec<(&'static str, PerMethod)>>,
}

impl NotificationRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_notification<F>(&self, callback: F)
    where
        F: Fn(&str, Option<&Value>) + Send + Sync + 'static,
    {
        self.generic.lock().push(Arc::new(callback));
    }

    pub(crate) fn on_method<F>(&self, method: &'static str, callback: F)
    where
        F: Fn(Option<&Value>) + Send + Sync + 'static,
    {
        self.per_method.lock().push((method, Arc::new(callback)));
    }

    /// Dispatch one notification: every generic callback, then every per-method callback
    /// registered against `method`. Each invocation is isolated with `catch_unwind` so one
    /// panicking callback cannot prevent the rest from running or poison the receive loop.
    pub(crate) fn dispatch(&self, method: &str, params: Option<&Value>) {
        let generic: Vec<Generic> = self.generic.lock().clone();
        for callback in generic {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback(method, params)));
            if result.is_err() {
                error!(method, "generic notification callback panicked");
            }
        }

        let per_method: Vec<PerMethod> = self
            .per_method
            .lock()
            .iter()
            .filter(|(m, _)| *m == method)
            .map(|(_, cb)| cb.clone())
            .collect();
        if per_method.is_empty() {
            if RECOGNIZED_METHODS.contains(&method) {
                debug!(method, "recognized notification has no per-method handler registered");
            }
            return;
        }
        for callback in per_method {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback(params)));
            if result.is_err() {
                error!(method, "per-method notification callback panicked");
            }
        }
    }
}
