//! Observer registry for unsolicited events.

use crate::document::EventDocument;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, trace};

/// Receives event documents for names it was registered under.
///
/// Listeners run synchronously on the connection's reader task, in
/// registration order. Keep them fast — a slow listener delays every
/// later listener and the protocol stream itself. Closures implement
/// this trait automatically.
pub trait EventListener: Send + Sync {
    /// Called once per matching event occurrence.
    fn on_event(&self, name: &str, document: &EventDocument);
}

impl<F> EventListener for F
where
    F: Fn(&str, &EventDocument) + Send + Sync,
{
    fn on_event(&self, name: &str, document: &EventDocument) {
        self(name, document)
    }
}

/// Maps event names to ordered listener lists.
///
/// Names match exactly — there is no wildcard fallback. To observe
/// everything, subscribe to `ALL` on the switch and register for each
/// name of interest (or register one listener under every name it cares
/// about).
#[derive(Default)]
pub struct EventRegistry {
    listeners: RwLock<HashMap<String, Vec<Arc<dyn EventListener>>>>,
}

impl EventRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for an exact event name.
    ///
    /// Listeners for the same name are invoked in registration order.
    pub fn register(&self, event_name: impl Into<String>, listener: Arc<dyn EventListener>) {
        let name = event_name.into();
        debug!("Registering listener for event {}", name);
        let mut map = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        map.entry(name).or_default().push(listener);
    }

    /// Dispatch a document to every listener registered for `name`.
    ///
    /// Returns the number of listeners notified. The listener list is
    /// snapshotted before invocation so callbacks may re-enter the
    /// registry (e.g. register further listeners) without deadlocking.
    pub fn dispatch(&self, name: &str, document: &EventDocument) -> usize {
        let snapshot: Vec<Arc<dyn EventListener>> = {
            let map = self.listeners.read().unwrap_or_else(|e| e.into_inner());
            match map.get(name) {
                Some(list) => list.clone(),
                None => {
                    trace!("No listeners for event {}", name);
                    return 0;
                }
            }
        };

        for listener in &snapshot {
            listener.on_event(name, document);
        }
        snapshot.len()
    }

    /// Number of listeners registered for `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        let map = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        map.get(name).map(|l| l.len()).unwrap_or(0)
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let map = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("EventRegistry")
            .field("event_names", &map.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn doc_named(name: &str) -> EventDocument {
        let mut doc = EventDocument::new();
        doc.set_header("Event-Name", name);
        doc
    }

    #[test]
    fn dispatches_to_exact_name_only() {
        let registry = EventRegistry::new();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let h = hits.clone();
        registry.register(
            "DTMF",
            Arc::new(move |name: &str, _doc: &EventDocument| {
                h.lock().unwrap().push(name.to_string());
            }),
        );

        assert_eq!(registry.dispatch("DTMF", &doc_named("DTMF")), 1);
        assert_eq!(registry.dispatch("HEARTBEAT", &doc_named("HEARTBEAT")), 0);
        assert_eq!(*hits.lock().unwrap(), vec!["DTMF".to_string()]);
    }

    #[test]
    fn registration_order_is_dispatch_order() {
        let registry = EventRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let o = order.clone();
            registry.register(
                "DETECTED_SPEECH",
                Arc::new(move |_: &str, _: &EventDocument| {
                    o.lock().unwrap().push(tag);
                }),
            );
        }

        let notified = registry.dispatch("DETECTED_SPEECH", &doc_named("DETECTED_SPEECH"));
        assert_eq!(notified, 3);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn listener_may_reenter_registry() {
        let registry = Arc::new(EventRegistry::new());
        let r = registry.clone();
        registry.register(
            "CHANNEL_ANSWER",
            Arc::new(move |_: &str, _: &EventDocument| {
                r.register("CHANNEL_HANGUP", Arc::new(|_: &str, _: &EventDocument| {}));
            }),
        );

        registry.dispatch("CHANNEL_ANSWER", &doc_named("CHANNEL_ANSWER"));
        assert_eq!(registry.listener_count("CHANNEL_HANGUP"), 1);
    }

    #[test]
    fn document_reaches_listener() {
        let registry = EventRegistry::new();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        registry.register(
            "BACKGROUND_JOB",
            Arc::new(move |_: &str, doc: &EventDocument| {
                *s.lock().unwrap() = doc.job_uuid().map(|j| j.to_string());
            }),
        );

        let mut doc = doc_named("BACKGROUND_JOB");
        doc.set_header("Job-UUID", "job-7");
        registry.dispatch("BACKGROUND_JOB", &doc);
        assert_eq!(seen.lock().unwrap().as_deref(), Some("job-7"));
    }
}
