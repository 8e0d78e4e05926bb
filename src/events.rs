//! Host event bus.
//!
//! Replaces the app-shell event emitter the extensions API used to lean on:
//! extensions subscribe to named event types, the host (or another
//! extension, via `api.events().emit`) publishes payloads. Subscriber
//! callbacks are synchronous, may fail, and failures are logged at the
//! call site — an extension's broken listener never escapes into host
//! control flow.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::api::Disposable;

pub type EventCallback = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

struct Subscription {
    id: u64,
    owner: String,
    callback: EventCallback,
}

/// Shared, host-owned subscription table keyed by event type.
#[derive(Default)]
pub struct EventBus {
    subscriptions: DashMap<String, Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `owner` to `event_type`. The returned handle removes
    /// exactly this subscription; disposal is idempotent.
    pub fn subscribe(
        self: &Arc<Self>,
        owner: &str,
        event_type: &str,
        callback: EventCallback,
    ) -> Disposable {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscriptions
            .entry(event_type.to_string())
            .or_default()
            .push(Subscription { id, owner: owner.to_string(), callback });

        let bus = Arc::clone(self);
        let event_type = event_type.to_string();
        Disposable::new(move || {
            if let Some(mut subs) = bus.subscriptions.get_mut(&event_type) {
                subs.retain(|s| s.id != id);
            }
        })
    }

    /// Publish an event to every subscriber. Callback failures are logged
    /// and do not stop delivery to the remaining subscribers.
    pub fn emit(&self, event_type: &str, payload: &Value) {
        let callbacks: Vec<(String, EventCallback)> = match self.subscriptions.get(event_type) {
            Some(subs) => subs
                .iter()
                .map(|s| (s.owner.clone(), Arc::clone(&s.callback)))
                .collect(),
            None => return,
        };

        for (owner, callback) in callbacks {
            if let Err(e) = callback(payload) {
                tracing::warn!("[events] \"{owner}\" listener for \"{event_type}\" failed: {e}");
            }
        }
    }

    /// Drop every subscription owned by a deactivating extension.
    pub fn remove_owned_by(&self, owner: &str) {
        for mut entry in self.subscriptions.iter_mut() {
            entry.value_mut().retain(|s| s.owner != owner);
        }
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self, event_type: &str) -> usize {
        self.subscriptions.get(event_type).map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use serde_json::json;

    #[test]
    fn emit_reaches_subscribers() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let _sub = bus.subscribe("wf", "file.saved", Arc::new(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        bus.emit("file.saved", &json!({ "path": "a.txt" }));
        bus.emit("file.saved", &json!({ "path": "b.txt" }));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dispose_removes_exactly_one_subscription() {
        let bus = Arc::new(EventBus::new());
        let sub_a = bus.subscribe("wf", "tick", Arc::new(|_| Ok(())));
        let _sub_b = bus.subscribe("wf", "tick", Arc::new(|_| Ok(())));
        assert_eq!(bus.subscriber_count("tick"), 2);

        sub_a.dispose();
        sub_a.dispose(); // idempotent
        assert_eq!(bus.subscriber_count("tick"), 1);
    }

    #[test]
    fn failing_listener_does_not_stop_delivery() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let _bad = bus.subscribe("a", "tick", Arc::new(|_| anyhow::bail!("boom")));
        let h = Arc::clone(&hits);
        let _good = bus.subscribe("b", "tick", Arc::new(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        bus.emit("tick", &Value::Null);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_owned_by_drops_only_that_owner() {
        let bus = Arc::new(EventBus::new());
        let _a = bus.subscribe("wf", "tick", Arc::new(|_| Ok(())));
        let _b = bus.subscribe("other", "tick", Arc::new(|_| Ok(())));

        bus.remove_owned_by("wf");
        assert_eq!(bus.subscriber_count("tick"), 1);
    }
}
