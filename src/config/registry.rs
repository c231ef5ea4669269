//! Process-wide live configuration.
//!
//! Values are plain JSON so any subsystem can publish settings without the
//! registry knowing their types. Subscribers run synchronously inside `set`.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

type OnChange = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct Inner {
    values: HashMap<String, Value>,
    subscribers: HashMap<String, Vec<(u64, OnChange)>>,
    next_id: u64,
}

/// Handle returned by [`ConfigRegistry::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

#[derive(Clone, Default)]
pub struct ConfigRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.values.get(key).cloned()
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.as_u64())
    }

    /// Stores `value` and notifies every subscriber of `key`.
    pub fn set(&self, key: &str, value: Value) {
        let callbacks: Vec<OnChange> = {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            inner.values.insert(key.to_owned(), value.clone());
            inner
                .subscribers
                .get(key)
                .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default()
        };

        debug!(key, subscribers = callbacks.len(), "config value updated");
        // Outside the lock so callbacks may read the registry.
        for callback in callbacks {
            callback(&value);
        }
    }

    pub fn subscribe<F>(&self, key: &str, on_change: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .subscribers
            .entry(key.to_owned())
            .or_default()
            .push((id, Arc::new(on_change)));
        Subscription(id)
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        for subs in inner.subscribers.values_mut() {
            subs.retain(|(id, _)| *id != subscription.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn subscribers_see_new_values() {
        let registry = ConfigRegistry::new();
        let seen = Arc::new(AtomicU64::new(0));

        let sink = seen.clone();
        registry.subscribe("ws.timeout_ms", move |v| {
            sink.store(v.as_u64().unwrap_or(0), Ordering::SeqCst);
        });

        registry.set("ws.timeout_ms", json!(1500));
        assert_eq!(seen.load(Ordering::SeqCst), 1500);
        assert_eq!(registry.get_u64("ws.timeout_ms"), Some(1500));
    }

    #[test]
    fn other_keys_do_not_notify() {
        let registry = ConfigRegistry::new();
        let calls = Arc::new(AtomicU64::new(0));

        let sink = calls.clone();
        registry.subscribe("a", move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        registry.set("b", json!(true));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribed_callback_is_not_invoked() {
        let registry = ConfigRegistry::new();
        let calls = Arc::new(AtomicU64::new(0));

        let sink = calls.clone();
        let sub = registry.subscribe("a", move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        registry.unsubscribe(sub);
        registry.set("a", json!(1));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
