//! In-flight method calls and subscriptions
//!
//! Every outbound `method` and `sub` gets a unique ID registered here before
//! it is sent, so the matching `result`, `ready` or `nosub` finds the
//! caller's callback. Callbacks are removed as they fire, which makes each
//! one run at most once.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::Value;

use crate::locks::lock;
use crate::protocol::DdpError;

/// Outcome of a method call
pub type MethodResult = Result<Option<Value>, DdpError>;

pub(crate) type MethodCallback = Box<dyn FnOnce(MethodResult) + Send>;

/// Optional callbacks for a subscription
#[derive(Default)]
pub struct SubscriptionCallbacks {
    on_ready: Option<Box<dyn FnOnce() + Send>>,
    on_error: Option<Box<dyn FnOnce(DdpError) + Send>>,
}

impl SubscriptionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once when the server reports the subscription ready
    pub fn on_ready<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_ready = Some(Box::new(callback));
        self
    }

    /// Called once if the server refuses or stops the subscription with an error
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(DdpError) + Send + 'static,
    {
        self.on_error = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for SubscriptionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionCallbacks")
            .field("on_ready", &self.on_ready.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// A live subscription as known to the client
pub(crate) struct PendingSubscription {
    pub name: String,
    pub callbacks: SubscriptionCallbacks,
}

#[derive(Default)]
pub(crate) struct PendingCalls {
    next_method_id: AtomicU64,
    methods: Mutex<HashMap<String, MethodCallback>>,
    subscriptions: Mutex<HashMap<String, PendingSubscription>>,
}

impl PendingCalls {
    /// Allocate a method ID; IDs are never reused within a session
    pub fn next_method_id(&self) -> String {
        (self.next_method_id.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    pub fn register_method(&self, id: &str, callback: MethodCallback) {
        lock(&self.methods).insert(id.to_string(), callback);
    }

    /// Take the callback for a method result
    pub fn resolve_method(&self, id: &str) -> Option<MethodCallback> {
        lock(&self.methods).remove(id)
    }

    pub fn register_subscription(&self, id: &str, name: &str, callbacks: SubscriptionCallbacks) {
        lock(&self.subscriptions).insert(
            id.to_string(),
            PendingSubscription {
                name: name.to_string(),
                callbacks,
            },
        );
    }

    /// Name and ready callback of a subscription that just became ready
    ///
    /// The subscription stays registered so a later `nosub` still resolves.
    pub fn take_ready(&self, id: &str) -> Option<(String, Option<Box<dyn FnOnce() + Send>>)> {
        let mut subscriptions = lock(&self.subscriptions);
        let pending = subscriptions.get_mut(id)?;
        Some((pending.name.clone(), pending.callbacks.on_ready.take()))
    }

    /// Remove a subscription the server stopped
    pub fn take_nosub(&self, id: &str) -> Option<(String, Option<Box<dyn FnOnce(DdpError) + Send>>)> {
        let pending = lock(&self.subscriptions).remove(id)?;
        Some((pending.name, pending.callbacks.on_error))
    }

    /// Remove a subscription we stopped; returns its name
    pub fn remove_subscription(&self, id: &str) -> Option<String> {
        lock(&self.subscriptions).remove(id).map(|pending| pending.name)
    }

    #[cfg(test)]
    pub fn pending_methods(&self) -> usize {
        lock(&self.methods).len()
    }

    /// Drop everything in flight; returns how many callbacks were discarded
    pub fn clear(&self) -> usize {
        let methods = std::mem::take(&mut *lock(&self.methods));
        let subscriptions = std::mem::take(&mut *lock(&self.subscriptions));
        methods.len() + subscriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_method_ids_are_unique() {
        let calls = Arc::new(PendingCalls::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || (0..100).map(|_| calls.next_method_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(ids.insert(id));
            }
        }
        assert_eq!(ids.len(), 400);
    }

    #[test]
    fn test_method_callback_resolves_once() {
        let calls = PendingCalls::default();
        let id = calls.next_method_id();
        calls.register_method(&id, Box::new(|_| {}));

        assert_eq!(calls.pending_methods(), 1);
        assert!(calls.resolve_method(&id).is_some());
        assert!(calls.resolve_method(&id).is_none());
        assert!(calls.resolve_method("unknown").is_none());
    }

    #[test]
    fn test_subscription_ready_then_nosub() {
        let calls = PendingCalls::default();
        calls.register_subscription(
            "sub-1",
            "parties",
            SubscriptionCallbacks::new()
                .on_ready(|| {})
                .on_error(|_| {}),
        );

        let (name, on_ready) = calls.take_ready("sub-1").unwrap();
        assert_eq!(name, "parties");
        assert!(on_ready.is_some());

        // Ready callback is only handed out once
        let (_, on_ready) = calls.take_ready("sub-1").unwrap();
        assert!(on_ready.is_none());

        let (name, on_error) = calls.take_nosub("sub-1").unwrap();
        assert_eq!(name, "parties");
        assert!(on_error.is_some());
        assert!(calls.remove_subscription("sub-1").is_none());
    }

    #[test]
    fn test_clear_drops_everything() {
        let calls = PendingCalls::default();
        calls.register_method("1", Box::new(|_| {}));
        calls.register_subscription("sub-1", "parties", SubscriptionCallbacks::new());

        assert_eq!(calls.clear(), 2);
        assert!(calls.resolve_method("1").is_none());
        assert!(calls.remove_subscription("sub-1").is_none());
    }
}
