//! Subscription readiness tracking

use std::collections::HashMap;
use std::sync::Mutex;

use crate::locks::lock;

/// Ready flag per subscription name
///
/// A name is registered as not ready when subscribed and flips to ready when
/// the server confirms the initial data set. Subscribing again under the same
/// name resets it. Entries stay until explicitly removed.
#[derive(Debug, Default)]
pub struct SubscriptionTracker {
    ready: Mutex<HashMap<String, bool>>,
}

impl SubscriptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) a subscription as not ready
    pub fn subscribe(&self, name: &str) {
        lock(&self.ready).insert(name.to_string(), false);
    }

    /// Mark a subscription ready
    ///
    /// Returns `false` if the name was never registered.
    pub fn mark_ready(&self, name: &str) -> bool {
        match lock(&self.ready).get_mut(name) {
            Some(ready) => {
                *ready = true;
                true
            }
            None => false,
        }
    }

    /// Whether a subscription has been confirmed
    pub fn is_ready(&self, name: &str) -> Option<bool> {
        lock(&self.ready).get(name).copied()
    }

    /// True when no registered subscription is waiting; true when empty
    pub fn all_ready(&self) -> bool {
        lock(&self.ready).values().all(|ready| *ready)
    }

    /// Forget a subscription
    pub fn remove(&self, name: &str) -> bool {
        lock(&self.ready).remove(name).is_some()
    }

    /// Names of all registered subscriptions
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.ready).keys().cloned().collect();
        names.sort();
        names
    }
}
