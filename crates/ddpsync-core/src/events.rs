//! Session event fan-out
//!
//! Observers register per [`EventKind`] and are called synchronously, in the
//! context of whatever triggered the event. Async consumers can take a
//! channel with [`EventDispatcher::listen`] instead.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::locks::{lock, read, write};
use crate::state::SessionState;

/// What happened to a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Changed,
    Removed,
    Ready,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Added => "added",
            ChangeType::Changed => "changed",
            ChangeType::Removed => "removed",
            ChangeType::Ready => "ready",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by the session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Session state changed; identity is included as of the change
    ConnectionStateChanged {
        state: SessionState,
        user_id: Option<String>,
        resume_token: Option<String>,
    },
    /// Server or login error
    Error { message: String },
    /// A collection fed by a subscription changed, or a subscription became ready
    ///
    /// For data changes `subscription` carries the collection name.
    SubscriptionChanged {
        subscription: String,
        change: ChangeType,
        doc_id: Option<String>,
    },
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::ConnectionStateChanged { .. } => EventKind::ConnectionStateChanged,
            SessionEvent::Error { .. } => EventKind::Error,
            SessionEvent::SubscriptionChanged { .. } => EventKind::SubscriptionChanged,
        }
    }
}

/// Event kinds observers can register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectionStateChanged,
    Error,
    SubscriptionChanged,
}

/// Callback invoked for each dispatched event of its kind
pub type Observer = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Handle returned by [`EventDispatcher::on`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Publish/subscribe fan-out of session events
#[derive(Default)]
pub struct EventDispatcher {
    next_id: AtomicU64,
    observers: RwLock<Vec<(ObserverId, EventKind, Observer)>>,
    channels: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("observers", &read(&self.observers).len())
            .field("channels", &lock(&self.channels).len())
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer for one kind of event
    pub fn on<F>(&self, kind: EventKind, observer: F) -> ObserverId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        write(&self.observers).push((id, kind, Arc::new(observer)));
        id
    }

    /// Unregister an observer
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut observers = write(&self.observers);
        let before = observers.len();
        observers.retain(|(existing, _, _)| *existing != id);
        observers.len() != before
    }

    /// Receive every event on a channel
    ///
    /// The channel is dropped from the fan-out once its receiver goes away.
    pub fn listen(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.channels).push(tx);
        rx
    }

    /// Deliver an event to every observer currently registered for its kind
    ///
    /// Observers are called outside the registry lock, so they may register,
    /// remove, or trigger further events.
    pub fn dispatch(&self, event: SessionEvent) {
        let kind = event.kind();
        let targets: Vec<Observer> = read(&self.observers)
            .iter()
            .filter(|(_, registered, _)| *registered == kind)
            .map(|(_, _, observer)| Arc::clone(observer))
            .collect();

        for observer in targets {
            observer(&event);
        }

        lock(&self.channels).retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of registered observers of a kind
    #[cfg(test)]
    pub fn observer_count(&self, kind: EventKind) -> usize {
        read(&self.observers)
            .iter()
            .filter(|(_, registered, _)| *registered == kind)
            .count()
    }
}
