//! Inbound event routing
//!
//! Every transport gets its own router, tagged with the transport's
//! generation. Events from a transport the session has already replaced are
//! dropped; everything else is matched by message type and handed to the
//! document store, the subscription tracker, the state machine, or the
//! callback registered for a call.

use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use crate::events::{ChangeType, SessionEvent};
use crate::protocol::{ClientMessage, ProtocolEvent};
use crate::session::{Inner, Session};
use crate::transport::{ConnectionState, InboundSink, TransportEvent};

/// Routes decoded events of one transport into its session
pub struct ProtocolEventRouter {
    session: Weak<Inner>,
    generation: u64,
}

impl ProtocolEventRouter {
    pub(crate) fn new(session: Weak<Inner>, generation: u64) -> Self {
        Self {
            session,
            generation,
        }
    }

    /// Wrap the router as the sink handed to a transport
    pub(crate) fn into_sink(self) -> InboundSink {
        Arc::new(move |event| self.on_transport_event(event))
    }

    /// Entry point for everything a transport reports
    pub fn on_transport_event(&self, event: TransportEvent) {
        let Some(inner) = self.session.upgrade() else {
            return;
        };
        if inner.machine.generation() != self.generation {
            debug!(
                "Dropping event from superseded transport (generation {})",
                self.generation
            );
            return;
        }

        match event {
            TransportEvent::Message(event) => on_protocol_event(&inner, event),
            TransportEvent::StateChanged(state) => on_connection_state(&inner, state),
        }
    }
}

fn on_connection_state(inner: &Arc<Inner>, state: ConnectionState) {
    debug!("Transport state {:?}", state);
    if state == ConnectionState::Closed {
        let dropped = inner.calls.clear();
        if dropped > 0 {
            debug!("Dropped {} in-flight calls on close", dropped);
        }
        inner.machine.on_transport_closed();
    }
}

/// Route one decoded inbound message
fn on_protocol_event(inner: &Arc<Inner>, event: ProtocolEvent) {
    match event {
        ProtocolEvent::Error { reason, .. } => {
            let message = reason.unwrap_or_else(|| "unknown error".to_string());
            inner.machine.dispatch_error(message);
        }
        ProtocolEvent::Failed { version } => {
            warn!("Server rejected protocol version, proposed {}", version);
            inner
                .machine
                .dispatch_error(format!("Server requires protocol version {}", version));
        }
        ProtocolEvent::Connected { session } => {
            inner.machine.on_connected(session);
            let policy = inner.policy();
            policy.on_connected(&Session::from_inner(Arc::clone(inner)));
        }
        ProtocolEvent::Added {
            collection,
            id,
            fields,
        } => {
            inner.store.add(&collection, &id, fields);
            subscription_changed(inner, collection, ChangeType::Added, id);
        }
        ProtocolEvent::Removed { collection, id } => {
            if inner.store.remove(&collection, &id) {
                subscription_changed(inner, collection, ChangeType::Removed, id);
            }
        }
        ProtocolEvent::Changed {
            collection,
            id,
            fields,
            cleared,
        } => {
            if inner.store.update(&collection, &id, fields, &cleared) {
                subscription_changed(inner, collection, ChangeType::Changed, id);
            }
        }
        ProtocolEvent::Ready { subs } => {
            for sub_id in subs {
                let Some((name, on_ready)) = inner.calls.take_ready(&sub_id) else {
                    debug!("Ready for unknown subscription {}", sub_id);
                    continue;
                };
                inner.subscriptions.mark_ready(&name);
                inner.events.dispatch(SessionEvent::SubscriptionChanged {
                    subscription: name,
                    change: ChangeType::Ready,
                    doc_id: None,
                });
                if let Some(on_ready) = on_ready {
                    on_ready();
                }
            }
        }
        ProtocolEvent::NoSub { id, error } => {
            let Some((name, on_error)) = inner.calls.take_nosub(&id) else {
                debug!("nosub for unknown subscription {}", id);
                return;
            };
            inner.subscriptions.remove(&name);
            if let Some(error) = error {
                inner.machine.dispatch_error(error.to_string());
                if let Some(on_error) = on_error {
                    on_error(error);
                }
            } else {
                debug!("Subscription {} stopped by server", name);
            }
        }
        ProtocolEvent::MethodResult { id, result, error } => {
            let Some(callback) = inner.calls.resolve_method(&id) else {
                debug!("Result for method {} with no listener", id);
                return;
            };
            callback(match error {
                Some(error) => Err(error),
                None => Ok(result),
            });
        }
        ProtocolEvent::Updated { methods } => {
            debug!("Methods updated: {:?}", methods);
        }
        ProtocolEvent::Ping { id } => {
            if let Err(e) = inner.machine.transport().send(ClientMessage::Pong { id }) {
                debug!("Could not answer ping: {}", e);
            }
        }
        ProtocolEvent::Pong { .. } => {}
    }
}

fn subscription_changed(inner: &Inner, collection: String, change: ChangeType, doc_id: String) {
    inner.events.dispatch(SessionEvent::SubscriptionChanged {
        subscription: collection,
        change,
        doc_id: Some(doc_id),
    });
}
