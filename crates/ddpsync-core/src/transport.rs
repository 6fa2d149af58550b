//! Transport seam
//!
//! A transport moves frames between the session and the server. It knows
//! nothing about logins, documents or callbacks: outbound it takes encoded
//! [`ClientMessage`]s, inbound it hands decoded [`ProtocolEvent`]s and its own
//! state changes to the sink it was created with.
//!
//! A transport that reaches [`ConnectionState::Closed`] is finished; the
//! session asks its [`TransportFactory`] for a new one.

use std::sync::Arc;

use serde::Serialize;

use crate::error::TransportError;
use crate::protocol::{ClientMessage, ProtocolEvent};

/// State of the underlying connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Never connected
    Disconnected,
    /// Connection attempt in progress
    Connecting,
    /// Socket open
    Connected,
    /// Socket closed; this transport cannot be reused
    Closed,
}

/// Everything a transport reports to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A decoded inbound message
    Message(ProtocolEvent),
    /// The connection moved to a new state
    StateChanged(ConnectionState),
}

/// Receiver of transport events
pub type InboundSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// A single connection to a DDP server
pub trait Transport: Send + Sync {
    /// Start connecting; returns immediately
    fn connect(&self);

    /// Close the connection; the transport ends up `Closed`
    fn disconnect(&self);

    /// Current connection state
    fn state(&self) -> ConnectionState;

    /// Queue a message for the server
    fn send(&self, message: ClientMessage) -> Result<(), TransportError>;
}

/// Builds transports bound to a sink
pub trait TransportFactory: Send + Sync {
    fn create(&self, sink: InboundSink) -> Arc<dyn Transport>;
}
