//! DDP protocol message types
//!
//! Messages exchanged with a DDP server as JSON text frames. Inbound frames are
//! decoded into [`ProtocolEvent`], a tagged union the router matches
//! exhaustively; frames without a recognised `msg` field decode to `None`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::document::Fields;
use crate::error::ProtocolError;

/// Protocol version we ask for
pub const PROTOCOL_VERSION: &str = "1";

/// Protocol versions we can speak, most preferred first
pub const SUPPORTED_VERSIONS: &[&str] = &["1", "pre2", "pre1"];

/// Message types the router understands
const INBOUND_TYPES: &[&str] = &[
    "connected",
    "failed",
    "error",
    "added",
    "changed",
    "removed",
    "ready",
    "nosub",
    "result",
    "updated",
    "ping",
    "pong",
];

/// Error payload attached to method results and `nosub` messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DdpError {
    /// Error code, a number or a string depending on the server
    #[serde(default)]
    pub error: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        default,
        rename = "errorType",
        skip_serializing_if = "Option::is_none"
    )]
    pub error_type: Option<String>,
}

impl DdpError {
    /// Build an error from a plain reason string
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            error: Value::Null,
            reason: Some(reason.into()),
            message: None,
            error_type: None,
        }
    }
}

impl fmt::Display for DdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref message) = self.message {
            return f.write_str(message);
        }
        if let Some(ref reason) = self.reason {
            return f.write_str(reason);
        }
        match &self.error {
            Value::Null => f.write_str("unknown error"),
            Value::String(code) => f.write_str(code),
            other => write!(f, "error {}", other),
        }
    }
}

/// Messages sent to the server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Session handshake
    Connect {
        version: String,
        support: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        session: Option<String>,
    },

    /// Remote method invocation
    Method {
        method: String,
        params: Vec<Value>,
        id: String,
    },

    /// Start a subscription
    Sub {
        id: String,
        name: String,
        params: Vec<Value>,
    },

    /// Stop a subscription
    Unsub { id: String },

    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl ClientMessage {
    /// Create the handshake message
    pub fn connect() -> Self {
        ClientMessage::Connect {
            version: PROTOCOL_VERSION.to_string(),
            support: SUPPORTED_VERSIONS.iter().map(|v| v.to_string()).collect(),
            session: None,
        }
    }

    /// Create a method call message
    pub fn method(method: &str, params: Vec<Value>, id: &str) -> Self {
        ClientMessage::Method {
            method: method.to_string(),
            params,
            id: id.to_string(),
        }
    }

    /// Create a subscription message
    pub fn sub(id: &str, name: &str, params: Vec<Value>) -> Self {
        ClientMessage::Sub {
            id: id.to_string(),
            name: name.to_string(),
            params,
        }
    }

    /// Encode message to a JSON text frame
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages received from the server, already decoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ProtocolEvent {
    /// Handshake accepted
    Connected { session: String },

    /// Handshake rejected, server proposes another version
    Failed { version: String },

    /// Server could not process one of our messages
    Error {
        #[serde(default)]
        reason: Option<String>,
        #[serde(default, rename = "offendingMessage")]
        offending_message: Option<Value>,
    },

    /// Document added to a collection
    Added {
        collection: String,
        id: String,
        #[serde(default)]
        fields: Fields,
    },

    /// Fields of a document set or cleared
    Changed {
        collection: String,
        id: String,
        #[serde(default)]
        fields: Fields,
        #[serde(default)]
        cleared: Vec<String>,
    },

    /// Document removed from a collection
    Removed { collection: String, id: String },

    /// Initial data of these subscriptions has been sent
    Ready { subs: Vec<String> },

    /// Subscription stopped or refused
    NoSub {
        id: String,
        #[serde(default)]
        error: Option<DdpError>,
    },

    /// Result of a method call
    #[serde(rename = "result")]
    MethodResult {
        id: String,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<DdpError>,
    },

    /// Writes of these methods are reflected in the data
    Updated { methods: Vec<String> },

    Ping {
        #[serde(default)]
        id: Option<String>,
    },

    Pong {
        #[serde(default)]
        id: Option<String>,
    },
}

impl ProtocolEvent {
    /// Decode a text frame
    ///
    /// Frames with no `msg` field (such as the `server_id` greeting) and frames
    /// with a message type we do not handle yield `Ok(None)`.
    pub fn decode(text: &str) -> Result<Option<Self>, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;

        let Some(kind) = value.get("msg").and_then(Value::as_str) else {
            return Ok(None);
        };

        if !INBOUND_TYPES.contains(&kind) {
            debug!("Ignoring unhandled message type {}", kind);
            return Ok(None);
        }

        Ok(Some(serde_json::from_value(value)?))
    }

    /// Message type as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolEvent::Connected { .. } => "connected",
            ProtocolEvent::Failed { .. } => "failed",
            ProtocolEvent::Error { .. } => "error",
            ProtocolEvent::Added { .. } => "added",
            ProtocolEvent::Changed { .. } => "changed",
            ProtocolEvent::Removed { .. } => "removed",
            ProtocolEvent::Ready { .. } => "ready",
            ProtocolEvent::NoSub { .. } => "nosub",
            ProtocolEvent::MethodResult { .. } => "result",
            ProtocolEvent::Updated { .. } => "updated",
            ProtocolEvent::Ping { .. } => "ping",
            ProtocolEvent::Pong { .. } => "pong",
        }
    }
}
