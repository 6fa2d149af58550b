//! Error types
//!
//! Typed errors for the pieces of the client that can fail locally. Protocol
//! level problems reported by the server are not errors here: they surface as
//! [`SessionEvent::Error`](crate::events::SessionEvent::Error) events instead.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a transport or while building one
#[derive(Error, Debug)]
pub enum TransportError {
    /// Server address could not be turned into a WebSocket URL
    #[error("Invalid server address '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// WebSocket transport was built outside of a tokio runtime
    #[error("No tokio runtime available to drive the WebSocket transport")]
    NoRuntime,

    /// Outbound message could not be serialized
    #[error("Failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),

    /// Transport is closed and cannot carry more messages
    #[error("Transport is closed")]
    Closed,
}

/// Errors raised by a credential store
#[derive(Error, Debug)]
pub enum CredentialError {
    /// Failed to read the credential file
    #[error("Failed to read credentials from '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to write the credential file
    #[error("Failed to write credentials to '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Credential file exists but is not a JSON object of strings
    #[error("Credential file '{path}' is malformed: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised while decoding an inbound frame
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame is not valid JSON or does not match its declared message type
    #[error("Malformed protocol frame: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Crate-level error
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Result type for fallible client operations
pub type Result<T> = std::result::Result<T, Error>;
