//! ddpsync Core Library
//!
//! This crate provides the client core for servers speaking DDP, the JSON
//! publish/subscribe protocol used by Meteor: a session that connects, logs
//! in, subscribes to publications and keeps a live local replica of the
//! published documents.
//!
//! # Architecture
//!
//! - **Transport**: moves JSON frames (WebSocket in production, in-memory in tests)
//! - **Router**: matches inbound messages to the store, tracker and callbacks
//! - **Session**: owns everything and is the main entry point
//!
//! All reads are served from the in-memory [`DocumentStore`]; changes are
//! announced through the session's [`EventDispatcher`].
//!
//! # Quick Start
//!
//! ```text
//! let session = Session::from_config(&Config::load()?)?;
//! let mut events = session.events().listen();
//!
//! session.connect_if_needed();
//! session.subscribe("parties", vec![]);
//!
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! ```
//!
//! # Modules
//!
//! - `session`: Client session (main entry point)
//! - `state`: Connection and login state machine
//! - `router`: Inbound message routing
//! - `store`: Local document replica
//! - `subscriptions`: Subscription readiness
//! - `events`: Session events and observers
//! - `protocol`: DDP wire messages
//! - `transport` / `ws`: Transport seam and its WebSocket implementation
//! - `credentials`: Resume token persistence
//! - `config`: Application configuration

mod calls;
pub mod config;
pub mod credentials;
pub mod document;
pub mod error;
pub mod events;
mod locks;
pub mod protocol;
pub mod router;
pub mod session;
pub mod state;
pub mod store;
pub mod subscriptions;
pub mod transport;
pub mod ws;

pub use calls::{MethodResult, SubscriptionCallbacks};
pub use config::Config;
pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use document::{Collection, Document, Fields};
pub use error::{CredentialError, Error, ProtocolError, Result, TransportError};
pub use events::{ChangeType, EventDispatcher, EventKind, ObserverId, SessionEvent};
pub use protocol::{ClientMessage, DdpError, ProtocolEvent};
pub use router::ProtocolEventRouter;
pub use session::{ConnectPolicy, NoAutoLogin, ResumeLogin, Session};
pub use state::{SessionState, SessionStateMachine};
pub use store::DocumentStore;
pub use subscriptions::SubscriptionTracker;
pub use transport::{ConnectionState, InboundSink, Transport, TransportEvent, TransportFactory};
pub use ws::{WsTransport, WsTransportFactory};
