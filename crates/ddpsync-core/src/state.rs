//! Session state machine
//!
//! Tracks login state on top of the transport's connection state and owns
//! the transport itself, rebuilding it when a closed one must be replaced.
//!
//! ```text
//! NotLoggedIn --connected--> Connected --login ok--> LoggedIn
//!      ^                                                |
//!      +------------------------logout------------------+
//!
//! any state --transport closed--> Closed
//! ```
//!
//! State and identity live under one lock, so a reader never sees
//! `LoggedIn` without a user ID.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::credentials::{CredentialStore, RESUME_TOKEN_KEY};
use crate::events::{EventDispatcher, SessionEvent};
use crate::locks::{lock, read, write};
use crate::protocol::DdpError;
use crate::transport::{ConnectionState, InboundSink, Transport, TransportFactory};

/// Login-aware session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotLoggedIn,
    Connected,
    LoggedIn,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::NotLoggedIn => "not_logged_in",
            SessionState::Connected => "connected",
            SessionState::LoggedIn => "logged_in",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the inbound sink for a transport of a given generation
pub(crate) type SinkBuilder = Box<dyn Fn(u64) -> InboundSink + Send + Sync>;

#[derive(Debug)]
struct Auth {
    state: SessionState,
    user_id: Option<String>,
    resume_token: Option<String>,
    server_session: Option<String>,
}

impl Auth {
    fn event(&self) -> SessionEvent {
        SessionEvent::ConnectionStateChanged {
            state: self.state,
            user_id: self.user_id.clone(),
            resume_token: self.resume_token.clone(),
        }
    }
}

/// Connection and login state of a session
pub struct SessionStateMachine {
    factory: RwLock<Arc<dyn TransportFactory>>,
    sink_builder: SinkBuilder,
    transport: RwLock<Arc<dyn Transport>>,
    generation: AtomicU64,
    auth: Mutex<Auth>,
    credentials: Arc<dyn CredentialStore>,
    events: Arc<EventDispatcher>,
}

impl SessionStateMachine {
    pub(crate) fn new(
        factory: Arc<dyn TransportFactory>,
        sink_builder: SinkBuilder,
        credentials: Arc<dyn CredentialStore>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        let transport = factory.create(sink_builder(0));

        Self {
            factory: RwLock::new(factory),
            sink_builder,
            transport: RwLock::new(transport),
            generation: AtomicU64::new(0),
            auth: Mutex::new(Auth {
                state: SessionState::NotLoggedIn,
                user_id: None,
                resume_token: None,
                server_session: None,
            }),
            credentials,
            events,
        }
    }

    /// Transport currently in use
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&read(&self.transport))
    }

    /// Generation of the current transport; bumped on every rebuild
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport().state()
    }

    /// Session state; a closed transport always reads as `Closed`
    pub fn state(&self) -> SessionState {
        let closed = self.connection_state() == ConnectionState::Closed;
        let mut auth = lock(&self.auth);
        if closed {
            auth.state = SessionState::Closed;
        }
        auth.state
    }

    pub fn is_connected(&self) -> bool {
        !matches!(
            self.connection_state(),
            ConnectionState::Disconnected | ConnectionState::Closed
        )
    }

    pub fn is_logged_in(&self) -> bool {
        self.state() == SessionState::LoggedIn
    }

    /// User ID while logged in
    pub fn user_id(&self) -> Option<String> {
        let closed = self.connection_state() == ConnectionState::Closed;
        let auth = lock(&self.auth);
        if closed || auth.state != SessionState::LoggedIn {
            return None;
        }
        auth.user_id.clone()
    }

    /// Session ID the server assigned in its `connected` message
    pub fn server_session(&self) -> Option<String> {
        lock(&self.auth).server_session.clone()
    }

    /// Resume token from the credential store
    pub fn stored_resume_token(&self) -> Option<String> {
        match self.credentials.load(RESUME_TOKEN_KEY) {
            Ok(token) => token,
            Err(e) => {
                warn!("Failed to load resume token: {}", e);
                None
            }
        }
    }

    /// Connect unless already connecting or connected
    ///
    /// Returns `true` only when a never-connected transport was told to
    /// connect. A closed transport is replaced by a fresh one from the factory
    /// and connected, but that path returns `false`.
    pub fn connect_if_needed(&self) -> bool {
        let (transport, rebuilt) = {
            let mut current = write(&self.transport);
            match current.state() {
                ConnectionState::Disconnected => (Arc::clone(&current), false),
                ConnectionState::Closed => {
                    *current = self.create_transport();
                    (Arc::clone(&current), true)
                }
                ConnectionState::Connecting | ConnectionState::Connected => return false,
            }
        };

        if rebuilt {
            info!("Transport closed, reconnecting with a new one");
            self.reset_auth();
        } else {
            info!("Connecting");
        }

        transport.connect();
        !rebuilt
    }

    /// Switch to transports from `factory`
    ///
    /// The current transport is swapped for a fresh, unconnected one and
    /// returned so the caller can shut it down; its events are already
    /// superseded. Login state resets to `NotLoggedIn`.
    pub(crate) fn replace_factory(&self, factory: Arc<dyn TransportFactory>) -> Arc<dyn Transport> {
        let previous = {
            let mut current = write(&self.transport);
            *write(&self.factory) = factory;
            std::mem::replace(&mut *current, self.create_transport())
        };

        let event = self.reset_auth();
        info!("Transport factory replaced");
        self.events.dispatch(event);
        previous
    }

    /// Build the next-generation transport; caller holds the transport lock
    fn create_transport(&self) -> Arc<dyn Transport> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        read(&self.factory).create((self.sink_builder)(generation))
    }

    fn reset_auth(&self) -> SessionEvent {
        let mut auth = lock(&self.auth);
        auth.state = SessionState::NotLoggedIn;
        auth.user_id = None;
        auth.resume_token = None;
        auth.server_session = None;
        auth.event()
    }

    /// Server accepted the handshake
    pub(crate) fn on_connected(&self, server_session: String) {
        let event = {
            let mut auth = lock(&self.auth);
            auth.state = SessionState::Connected;
            auth.server_session = Some(server_session);
            auth.event()
        };
        info!("Session connected");
        self.events.dispatch(event);
    }

    /// Transport reported it is closed
    pub(crate) fn on_transport_closed(&self) {
        let event = {
            let mut auth = lock(&self.auth);
            auth.state = SessionState::Closed;
            auth.event()
        };
        info!("Session closed");
        self.events.dispatch(event);
    }

    /// Apply the outcome of a `login` or `createUser` call
    pub(crate) fn handle_login_result(&self, result: Result<Option<Value>, DdpError>) {
        let payload = match result {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                self.dispatch_error("Login returned no result".to_string());
                return;
            }
            Err(error) => {
                self.dispatch_error(error.to_string());
                return;
            }
        };

        let token = payload.get("token").and_then(Value::as_str);
        let user_id = payload.get("id").and_then(Value::as_str);
        let (Some(token), Some(user_id)) = (token, user_id) else {
            self.dispatch_error("Login result is missing token or user id".to_string());
            return;
        };

        self.save_resume_token(Some(token));

        let event = {
            let mut auth = lock(&self.auth);
            let closed = self.connection_state() == ConnectionState::Closed;
            if closed || auth.state == SessionState::Closed {
                auth.state = SessionState::Closed;
                None
            } else {
                auth.state = SessionState::LoggedIn;
                auth.user_id = Some(user_id.to_string());
                auth.resume_token = Some(token.to_string());
                Some(auth.event())
            }
        };

        match event {
            Some(event) => {
                info!("Logged in as {}", user_id);
                self.events.dispatch(event);
            }
            None => debug!("Login result arrived after the transport closed"),
        }
    }

    /// Forget the login locally and drop the stored resume token
    ///
    /// The connection stays open.
    pub fn logout(&self) {
        self.save_resume_token(None);

        let event = {
            let mut auth = lock(&self.auth);
            auth.state = SessionState::NotLoggedIn;
            auth.user_id = None;
            auth.resume_token = None;
            auth.event()
        };
        info!("Logged out");
        self.events.dispatch(event);
    }

    pub(crate) fn dispatch_error(&self, message: String) {
        debug!("Session error: {}", message);
        self.events.dispatch(SessionEvent::Error { message });
    }

    fn save_resume_token(&self, token: Option<&str>) {
        if let Err(e) = self.credentials.save(RESUME_TOKEN_KEY, token) {
            warn!("Failed to persist resume token: {}", e);
        }
    }
}
