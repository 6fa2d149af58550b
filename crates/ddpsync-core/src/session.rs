//! Client session
//!
//! [`Session`] ties the pieces together: it owns the state machine (and
//! through it the transport), the document store, the subscription tracker,
//! the event dispatcher and the in-flight call registry. It is a cheap
//! clonable handle; clones share one session.
//!
//! Nothing here blocks on the network. `connect_if_needed`, `call`,
//! `subscribe` and the login methods only queue work; outcomes arrive later
//! as callbacks and [`SessionEvent`](crate::events::SessionEvent)s.

use std::sync::{Arc, RwLock, Weak};

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::calls::{MethodResult, PendingCalls, SubscriptionCallbacks};
use crate::config::Config;
use crate::credentials::{CredentialStore, FileCredentialStore};
use crate::document::{Collection, Document};
use crate::error::Result;
use crate::events::EventDispatcher;
use crate::locks::{read, write};
use crate::protocol::ClientMessage;
use crate::router::ProtocolEventRouter;
use crate::state::{SessionState, SessionStateMachine, SinkBuilder};
use crate::store::DocumentStore;
use crate::subscriptions::SubscriptionTracker;
use crate::transport::{ConnectionState, TransportFactory};
use crate::ws::WsTransportFactory;

/// Collection holding user documents
const USERS_COLLECTION: &str = "users";

/// What to do once the server accepts a connection
pub trait ConnectPolicy: Send + Sync {
    fn on_connected(&self, session: &Session);
}

/// Log in with the stored resume token if not logged in yet
#[derive(Debug, Default, Clone, Copy)]
pub struct ResumeLogin;

impl ConnectPolicy for ResumeLogin {
    fn on_connected(&self, session: &Session) {
        if session.is_logged_in() {
            return;
        }
        if let Some(token) = session.resume_token() {
            debug!("Resuming login with stored token");
            session.login_with_token(&token);
        }
    }
}

/// Do nothing after connecting
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAutoLogin;

impl ConnectPolicy for NoAutoLogin {
    fn on_connected(&self, _session: &Session) {}
}

impl<F> ConnectPolicy for F
where
    F: Fn(&Session) + Send + Sync,
{
    fn on_connected(&self, session: &Session) {
        self(session)
    }
}

pub(crate) struct Inner {
    pub(crate) machine: SessionStateMachine,
    pub(crate) store: DocumentStore,
    pub(crate) subscriptions: SubscriptionTracker,
    pub(crate) events: Arc<EventDispatcher>,
    pub(crate) calls: PendingCalls,
    policy: RwLock<Arc<dyn ConnectPolicy>>,
}

impl Inner {
    pub(crate) fn policy(&self) -> Arc<dyn ConnectPolicy> {
        Arc::clone(&read(&self.policy))
    }
}

/// Handle to a DDP client session
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Create a session over transports from `factory`
    ///
    /// The first transport is built immediately but not connected. The
    /// default post-connect policy is [`ResumeLogin`].
    pub fn new(factory: Arc<dyn TransportFactory>, credentials: Arc<dyn CredentialStore>) -> Self {
        let events = Arc::new(EventDispatcher::new());

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let sink_builder: SinkBuilder = Box::new(move |generation| {
                ProtocolEventRouter::new(weak.clone(), generation).into_sink()
            });

            Inner {
                machine: SessionStateMachine::new(
                    factory,
                    sink_builder,
                    credentials,
                    Arc::clone(&events),
                ),
                store: DocumentStore::new(),
                subscriptions: SubscriptionTracker::new(),
                events,
                calls: PendingCalls::default(),
                policy: RwLock::new(Arc::new(ResumeLogin)),
            }
        });

        Self { inner }
    }

    /// Create a WebSocket session from configuration
    ///
    /// Must be called inside a tokio runtime. Fails fast on an invalid
    /// server address.
    pub fn from_config(config: &Config) -> Result<Self> {
        let factory = WsTransportFactory::new(&config.websocket_url())?;
        let credentials = FileCredentialStore::new(config.credentials_path());
        let session = Self::new(Arc::new(factory), Arc::new(credentials));
        if !config.resume_on_connect {
            session.set_connect_policy(NoAutoLogin);
        }
        Ok(session)
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    /// Replace the post-connect policy
    pub fn set_connect_policy<P>(&self, policy: P)
    where
        P: ConnectPolicy + 'static,
    {
        *write(&self.inner.policy) = Arc::new(policy);
    }

    /// Event fan-out of this session
    pub fn events(&self) -> &EventDispatcher {
        &self.inner.events
    }

    /// Local replica of server collections
    pub fn store(&self) -> &DocumentStore {
        &self.inner.store
    }

    pub fn subscriptions(&self) -> &SubscriptionTracker {
        &self.inner.subscriptions
    }

    // Connection

    /// Connect if disconnected, or reconnect with a new transport if closed
    ///
    /// Returns `true` when a never-connected transport was told to connect.
    /// Replacing a closed transport connects the new one but returns `false`;
    /// while connecting or connected this is a no-op.
    pub fn connect_if_needed(&self) -> bool {
        self.inner.machine.connect_if_needed()
    }

    /// Move the session to another WebSocket server
    ///
    /// The URL is validated before anything changes. The current connection
    /// is dropped along with its in-flight calls, and the session reconnects
    /// to the new server. Must be called inside a tokio runtime.
    pub fn set_server(&self, url: &str) -> Result<()> {
        let factory = WsTransportFactory::new(url)?;
        self.set_transport_factory(Arc::new(factory));
        Ok(())
    }

    /// Reconnect using transports from `factory`
    pub fn set_transport_factory(&self, factory: Arc<dyn TransportFactory>) {
        let previous = self.inner.machine.replace_factory(factory);
        previous.disconnect();

        let dropped = self.inner.calls.clear();
        if dropped > 0 {
            debug!("Dropped {} in-flight calls on server change", dropped);
        }
        self.inner.machine.connect_if_needed();
    }

    /// Close the current transport
    pub fn disconnect(&self) {
        self.inner.machine.transport().disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.machine.is_connected()
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.machine.is_logged_in()
    }

    pub fn state(&self) -> SessionState {
        self.inner.machine.state()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.machine.connection_state()
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner.machine.user_id()
    }

    /// Resume token from the credential store
    pub fn resume_token(&self) -> Option<String> {
        self.inner.machine.stored_resume_token()
    }

    pub fn server_session(&self) -> Option<String> {
        self.inner.machine.server_session()
    }

    // Accounts

    /// Log in with a resume token
    pub fn login_with_token(&self, token: &str) {
        self.call_login("login", json!({ "resume": token }));
    }

    /// Log in with a username or email address and a password
    pub fn login(&self, username_or_email: &str, password: &str) {
        let user = if username_or_email.contains('@') {
            json!({ "email": username_or_email })
        } else {
            json!({ "username": username_or_email })
        };
        self.call_login("login", json!({ "user": user, "password": password }));
    }

    /// Create an account; a successful result logs the new user in
    ///
    /// Returns `false` without calling the server when the password is empty
    /// or neither username nor email is given.
    pub fn register_user(&self, username: Option<&str>, email: Option<&str>, password: &str) -> bool {
        if (username.is_none() && email.is_none()) || password.is_empty() {
            return false;
        }

        let mut options = serde_json::Map::new();
        if let Some(username) = username {
            options.insert("username".to_string(), json!(username));
        }
        if let Some(email) = email {
            options.insert("email".to_string(), json!(email));
        }
        options.insert("password".to_string(), json!(password));

        self.call_login("createUser", Value::Object(options));
        true
    }

    /// Ask the server to send a password reset mail
    pub fn forgot_password(&self, email: &str) {
        let weak = Arc::downgrade(&self.inner);
        self.call("forgotPassword", vec![json!({ "email": email })], move |result| {
            if let (Err(error), Some(inner)) = (result, weak.upgrade()) {
                inner.machine.dispatch_error(error.to_string());
            }
        });
    }

    /// Log out locally and forget the resume token
    pub fn logout(&self) {
        self.inner.machine.logout();
    }

    fn call_login(&self, method: &str, params: Value) {
        let weak = Arc::downgrade(&self.inner);
        self.call(method, vec![params], move |result| {
            if let Some(inner) = weak.upgrade() {
                inner.machine.handle_login_result(result);
            }
        });
    }

    // Subscriptions

    /// Subscribe to a publication; returns the subscription ID
    pub fn subscribe(&self, name: &str, params: Vec<Value>) -> String {
        self.subscribe_with(name, params, SubscriptionCallbacks::new())
    }

    /// Subscribe with ready and error callbacks; returns the subscription ID
    pub fn subscribe_with(
        &self,
        name: &str,
        params: Vec<Value>,
        callbacks: SubscriptionCallbacks,
    ) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();

        let previous = self.inner.subscriptions.is_ready(name);
        self.inner.subscriptions.subscribe(name);
        self.inner.calls.register_subscription(&id, name, callbacks);

        if let Err(e) = self
            .inner
            .machine
            .transport()
            .send(ClientMessage::sub(&id, name, params))
        {
            warn!("Failed to send subscription {}: {}", name, e);
            self.inner.calls.remove_subscription(&id);

            // Nothing will ever mark this attempt ready; restore the name
            match previous {
                None => {
                    self.inner.subscriptions.remove(name);
                }
                Some(true) => {
                    self.inner.subscriptions.mark_ready(name);
                }
                Some(false) => {}
            }
        }
        id
    }

    /// Stop a subscription and forget its readiness
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        let Some(name) = self.inner.calls.remove_subscription(subscription_id) else {
            return false;
        };
        self.inner.subscriptions.remove(&name);

        let message = ClientMessage::Unsub {
            id: subscription_id.to_string(),
        };
        if let Err(e) = self.inner.machine.transport().send(message) {
            debug!("Failed to send unsub for {}: {}", name, e);
        }
        true
    }

    /// True when every subscription has been reported ready
    pub fn all_subscriptions_ready(&self) -> bool {
        self.inner.subscriptions.all_ready()
    }

    // Methods

    /// Call a server method; `listener` receives the result once
    ///
    /// Returns the method call ID.
    pub fn call<F>(&self, method: &str, params: Vec<Value>, listener: F) -> String
    where
        F: FnOnce(MethodResult) + Send + 'static,
    {
        let id = self.inner.calls.next_method_id();
        self.inner.calls.register_method(&id, Box::new(listener));
        self.send_method(method, params, &id);
        id
    }

    /// Call a server method without caring about the result
    pub fn call_and_forget(&self, method: &str, params: Vec<Value>) -> String {
        let id = self.inner.calls.next_method_id();
        self.send_method(method, params, &id);
        id
    }

    fn send_method(&self, method: &str, params: Vec<Value>, id: &str) {
        if let Err(e) = self
            .inner
            .machine
            .transport()
            .send(ClientMessage::method(method, params, id))
        {
            warn!("Failed to send method {}: {}", method, e);
            self.inner.calls.resolve_method(id);
        }
    }

    // Documents

    pub fn get_collection(&self, name: &str) -> Option<Collection> {
        self.inner.store.get_collection(name)
    }

    pub fn get_document(&self, collection: &str, doc_id: &str) -> Option<Document> {
        self.inner.store.get_document(collection, doc_id)
    }

    /// Document of the logged-in user
    pub fn user(&self) -> Option<Document> {
        let user_id = self.user_id()?;
        self.get_document(USERS_COLLECTION, &user_id)
    }

    /// First email address of a user, or the user ID when none is known
    pub fn user_email(&self, user_id: &str) -> String {
        let Some(user) = self.get_document(USERS_COLLECTION, user_id) else {
            return user_id.to_string();
        };
        let address = user
            .array_of_objects("emails")
            .first()
            .and_then(|email| email.get("address"))
            .and_then(Value::as_str)
            .map(str::to_string);
        address.unwrap_or_else(|| user_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{MemoryCredentialStore, RESUME_TOKEN_KEY};
    use crate::document::Fields;
    use crate::events::{ChangeType, EventKind, SessionEvent};
    use crate::protocol::{DdpError, ProtocolEvent};
    use crate::transport::mock::{MockFactory, MockTransport};
    use crate::transport::Transport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Fixture {
        factory: Arc<MockFactory>,
        credentials: Arc<MemoryCredentialStore>,
        session: Session,
        seen: Arc<Mutex<Vec<SessionEvent>>>,
    }

    fn fixture() -> Fixture {
        let factory = MockFactory::new();
        let credentials = Arc::new(MemoryCredentialStore::new());
        let session = Session::new(factory.clone(), credentials.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            EventKind::ConnectionStateChanged,
            EventKind::Error,
            EventKind::SubscriptionChanged,
        ] {
            let seen = Arc::clone(&seen);
            session
                .events()
                .on(kind, move |event| seen.lock().unwrap().push(event.clone()));
        }

        Fixture {
            factory,
            credentials,
            session,
            seen,
        }
    }

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    /// Connect and complete the handshake
    fn connected(f: &Fixture) -> Arc<MockTransport> {
        f.session.connect_if_needed();
        let transport = f.factory.current();
        transport.open();
        transport.deliver(ProtocolEvent::Connected {
            session: "server-session".to_string(),
        });
        transport
    }

    fn last_method(transport: &MockTransport) -> (String, Vec<Value>, String) {
        match transport.sent().last().cloned() {
            Some(ClientMessage::Method { method, params, id }) => (method, params, id),
            other => panic!("Expected method message, got {:?}", other),
        }
    }

    fn login(f: &Fixture, transport: &MockTransport, token: &str, user_id: &str) {
        f.session.login_with_token(token);
        let (_, _, id) = last_method(transport);
        transport.deliver(ProtocolEvent::MethodResult {
            id,
            result: Some(json!({"id": user_id, "token": token})),
            error: None,
        });
    }

    fn states(f: &Fixture) -> Vec<SessionState> {
        f.seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                SessionEvent::ConnectionStateChanged { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_documents_follow_added_changed_removed() {
        let f = fixture();
        let transport = connected(&f);

        transport.deliver(ProtocolEvent::Added {
            collection: "parties".to_string(),
            id: "p1".to_string(),
            fields: fields(json!({"name": "A"})),
        });
        transport.deliver(ProtocolEvent::Changed {
            collection: "parties".to_string(),
            id: "p1".to_string(),
            fields: fields(json!({"name": "B"})),
            cleared: vec!["x".to_string()],
        });

        let doc = f.session.get_document("parties", "p1").unwrap();
        assert_eq!(doc.fields, fields(json!({"name": "B"})));

        transport.deliver(ProtocolEvent::Removed {
            collection: "parties".to_string(),
            id: "p1".to_string(),
        });
        assert!(f.session.get_document("parties", "p1").is_none());
        assert!(f.session.get_collection("parties").unwrap().is_empty());

        let changes: Vec<_> = f
            .seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                SessionEvent::SubscriptionChanged {
                    subscription,
                    change,
                    doc_id,
                } => Some((subscription.clone(), *change, doc_id.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            changes,
            vec![
                ("parties".to_string(), ChangeType::Added, Some("p1".to_string())),
                ("parties".to_string(), ChangeType::Changed, Some("p1".to_string())),
                ("parties".to_string(), ChangeType::Removed, Some("p1".to_string())),
            ]
        );
    }

    #[test]
    fn test_mutations_of_unknown_collection_are_quiet() {
        let f = fixture();
        let transport = connected(&f);
        let before = f.seen.lock().unwrap().len();

        transport.deliver(ProtocolEvent::Changed {
            collection: "ghosts".to_string(),
            id: "g1".to_string(),
            fields: fields(json!({"a": 1})),
            cleared: vec![],
        });
        transport.deliver(ProtocolEvent::Removed {
            collection: "ghosts".to_string(),
            id: "g1".to_string(),
        });

        assert_eq!(f.seen.lock().unwrap().len(), before);
        assert!(f.session.get_collection("ghosts").is_none());
    }

    #[test]
    fn test_subscription_becomes_ready() {
        let f = fixture();
        let transport = connected(&f);
        let ready_calls = Arc::new(AtomicUsize::new(0));

        let sub_id = {
            let ready_calls = Arc::clone(&ready_calls);
            f.session.subscribe_with(
                "partiesSub",
                vec![json!(10)],
                SubscriptionCallbacks::new().on_ready(move || {
                    ready_calls.fetch_add(1, Ordering::SeqCst);
                }),
            )
        };

        assert_eq!(
            transport.sent().last(),
            Some(&ClientMessage::Sub {
                id: sub_id.clone(),
                name: "partiesSub".to_string(),
                params: vec![json!(10)],
            })
        );
        assert!(!f.session.all_subscriptions_ready());

        transport.deliver(ProtocolEvent::Ready {
            subs: vec![sub_id.clone()],
        });
        assert!(f.session.all_subscriptions_ready());
        assert_eq!(ready_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            f.seen.lock().unwrap().last(),
            Some(&SessionEvent::SubscriptionChanged {
                subscription: "partiesSub".to_string(),
                change: ChangeType::Ready,
                doc_id: None,
            })
        );

        // A repeated ready does not re-run the callback
        transport.deliver(ProtocolEvent::Ready { subs: vec![sub_id] });
        assert_eq!(ready_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resubscribe_requires_new_ready() {
        let f = fixture();
        let transport = connected(&f);

        let first = f.session.subscribe("parties", vec![]);
        transport.deliver(ProtocolEvent::Ready { subs: vec![first] });
        assert!(f.session.all_subscriptions_ready());

        let second = f.session.subscribe("parties", vec![]);
        assert!(!f.session.all_subscriptions_ready());
        transport.deliver(ProtocolEvent::Ready { subs: vec![second] });
        assert!(f.session.all_subscriptions_ready());
    }

    #[test]
    fn test_nosub_with_error() {
        let f = fixture();
        let transport = connected(&f);
        let failure = Arc::new(Mutex::new(None));

        let sub_id = {
            let failure = Arc::clone(&failure);
            f.session.subscribe_with(
                "secret",
                vec![],
                SubscriptionCallbacks::new().on_error(move |error| {
                    *failure.lock().unwrap() = Some(error);
                }),
            )
        };

        transport.deliver(ProtocolEvent::NoSub {
            id: sub_id,
            error: Some(DdpError::new("Subscription 'secret' not found")),
        });

        assert!(f.session.all_subscriptions_ready());
        assert!(f.session.subscriptions().is_ready("secret").is_none());
        assert_eq!(
            failure.lock().unwrap().as_ref().map(|e| e.to_string()),
            Some("Subscription 'secret' not found".to_string())
        );
        assert_eq!(
            f.seen.lock().unwrap().last(),
            Some(&SessionEvent::Error {
                message: "Subscription 'secret' not found".to_string()
            })
        );
    }

    #[test]
    fn test_unsubscribe() {
        let f = fixture();
        let transport = connected(&f);

        let sub_id = f.session.subscribe("parties", vec![]);
        assert!(f.session.unsubscribe(&sub_id));
        assert!(!f.session.unsubscribe(&sub_id));

        assert_eq!(
            transport.sent().last(),
            Some(&ClientMessage::Unsub { id: sub_id })
        );
        assert!(f.session.all_subscriptions_ready());
    }

    #[test]
    fn test_login_with_token_then_logout() {
        let f = fixture();
        let transport = connected(&f);

        f.session.login_with_token("T");
        let (method, params, id) = last_method(&transport);
        assert_eq!(method, "login");
        assert_eq!(params, vec![json!({"resume": "T"})]);
        assert!(!f.session.is_logged_in());

        transport.deliver(ProtocolEvent::MethodResult {
            id,
            result: Some(json!({"id": "u1", "token": "T"})),
            error: None,
        });

        assert!(f.session.is_logged_in());
        assert_eq!(f.session.user_id().as_deref(), Some("u1"));
        assert_eq!(
            f.credentials.load(RESUME_TOKEN_KEY).unwrap().as_deref(),
            Some("T")
        );

        f.session.logout();
        assert!(!f.session.is_logged_in());
        assert!(f.credentials.load(RESUME_TOKEN_KEY).unwrap().is_none());
        assert!(f.session.is_connected());
        assert_eq!(
            states(&f),
            vec![
                SessionState::Connected,
                SessionState::LoggedIn,
                SessionState::NotLoggedIn
            ]
        );
    }

    #[test]
    fn test_login_error_surfaces_as_event() {
        let f = fixture();
        let transport = connected(&f);

        f.session.login("someone@example.com", "wrong");
        let (_, params, id) = last_method(&transport);
        assert_eq!(
            params,
            vec![json!({"user": {"email": "someone@example.com"}, "password": "wrong"})]
        );

        transport.deliver(ProtocolEvent::MethodResult {
            id,
            result: None,
            error: Some(DdpError {
                error: json!(403),
                reason: Some("Incorrect password".to_string()),
                message: Some("Incorrect password [403]".to_string()),
                error_type: Some("Meteor.Error".to_string()),
            }),
        });

        assert_eq!(f.session.state(), SessionState::Connected);
        assert_eq!(
            f.seen.lock().unwrap().last(),
            Some(&SessionEvent::Error {
                message: "Incorrect password [403]".to_string()
            })
        );
    }

    #[test]
    fn test_login_by_username() {
        let f = fixture();
        let transport = connected(&f);

        f.session.login("alice", "pw");
        let (_, params, _) = last_method(&transport);
        assert_eq!(
            params,
            vec![json!({"user": {"username": "alice"}, "password": "pw"})]
        );
    }

    #[test]
    fn test_register_user() {
        let f = fixture();
        let transport = connected(&f);
        transport.take_sent();

        assert!(!f.session.register_user(None, None, "pw"));
        assert!(!f.session.register_user(Some("alice"), None, ""));
        assert!(transport.sent().is_empty());

        assert!(f.session.register_user(Some("alice"), Some("a@example.com"), "pw"));
        let (method, params, id) = last_method(&transport);
        assert_eq!(method, "createUser");
        assert_eq!(
            params,
            vec![json!({"username": "alice", "email": "a@example.com", "password": "pw"})]
        );

        transport.deliver(ProtocolEvent::MethodResult {
            id,
            result: Some(json!({"id": "u9", "token": "fresh"})),
            error: None,
        });
        assert_eq!(f.session.user_id().as_deref(), Some("u9"));
    }

    #[test]
    fn test_forgot_password_error() {
        let f = fixture();
        let transport = connected(&f);

        f.session.forgot_password("nobody@example.com");
        let (method, params, id) = last_method(&transport);
        assert_eq!(method, "forgotPassword");
        assert_eq!(params, vec![json!({"email": "nobody@example.com"})]);

        transport.deliver(ProtocolEvent::MethodResult {
            id,
            result: None,
            error: Some(DdpError::new("User not found")),
        });
        assert_eq!(
            f.seen.lock().unwrap().last(),
            Some(&SessionEvent::Error {
                message: "User not found".to_string()
            })
        );
    }

    #[test]
    fn test_closed_transport_forces_closed_then_reconnects() {
        let f = fixture();
        let transport = connected(&f);
        login(&f, &transport, "T", "u1");
        assert!(f.session.is_logged_in());

        transport.close();
        assert_eq!(f.session.state(), SessionState::Closed);
        assert_eq!(states(&f).last(), Some(&SessionState::Closed));
        assert!(!f.session.is_connected());

        assert!(!f.session.connect_if_needed());
        assert_eq!(f.factory.created(), 2);
        assert_eq!(f.factory.current().connect_calls(), 1);
        assert_eq!(f.session.connection_state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_resume_login_after_connect() {
        let f = fixture();
        f.credentials.save(RESUME_TOKEN_KEY, Some("stored")).unwrap();

        let transport = connected(&f);

        let (method, params, id) = last_method(&transport);
        assert_eq!(method, "login");
        assert_eq!(params, vec![json!({"resume": "stored"})]);

        transport.deliver(ProtocolEvent::MethodResult {
            id,
            result: Some(json!({"id": "u1", "token": "stored"})),
            error: None,
        });
        assert!(f.session.is_logged_in());
    }

    #[test]
    fn test_no_auto_login_policy() {
        let f = fixture();
        f.credentials.save(RESUME_TOKEN_KEY, Some("stored")).unwrap();
        f.session.set_connect_policy(NoAutoLogin);

        let transport = connected(&f);
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_closure_policy() {
        let f = fixture();
        f.session.set_connect_policy(|session: &Session| {
            session.subscribe("parties", vec![]);
        });

        let transport = connected(&f);
        assert!(matches!(
            transport.sent().last(),
            Some(ClientMessage::Sub { name, .. }) if name == "parties"
        ));
        assert!(!f.session.all_subscriptions_ready());
    }

    #[test]
    fn test_results_route_to_their_own_listener_once() {
        let f = fixture();
        let transport = connected(&f);
        let results = Arc::new(Mutex::new(Vec::new()));

        let mut ids = Vec::new();
        for name in ["first", "second"] {
            let results = Arc::clone(&results);
            ids.push(f.session.call("echo", vec![json!(name)], move |result| {
                results.lock().unwrap().push((name, result));
            }));
        }
        assert_ne!(ids[0], ids[1]);

        transport.deliver(ProtocolEvent::MethodResult {
            id: ids[1].clone(),
            result: Some(json!("two")),
            error: None,
        });
        transport.deliver(ProtocolEvent::MethodResult {
            id: ids[0].clone(),
            result: Some(json!("one")),
            error: None,
        });
        // Duplicate result is ignored
        transport.deliver(ProtocolEvent::MethodResult {
            id: ids[0].clone(),
            result: Some(json!("again")),
            error: None,
        });

        let results = results.lock().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], ("second", Ok(Some(json!("two")))));
        assert_eq!(results[1], ("first", Ok(Some(json!("one")))));
    }

    #[test]
    fn test_in_flight_calls_dropped_on_close() {
        let f = fixture();
        let transport = connected(&f);
        let called = Arc::new(AtomicUsize::new(0));

        let id = {
            let called = Arc::clone(&called);
            f.session.call("slow", vec![], move |_| {
                called.fetch_add(1, Ordering::SeqCst);
            })
        };
        transport.close();

        f.session.connect_if_needed();
        f.factory.current().deliver(ProtocolEvent::MethodResult {
            id,
            result: None,
            error: None,
        });
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_events_from_replaced_transport_are_dropped() {
        let f = fixture();
        let old = connected(&f);
        old.close();
        f.session.connect_if_needed();

        old.deliver(ProtocolEvent::Added {
            collection: "parties".to_string(),
            id: "p1".to_string(),
            fields: Fields::new(),
        });
        assert!(f.session.get_collection("parties").is_none());

        f.factory.current().deliver(ProtocolEvent::Added {
            collection: "parties".to_string(),
            id: "p1".to_string(),
            fields: Fields::new(),
        });
        assert!(f.session.get_document("parties", "p1").is_some());
    }

    #[test]
    fn test_server_error_and_ping() {
        let f = fixture();
        let transport = connected(&f);
        transport.take_sent();

        transport.deliver(ProtocolEvent::Error {
            reason: Some("Bad request".to_string()),
            offending_message: None,
        });
        assert_eq!(
            f.seen.lock().unwrap().last(),
            Some(&SessionEvent::Error {
                message: "Bad request".to_string()
            })
        );

        transport.deliver(ProtocolEvent::Ping {
            id: Some("k1".to_string()),
        });
        assert_eq!(
            transport.sent(),
            vec![ClientMessage::Pong {
                id: Some("k1".to_string())
            }]
        );
        assert_eq!(f.session.server_session().as_deref(), Some("server-session"));
    }

    #[test]
    fn test_user_and_email_lookup() {
        let f = fixture();
        let transport = connected(&f);
        login(&f, &transport, "T", "u1");

        transport.deliver(ProtocolEvent::Added {
            collection: "users".to_string(),
            id: "u1".to_string(),
            fields: fields(json!({
                "username": "alice",
                "emails": [{"address": "alice@example.com", "verified": true}]
            })),
        });

        assert_eq!(f.session.user().unwrap().get_str("username"), Some("alice"));
        assert_eq!(f.session.user_email("u1"), "alice@example.com");
        assert_eq!(f.session.user_email("u2"), "u2");
    }

    #[test]
    fn test_calls_while_closed_are_dropped() {
        let f = fixture();
        let transport = connected(&f);
        transport.close();

        f.session.call("anything", vec![], |_| panic!("never completes"));
        assert_eq!(f.session.inner.calls.pending_methods(), 0);
    }

    #[test]
    fn test_failed_subscribe_does_not_block_readiness() {
        let f = fixture();
        let transport = connected(&f);
        transport.close();

        let sub_id = f.session.subscribe("parties", vec![]);
        assert!(f.session.all_subscriptions_ready());
        assert!(f.session.subscriptions().is_ready("parties").is_none());
        assert!(!f.session.unsubscribe(&sub_id));

        f.session.connect_if_needed();
        let transport = f.factory.current();
        transport.open();
        transport.deliver(ProtocolEvent::Ready { subs: vec![sub_id] });
        assert!(f.session.all_subscriptions_ready());
    }

    #[test]
    fn test_failed_resubscribe_keeps_earlier_readiness() {
        let f = fixture();
        let transport = connected(&f);

        let sub_id = f.session.subscribe("parties", vec![]);
        transport.deliver(ProtocolEvent::Ready { subs: vec![sub_id] });
        transport.close();

        f.session.subscribe("parties", vec![]);
        assert_eq!(f.session.subscriptions().is_ready("parties"), Some(true));
        assert!(f.session.all_subscriptions_ready());
    }

    #[test]
    fn test_call_and_forget() {
        let f = fixture();
        let transport = connected(&f);

        let first = f.session.call_and_forget("touch", vec![json!(1)]);
        let second = f.session.call_and_forget("touch", vec![json!(2)]);
        assert_ne!(first, second);

        assert_eq!(
            transport.sent(),
            vec![
                ClientMessage::method("touch", vec![json!(1)], &first),
                ClientMessage::method("touch", vec![json!(2)], &second),
            ]
        );

        // Nobody listens for the result
        transport.deliver(ProtocolEvent::MethodResult {
            id: first,
            result: Some(json!("ok")),
            error: None,
        });
        assert_eq!(f.session.inner.calls.pending_methods(), 0);
        assert!(f.session.is_connected());
    }

    #[test]
    fn test_set_transport_factory_moves_session() {
        let f = fixture();
        let old = connected(&f);
        login(&f, &old, "T", "u1");
        let called = Arc::new(AtomicUsize::new(0));
        let id = {
            let called = Arc::clone(&called);
            f.session.call("slow", vec![], move |_| {
                called.fetch_add(1, Ordering::SeqCst);
            })
        };

        let other = MockFactory::new();
        f.session.set_transport_factory(other.clone());

        assert_eq!(old.state(), ConnectionState::Closed);
        assert_eq!(f.factory.created(), 1);
        assert_eq!(other.created(), 1);
        assert_eq!(other.current().connect_calls(), 1);
        assert_eq!(f.session.state(), SessionState::NotLoggedIn);
        assert!(f.session.user_id().is_none());
        assert_eq!(states(&f).last(), Some(&SessionState::NotLoggedIn));

        // The old server no longer reaches the session
        old.deliver(ProtocolEvent::MethodResult {
            id,
            result: None,
            error: None,
        });
        old.deliver(ProtocolEvent::Added {
            collection: "parties".to_string(),
            id: "p1".to_string(),
            fields: Fields::new(),
        });
        assert_eq!(called.load(Ordering::SeqCst), 0);
        assert!(f.session.get_collection("parties").is_none());

        // The stored token resumes the login on the new server
        let transport = other.current();
        transport.open();
        transport.deliver(ProtocolEvent::Connected {
            session: "s2".to_string(),
        });
        let (method, params, _) = last_method(&transport);
        assert_eq!(method, "login");
        assert_eq!(params, vec![json!({"resume": "T"})]);
    }

    #[tokio::test]
    async fn test_set_server_rejects_bad_url() {
        let f = fixture();
        let transport = connected(&f);

        assert!(f.session.set_server("http://example.com/websocket").is_err());
        assert_eq!(f.factory.created(), 1);
        assert_eq!(transport.state(), ConnectionState::Connected);
        assert_eq!(f.session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_from_config() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut config = Config {
            server_url: "localhost:3000".to_string(),
            data_dir: temp_dir.path().to_path_buf(),
            resume_on_connect: false,
        };

        let session = Session::from_config(&config).unwrap();
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(session.state(), SessionState::NotLoggedIn);

        config.server_url = "http://localhost:3000/websocket".to_string();
        assert!(Session::from_config(&config).is_err());
    }
}
