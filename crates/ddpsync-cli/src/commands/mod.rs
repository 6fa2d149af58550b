//! Command handlers and the session plumbing they share

pub mod call;
pub mod config;
pub mod login;
pub mod logout;
pub mod status;
pub mod watch;

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use ddpsync_core::{Config, DocumentStore, NoAutoLogin, Session, SessionEvent, SessionState};

/// How long to wait for the server to answer
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(15);

/// How long to wait for a clean close
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// A session and the stream of its events
pub struct Connection {
    pub session: Session,
    pub events: UnboundedReceiver<SessionEvent>,
}

impl Connection {
    /// Connect and wait for the handshake
    ///
    /// With `resume` set and a stored token, also waits for the resume login
    /// to finish. A rejected token is reported but not fatal.
    pub async fn open(config: &Config, resume: bool) -> Result<Self> {
        let session = Session::from_config(config).context("Failed to create session")?;
        if !resume {
            session.set_connect_policy(NoAutoLogin);
        }
        let resuming = resume && config.resume_on_connect && session.resume_token().is_some();

        let mut connection = Self {
            events: session.events().listen(),
            session,
        };

        let url = config.websocket_url();
        debug!("Opening session to {}", url);
        connection.session.connect_if_needed();
        connection
            .next_matching("connection", |event| match event {
                SessionEvent::ConnectionStateChanged {
                    state: SessionState::Connected,
                    ..
                } => Some(Ok(())),
                SessionEvent::ConnectionStateChanged {
                    state: SessionState::Closed,
                    ..
                } => Some(Err(anyhow!("Could not connect to {}", url))),
                _ => None,
            })
            .await?;

        if resuming {
            connection
                .next_matching("resume login", |event| match event {
                    SessionEvent::ConnectionStateChanged {
                        state: SessionState::LoggedIn,
                        ..
                    } => Some(Ok(())),
                    SessionEvent::ConnectionStateChanged {
                        state: SessionState::Closed,
                        ..
                    } => Some(Err(anyhow!("Connection closed during login"))),
                    SessionEvent::Error { message } => {
                        warn!("Stored login was rejected: {}", message);
                        Some(Ok(()))
                    }
                    _ => None,
                })
                .await?;
        }

        Ok(connection)
    }

    /// Wait for the first event `f` decides on
    pub async fn next_matching<T, F>(&mut self, what: &str, mut f: F) -> Result<T>
    where
        F: FnMut(&SessionEvent) -> Option<Result<T>>,
    {
        let deadline = Instant::now() + RESPONSE_TIMEOUT;
        loop {
            let event = timeout_at(deadline, self.events.recv())
                .await
                .map_err(|_| anyhow!("Timed out waiting for {}", what))?
                .ok_or_else(|| anyhow!("Session ended while waiting for {}", what))?;
            if let Some(result) = f(&event) {
                return result;
            }
        }
    }

    /// Disconnect and give the socket a moment to close cleanly
    pub async fn close(mut self) {
        if !self.session.is_connected() {
            return;
        }
        self.session.disconnect();

        let deadline = Instant::now() + CLOSE_TIMEOUT;
        while let Ok(Some(event)) = timeout_at(deadline, self.events.recv()).await {
            if matches!(
                event,
                SessionEvent::ConnectionStateChanged {
                    state: SessionState::Closed,
                    ..
                }
            ) {
                return;
            }
        }
        debug!("Connection did not close in time");
    }
}

/// Parse method or subscription parameters given as JSON
///
/// A JSON array is spread into positional parameters; any other value is
/// passed as the single parameter.
pub fn parse_params(raw: Option<&str>) -> Result<Vec<Value>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str(raw) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(value) => Ok(vec![value]),
        Err(e) => bail!("Parameters must be JSON: {}", e),
    }
}

/// Document count per collection, sorted by name
pub fn collection_sizes(store: &DocumentStore) -> Vec<(String, usize)> {
    store
        .collection_names()
        .into_iter()
        .filter_map(|name| store.len(&name).map(|count| (name, count)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_params() {
        assert!(parse_params(None).unwrap().is_empty());
        assert!(parse_params(Some("  ")).unwrap().is_empty());
        assert_eq!(
            parse_params(Some(r#"[1, "two"]"#)).unwrap(),
            vec![json!(1), json!("two")]
        );
        assert_eq!(
            parse_params(Some(r#"{"limit": 10}"#)).unwrap(),
            vec![json!({"limit": 10})]
        );
        assert!(parse_params(Some("not json")).is_err());
    }

    #[test]
    fn test_collection_sizes() {
        let store = DocumentStore::new();
        store.add("users", "u1", Default::default());
        store.add("parties", "p1", Default::default());
        store.add("parties", "p2", Default::default());

        assert_eq!(
            collection_sizes(&store),
            vec![("parties".to_string(), 2), ("users".to_string(), 1)]
        );
    }
}
