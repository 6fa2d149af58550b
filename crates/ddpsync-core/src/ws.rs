//! WebSocket transport
//!
//! Carries DDP JSON frames over tokio-tungstenite. Each [`WsTransport`] owns at
//! most one connection task; once that task ends the transport is `Closed`
//! for good.

use std::sync::{Arc, Mutex};

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::locks::lock;
use crate::protocol::{ClientMessage, ProtocolEvent};
use crate::transport::{ConnectionState, InboundSink, Transport, TransportEvent, TransportFactory};

/// Builds WebSocket transports for one server
#[derive(Debug, Clone)]
pub struct WsTransportFactory {
    url: String,
    handle: Handle,
}

impl WsTransportFactory {
    /// Create a factory on the current tokio runtime
    ///
    /// Fails if the URL is not a ws:// or wss:// URL with a host, or if no
    /// runtime is running.
    pub fn new(url: &str) -> Result<Self, TransportError> {
        let handle = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        Self::with_handle(url, handle)
    }

    /// Create a factory that spawns connections on the given runtime
    pub fn with_handle(url: &str, handle: Handle) -> Result<Self, TransportError> {
        validate_url(url)?;
        Ok(Self {
            url: url.to_string(),
            handle,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl TransportFactory for WsTransportFactory {
    fn create(&self, sink: InboundSink) -> Arc<dyn Transport> {
        Arc::new(WsTransport::new(&self.url, self.handle.clone(), sink))
    }
}

fn validate_url(url: &str) -> Result<(), TransportError> {
    let invalid = |reason: String| TransportError::InvalidUrl {
        url: url.to_string(),
        reason,
    };

    let uri: Uri = url.parse().map_err(|e| invalid(format!("{}", e)))?;
    match uri.scheme_str() {
        Some("ws") | Some("wss") => {}
        _ => return Err(invalid("scheme must be ws or wss".to_string())),
    }
    if uri.host().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}

/// State shared with the connection task
struct Shared {
    status: watch::Sender<ConnectionState>,
    sink: InboundSink,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.status.send_replace(state);
        if previous != state {
            (self.sink)(TransportEvent::StateChanged(state));
        }
    }

    fn state(&self) -> ConnectionState {
        *self.status.borrow()
    }
}

/// One WebSocket connection to a DDP server
pub struct WsTransport {
    url: String,
    handle: Handle,
    shared: Arc<Shared>,
    /// Outbound frames; queued until the socket opens
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl WsTransport {
    pub fn new(url: &str, handle: Handle, sink: InboundSink) -> Self {
        let (status, _) = watch::channel(ConnectionState::Disconnected);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Self {
            url: url.to_string(),
            handle,
            shared: Arc::new(Shared { status, sink }),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Watch connection state changes
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionState> {
        self.shared.status.subscribe()
    }
}

impl Transport for WsTransport {
    fn connect(&self) {
        if self.shared.state() != ConnectionState::Disconnected {
            return;
        }
        let Some(outbound_rx) = lock(&self.outbound_rx).take() else {
            return;
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *lock(&self.shutdown_tx) = Some(shutdown_tx);

        self.shared.set_state(ConnectionState::Connecting);
        self.handle.spawn(run_connection(
            self.url.clone(),
            Arc::clone(&self.shared),
            outbound_rx,
            shutdown_rx,
        ));
    }

    fn disconnect(&self) {
        match lock(&self.shutdown_tx).take() {
            Some(shutdown_tx) => {
                let _ = shutdown_tx.send(());
            }
            None => {
                // Never connected: nothing to tear down
                lock(&self.outbound_rx).take();
                self.shared.set_state(ConnectionState::Closed);
            }
        }
    }

    fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        if self.shared.state() == ConnectionState::Closed {
            return Err(TransportError::Closed);
        }
        let text = message.encode()?;
        self.outbound_tx
            .send(text)
            .map_err(|_| TransportError::Closed)
    }
}

/// Connect, then pump frames both ways until either side closes
async fn run_connection(
    url: String,
    shared: Arc<Shared>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut shutdown: oneshot::Receiver<()>,
) {
    debug!("Connecting to {}", url);

    let ws_stream = tokio::select! {
        result = connect_async(url.as_str()) => match result {
            Ok((stream, _response)) => stream,
            Err(e) => {
                warn!("Connection to {} failed: {}", url, e);
                shared.set_state(ConnectionState::Closed);
                return;
            }
        },
        _ = &mut shutdown => {
            shared.set_state(ConnectionState::Closed);
            return;
        }
    };

    info!("Connected to {}", url);
    let (mut write, mut read) = ws_stream.split();
    shared.set_state(ConnectionState::Connected);

    if let Err(e) = send_message(&mut write, &ClientMessage::connect()).await {
        warn!("Failed to send handshake to {}: {}", url, e);
        shared.set_state(ConnectionState::Closed);
        return;
    }

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(text) = frame else { break };
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!("WebSocket write error ({}): {}", url, e);
                    break;
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => dispatch_frame(&shared, &text),
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Server {} closed the connection", url);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error ({}): {}", url, e);
                        break;
                    }
                    // Binary frames are not part of DDP; control frames are handled by tungstenite
                    Some(Ok(_)) => {}
                }
            }
            _ = &mut shutdown => {
                debug!("Closing connection to {}", url);
                write.close().await.ok();
                break;
            }
        }
    }

    shared.set_state(ConnectionState::Closed);
}

fn dispatch_frame(shared: &Shared, text: &str) {
    match ProtocolEvent::decode(text) {
        Ok(Some(event)) => (shared.sink)(TransportEvent::Message(event)),
        Ok(None) => {}
        Err(e) => warn!("Dropping inbound frame: {}", e),
    }
}

async fn send_message<S>(write: &mut S, message: &ClientMessage) -> anyhow::Result<()>
where
    S: Sink<Message> + Unpin,
    <S as Sink<Message>>::Error: std::error::Error + Send + Sync + 'static,
{
    let text = message.encode()?;
    write.send(Message::Text(text)).await?;
    Ok(())
}
