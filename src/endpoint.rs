//! Endpoint builder and connection supervisor.
//!
//! The [`EndpointBuilder`] provides a fluent API for configuring the request
//! handler and reconnect behavior. The [`StreamingEndpoint`] manages the
//! lifecycle:
//! 1. Open a transport pair through a [`Connector`]
//! 2. Attach the payload sender and receiver
//! 3. Watch for disconnects, settle outstanding work, and reconnect
//!
//! ```text
//! Connecting ─► Connected ─► Disconnected ─► Reconnecting ─► Connected
//!                                  │               │
//!                                  ▼               ▼
//!                            (no reconnect)      Closed
//! ```
//!
//! # Example
//!
//! ```ignore
//! use streamplex::{handler_fn, PipeClientConnector, StreamingEndpoint, StreamingRequest};
//!
//! let endpoint = StreamingEndpoint::builder()
//!     .auto_reconnect(true)
//!     .request_timeout(std::time::Duration::from_secs(30))
//!     .connect(PipeClientConnector::new("bot"))
//!     .await?;
//!
//! let response = endpoint
//!     .send(&StreamingRequest::create("GET", "/api/version", None))
//!     .await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use crate::adapter::ProtocolAdapter;
use crate::error::{Result, StreamingError};
use crate::handler::{NotFoundHandler, RequestHandler};
use crate::message::{ReceiveResponse, StreamingRequest};
use crate::payload::{PayloadReceiver, PayloadSender, SenderConfig};
use crate::transport::{
    accept_pipe_pair, connect_pipe_pair, websocket, BoxFuture, TransportReceiver, TransportSender,
};

/// Default maximum reconnect attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default delay before the first reconnect attempt.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Default upper bound on the reconnect delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Receive and send halves of one connection.
pub type TransportPair = (Box<dyn TransportReceiver>, Box<dyn TransportSender>);

fn boxed<R: TransportReceiver, S: TransportSender>(receiver: R, sender: S) -> TransportPair {
    (Box::new(receiver), Box::new(sender))
}

/// Opens transport pairs, once initially and again on every reconnect.
pub trait Connector: Send + Sync + 'static {
    /// Establish a new connection.
    fn connect(&self) -> BoxFuture<'_, Result<TransportPair>>;
}

/// Named pipe client: connects to a server bound under `base_name`.
#[derive(Debug, Clone)]
pub struct PipeClientConnector {
    base_name: String,
}

impl PipeClientConnector {
    /// Connect to the pipes named after `base_name`.
    pub fn new(base_name: impl Into<String>) -> Self {
        Self {
            base_name: base_name.into(),
        }
    }
}

impl Connector for PipeClientConnector {
    fn connect(&self) -> BoxFuture<'_, Result<TransportPair>> {
        Box::pin(async move {
            let (receiver, sender) = connect_pipe_pair(&self.base_name).await?;
            Ok(boxed(receiver, sender))
        })
    }
}

/// Named pipe server: binds under `base_name` and waits for a client.
#[derive(Debug, Clone)]
pub struct PipeServerConnector {
    base_name: String,
}

impl PipeServerConnector {
    /// Serve the pipes named after `base_name`.
    pub fn new(base_name: impl Into<String>) -> Self {
        Self {
            base_name: base_name.into(),
        }
    }
}

impl Connector for PipeServerConnector {
    fn connect(&self) -> BoxFuture<'_, Result<TransportPair>> {
        Box::pin(async move {
            let (receiver, sender) = accept_pipe_pair(&self.base_name).await?;
            Ok(boxed(receiver, sender))
        })
    }
}

/// WebSocket client.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Connect to `url` (`ws://` or `wss://`).
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self) -> BoxFuture<'_, Result<TransportPair>> {
        Box::pin(async move {
            let (receiver, sender) = websocket::connect(&self.url).await?;
            Ok(boxed(receiver, sender))
        })
    }
}

/// An already established connection, handed out once.
///
/// Used for accepted WebSocket connections and in-process transports.
/// Reconnecting is not possible.
pub struct EstablishedConnector {
    pair: Mutex<Option<TransportPair>>,
}

impl EstablishedConnector {
    /// Wrap an established connection.
    pub fn new<R: TransportReceiver, S: TransportSender>(receiver: R, sender: S) -> Self {
        Self {
            pair: Mutex::new(Some(boxed(receiver, sender))),
        }
    }
}

impl Connector for EstablishedConnector {
    fn connect(&self) -> BoxFuture<'_, Result<TransportPair>> {
        let pair = self.pair.lock().take();
        Box::pin(async move { pair.ok_or(StreamingError::NotConnected) })
    }
}

/// Bounded exponential backoff for reconnecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the first attempt.
    pub initial_backoff: Duration,
    /// Upper bound on the delay.
    pub max_backoff: Duration,
}

impl ReconnectPolicy {
    /// Delay before attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

/// Lifecycle state of an endpoint's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Opening the first connection.
    Connecting,
    /// Transport attached.
    Connected,
    /// Transport lost; not reconnecting.
    Disconnected,
    /// Transport lost; reconnect attempts running.
    Reconnecting,
    /// Shut down, for good.
    Closed,
}

/// Builder for configuring and creating a streaming endpoint.
pub struct EndpointBuilder {
    handler: Arc<dyn RequestHandler>,
    auto_reconnect: bool,
    reconnect_policy: ReconnectPolicy,
    request_timeout: Option<Duration>,
    sender_config: SenderConfig,
}

impl EndpointBuilder {
    /// Create a new endpoint builder.
    pub fn new() -> Self {
        Self {
            handler: Arc::new(NotFoundHandler),
            auto_reconnect: false,
            reconnect_policy: ReconnectPolicy::default(),
            request_timeout: None,
            sender_config: SenderConfig::default(),
        }
    }

    /// Set the handler for incoming requests.
    ///
    /// Default: answer everything with `404`.
    pub fn handler<H: RequestHandler>(mut self, handler: H) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Reconnect after the transport is lost.
    ///
    /// Default: false
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the reconnect attempts and backoff.
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    /// Fail requests not answered within `timeout`.
    ///
    /// Default: wait until the connection drops
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.sender_config.channel_capacity = capacity;
        self
    }

    /// Open the first connection and start supervising it.
    pub async fn connect<C: Connector>(self, connector: C) -> Result<StreamingEndpoint> {
        StreamingEndpoint::start(self, Arc::new(connector)).await
    }
}

impl Default for EndpointBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Sender,
    Receiver,
}

#[derive(Debug)]
struct DisconnectEvent {
    origin: Origin,
    generation: u64,
    reason: Option<String>,
}

/// Shared between the endpoint handle and its supervisor task.
struct Shared {
    adapter: ProtocolAdapter,
    connector: Arc<dyn Connector>,
    state: watch::Sender<ConnectionState>,
    shutdown: Notify,
    auto_reconnect: bool,
    policy: ReconnectPolicy,
}

impl Shared {
    fn attach(&self, (receiver, sender): TransportPair) -> Result<()> {
        self.adapter.sender().connect(sender)?;
        self.adapter.receiver().connect(receiver)?;
        self.state.send_replace(ConnectionState::Connected);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.state.borrow() == ConnectionState::Closed
    }

    fn teardown(&self, reason: &str) {
        self.adapter.sender().disconnect(Some(reason.to_string()));
        self.adapter.receiver().disconnect(Some(reason.to_string()));
        self.adapter.handle_disconnect(reason);
    }

    fn is_current(&self, event: &DisconnectEvent) -> bool {
        let generation = match event.origin {
            Origin::Sender => self.adapter.sender().generation(),
            Origin::Receiver => self.adapter.receiver().generation(),
        };
        event.generation == generation
    }
}

/// A supervised streaming connection.
///
/// Use `send()` to issue requests; incoming requests go to the handler.
/// Dropping the endpoint disconnects it.
pub struct StreamingEndpoint {
    shared: Arc<Shared>,
    state_rx: watch::Receiver<ConnectionState>,
    _supervisor: JoinHandle<()>,
}

impl StreamingEndpoint {
    /// Create a new endpoint builder.
    pub fn builder() -> EndpointBuilder {
        EndpointBuilder::new()
    }

    async fn start(builder: EndpointBuilder, connector: Arc<dyn Connector>) -> Result<Self> {
        let sender = PayloadSender::new(builder.sender_config);
        let receiver = PayloadReceiver::new();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let tx = events_tx.clone();
        sender.on_disconnected(move |event| {
            let _ = tx.send(DisconnectEvent {
                origin: Origin::Sender,
                generation: event.generation,
                reason: event.reason.clone(),
            });
        });
        receiver.on_disconnected(move |event| {
            let _ = events_tx.send(DisconnectEvent {
                origin: Origin::Receiver,
                generation: event.generation,
                reason: event.reason.clone(),
            });
        });

        let adapter = ProtocolAdapter::new(builder.handler, sender, receiver, builder.request_timeout);
        let (state, state_rx) = watch::channel(ConnectionState::Connecting);

        let shared = Arc::new(Shared {
            adapter,
            connector,
            state,
            shutdown: Notify::new(),
            auto_reconnect: builder.auto_reconnect,
            policy: builder.reconnect_policy,
        });

        let pair = shared.connector.connect().await?;
        shared.attach(pair)?;

        let supervisor = tokio::spawn(supervise(shared.clone(), events_rx));

        Ok(Self {
            shared,
            state_rx,
            _supervisor: supervisor,
        })
    }

    /// Send a request and wait for its response.
    pub async fn send(&self, request: &StreamingRequest) -> Result<ReceiveResponse> {
        self.shared.adapter.send_request(request).await
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Check if a transport is attached.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Wait until the connection reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<()> {
        let mut state_rx = self.state_rx.clone();
        state_rx
            .wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| StreamingError::ConnectionClosed)
    }

    /// Number of requests waiting for a response.
    pub fn pending_request_count(&self) -> usize {
        self.shared.adapter.request_manager().pending_request_count()
    }

    /// The protocol adapter driving this endpoint.
    pub fn adapter(&self) -> &ProtocolAdapter {
        &self.shared.adapter
    }

    /// Close the connection for good.
    ///
    /// Pending requests fail with `Disconnected`. No-op once closed.
    pub fn disconnect(&self) {
        if self.shared.state.send_replace(ConnectionState::Closed) == ConnectionState::Closed {
            return;
        }
        self.shared.shutdown.notify_one();
        self.shared.teardown("endpoint closed");
    }
}

impl Drop for StreamingEndpoint {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Supervisor loop - reacts to disconnect events.
async fn supervise(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<DisconnectEvent>) {
    loop {
        let event = tokio::select! {
            _ = shared.shutdown.notified() => break,
            event = events.recv() => match event {
                Some(e) => e,
                None => break,
            },
        };

        // Events from a connection already torn down, or echoes of our own
        // teardown, change nothing.
        if *shared.state.borrow() != ConnectionState::Connected || !shared.is_current(&event) {
            continue;
        }

        let reason = event
            .reason
            .unwrap_or_else(|| "transport disconnected".to_string());
        tracing::warn!("Connection lost: {}", reason);
        shared.teardown(&reason);
        shared.state.send_replace(ConnectionState::Disconnected);

        if !shared.auto_reconnect {
            continue;
        }

        shared.state.send_replace(ConnectionState::Reconnecting);
        match reconnect(&shared).await {
            Ok(Some(pair)) => {
                if let Err(e) = shared.attach(pair) {
                    tracing::error!("Failed to attach reconnected transport: {}", e);
                    shared.state.send_replace(ConnectionState::Closed);
                    break;
                }
                tracing::debug!("Reconnected");
            }
            Ok(None) => break,
            Err(e) => {
                tracing::error!("{}", e);
                shared.state.send_replace(ConnectionState::Closed);
                break;
            }
        }
    }
}

/// Try to reconnect under the policy.
///
/// Returns `Ok(None)` if the endpoint was closed meanwhile.
async fn reconnect(shared: &Shared) -> Result<Option<TransportPair>> {
    let policy = &shared.policy;
    for attempt in 1..=policy.max_attempts {
        tokio::select! {
            _ = shared.shutdown.notified() => return Ok(None),
            _ = tokio::time::sleep(policy.backoff(attempt)) => {}
        }
        if shared.is_closed() {
            return Ok(None);
        }

        tracing::debug!("Reconnect attempt {}/{}", attempt, policy.max_attempts);
        match shared.connector.connect().await {
            Ok(pair) if shared.is_closed() => {
                drop(pair);
                return Ok(None);
            }
            Ok(pair) => return Ok(Some(pair)),
            Err(e) => tracing::warn!("Reconnect attempt {} failed: {}", attempt, e),
        }
    }

    Err(StreamingError::ReconnectFailed {
        attempts: policy.max_attempts,
    })
}
