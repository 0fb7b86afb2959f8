//! Communication manager: handshake, correlated requests and inbound dispatch.
//!
//! A [`CommunicationManager`] is bound to one surface through a
//! [`Transport`]. Its lifecycle:
//! 1. Subscribe to the transport and start the inbound loop
//! 2. Wait for the surface's readiness signal ([`initialize`](CommunicationManager::initialize))
//! 3. Issue requests / fire-and-forget messages, serve inbound messages
//!    through the [`HandlerRegistry`]
//!
//! Inbound routing, in order:
//! - readiness signal → handshake (repeats ignored)
//! - `isResponse` → matching pending request, or dropped if none matches
//! - other control types → logged, never dispatched
//! - domain message → registry; reply with a response when
//!   `expectsResponse`, otherwise with an acknowledgment
//!
//! # Example
//!
//! ```ignore
//! use panel_bridge::{CommunicationManager, BridgeError};
//! use panel_bridge::transport::StreamTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), BridgeError> {
//!     let manager = CommunicationManager::builder()
//!         .message_timeout(std::time::Duration::from_secs(5))
//!         .handle("get-projects", |_: (), _ctx| async {
//!             Ok::<_, BridgeError>(vec!["alpha", "beta"])
//!         })
//!         .build(StreamTransport::stdio())?;
//!
//!     manager.initialize().await?;
//!     let theme = manager.request("get-theme", ()).await?;
//!     manager.send("status", &"connected")?;
//!     Ok(())
//! }
//! ```

mod config;
mod pending;

pub use config::{ManagerConfig, DEFAULT_MESSAGE_TIMEOUT};
pub use pending::ResponseHandle;

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::codec::JsonCodec;
use crate::control::{validate_domain_type, HandshakeGate, HandshakeState, MessageKind};
use crate::error::{BridgeError, Result};
use crate::handler::{HandlerOptions, HandlerRegistry, RequestContext};
use crate::protocol::Message;
use crate::transport::{Inbound, Transport};
use pending::PendingTable;

/// Builder for configuring and creating a [`CommunicationManager`].
///
/// Registration errors (empty or reserved types) are reported by `build()`.
pub struct ManagerBuilder {
    registry: HandlerRegistry,
    config: ManagerConfig,
    error: Option<BridgeError>,
}

impl ManagerBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            config: ManagerConfig::default(),
            error: None,
        }
    }

    fn record(mut self, result: Result<()>) -> Self {
        if let Err(e) = result {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Register a handler for inbound messages of `message_type`.
    pub fn handle<F, T, R, E, Fut>(self, message_type: &str, handler: F) -> Self
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        let result = self
            .registry
            .register(message_type, handler, HandlerOptions::default());
        self.record(result)
    }

    /// Register a handler that streams progress. Requests for this type get
    /// a timeout hint before the handler runs.
    pub fn handle_with_progress<F, T, R, E, Fut>(self, message_type: &str, handler: F) -> Self
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        let result = self
            .registry
            .register(message_type, handler, HandlerOptions::with_progress());
        self.record(result)
    }

    /// Register a handler that only serves the first matching message.
    pub fn handle_once<F, T, R, E, Fut>(self, message_type: &str, handler: F) -> Self
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        let result = self
            .registry
            .register_once(message_type, handler, HandlerOptions::default());
        self.record(result)
    }

    /// Set how long requests wait for a response.
    ///
    /// Default: 30 seconds
    pub fn message_timeout(mut self, timeout: Duration) -> Self {
        self.config.message_timeout = timeout;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Bind the manager to `transport` and start its inbound loop.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build<T: Transport>(self, transport: T) -> Result<CommunicationManager> {
        if let Some(e) = self.error {
            return Err(e);
        }
        CommunicationManager::start(Arc::new(transport), self.registry, self.config)
    }
}

impl Default for ManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Host-side protocol engine for one surface.
///
/// Cheap to clone; clones share state. The inbound loop stops when the last
/// clone is dropped, when [`close`](Self::close) is called, or when the
/// transport's inbound stream ends.
///
/// Handlers that call back into the manager should capture a
/// [`WeakManager`] from [`downgrade`](Self::downgrade): a strong clone held
/// by a registered handler keeps the manager alive until it is unregistered.
#[derive(Clone)]
pub struct CommunicationManager {
    inner: Arc<Inner>,
}

/// Non-owning handle to a [`CommunicationManager`].
#[derive(Clone)]
pub struct WeakManager {
    inner: Weak<Inner>,
}

impl WeakManager {
    /// The manager, if any strong handle is still alive.
    pub fn upgrade(&self) -> Option<CommunicationManager> {
        self.inner.upgrade().map(|inner| CommunicationManager { inner })
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    registry: HandlerRegistry,
    config: ManagerConfig,
    handshake: HandshakeGate,
    pending: PendingTable,
    closed: watch::Sender<bool>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl CommunicationManager {
    /// Create a new manager builder.
    pub fn builder() -> ManagerBuilder {
        ManagerBuilder::new()
    }

    /// Bind a manager with no handlers to `transport`.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new<T: Transport>(transport: T, config: ManagerConfig) -> Result<Self> {
        Self::start(Arc::new(transport), HandlerRegistry::new(), config)
    }

    fn start(
        transport: Arc<dyn Transport>,
        registry: HandlerRegistry,
        config: ManagerConfig,
    ) -> Result<Self> {
        let inbound = transport.subscribe()?;
        let (closed, _) = watch::channel(false);

        let inner = Arc::new(Inner {
            transport,
            registry,
            config,
            handshake: HandshakeGate::new(),
            pending: PendingTable::default(),
            closed,
            loop_task: Mutex::new(None),
        });

        let task = tokio::spawn(read_loop(Arc::downgrade(&inner), inbound));
        *inner.loop_task.lock() = Some(task);

        Ok(Self { inner })
    }

    /// A handle that does not keep the manager alive.
    pub fn downgrade(&self) -> WeakManager {
        WeakManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Wait for the surface's readiness signal.
    ///
    /// Safe to call concurrently and repeatedly; every caller resolves off the
    /// same transition. Fails with `ConnectionClosed` if the surface goes away
    /// first.
    pub async fn initialize(&self) -> Result<()> {
        let mut closed = self.inner.closed.subscribe();
        tokio::select! {
            biased;
            _ = self.inner.handshake.wait_ready() => Ok(()),
            _ = wait_closed(&mut closed) => Err(BridgeError::ConnectionClosed),
        }
    }

    /// Whether the handshake has completed.
    pub fn is_ready(&self) -> bool {
        self.inner.handshake.is_ready()
    }

    /// Current handshake state.
    pub fn handshake_state(&self) -> HandshakeState {
        self.inner.handshake.state()
    }

    /// Send a request and get a handle to its response.
    ///
    /// The message is written and the timeout armed before this returns.
    /// Before the handshake the handle fails with `NotReady` and nothing is
    /// written.
    pub fn request<P: Serialize>(&self, message_type: &str, payload: P) -> ResponseHandle {
        match JsonCodec::to_payload(&payload) {
            Ok(payload) => self.request_value(message_type, payload),
            Err(e) => ResponseHandle::failed(e),
        }
    }

    /// [`request`](Self::request) with an already-built JSON payload.
    pub fn request_value(&self, message_type: &str, payload: Option<Value>) -> ResponseHandle {
        if let Err(e) = validate_domain_type(message_type) {
            return ResponseHandle::failed(e);
        }
        let message = Message::request(message_type, payload);
        let id = message.id.clone();

        // Register before writing so an immediate response finds its entry.
        // The state checks run under the table lock so a concurrent reset or
        // close either refuses this request or fails it.
        let inner = &self.inner;
        let admitted = inner.pending.insert_if(
            &id,
            message_type,
            inner.config.message_timeout,
            || {
                if *inner.closed.borrow() {
                    Err(BridgeError::ConnectionClosed)
                } else if !inner.handshake.is_ready() {
                    Err(BridgeError::NotReady)
                } else {
                    Ok(())
                }
            },
        );
        let rx = match admitted {
            Ok(rx) => rx,
            Err(e) => return ResponseHandle::failed(e),
        };

        if let Err(e) = self.inner.transport.send(message) {
            self.inner.pending.cancel(&id);
            return ResponseHandle::failed(e);
        }

        tracing::trace!(message_id = %id, message_type, "request sent");
        ResponseHandle::waiting(id, rx)
    }

    /// Send a request and deserialize the response payload.
    pub async fn request_as<T, P>(&self, message_type: &str, payload: P) -> Result<T>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        let value = self.request(message_type, payload).await?;
        JsonCodec::from_payload(value)
    }

    /// Send a fire-and-forget message.
    ///
    /// Not gated on the handshake; the only failures are an invalid type,
    /// an unserializable payload, or the transport refusing the write.
    pub fn send<P: Serialize>(&self, message_type: &str, payload: P) -> Result<()> {
        validate_domain_type(message_type)?;
        let payload = JsonCodec::to_payload(&payload)?;
        self.inner.transport.send(Message::new(message_type, payload))
    }

    /// Register a handler. Replaces any existing handler for the type.
    pub fn on<F, T, R, E, Fut>(&self, message_type: &str, handler: F) -> Result<()>
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        self.inner
            .registry
            .register(message_type, handler, HandlerOptions::default())
    }

    /// Register a handler with explicit options.
    pub fn on_with<F, T, R, E, Fut>(
        &self,
        message_type: &str,
        handler: F,
        options: HandlerOptions,
    ) -> Result<()>
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        self.inner.registry.register(message_type, handler, options)
    }

    /// Register a handler that only serves the first matching message.
    pub fn once<F, T, R, E, Fut>(&self, message_type: &str, handler: F) -> Result<()>
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        self.inner
            .registry
            .register_once(message_type, handler, HandlerOptions::default())
    }

    /// Register a one-shot handler with explicit options.
    pub fn once_with<F, T, R, E, Fut>(
        &self,
        message_type: &str,
        handler: F,
        options: HandlerOptions,
    ) -> Result<()>
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        self.inner
            .registry
            .register_once(message_type, handler, options)
    }

    /// Remove the handler for `message_type`.
    pub fn off(&self, message_type: &str) -> bool {
        self.inner.registry.unregister(message_type)
    }

    /// The handler registry.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    /// The active configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Return to `AwaitingHandshake` for a recreated surface.
    ///
    /// Every pending request fails with `HandshakeReset`. Returns how many
    /// were failed.
    pub fn reinitialize(&self) -> usize {
        let handshake = &self.inner.handshake;
        self.inner.pending.fail_all_after(
            || {
                if handshake.reset() {
                    tracing::info!("handshake reset, awaiting surface");
                }
            },
            || BridgeError::HandshakeReset,
        )
    }

    /// Stop the inbound loop and fail every pending request with
    /// `ConnectionClosed`.
    pub fn close(&self) {
        if let Some(task) = self.inner.loop_task.lock().take() {
            task.abort();
        }
        self.inner.shut_down();
    }

    /// Whether the manager has stopped serving its surface.
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Resolve once the manager has stopped serving its surface.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        wait_closed(&mut rx).await;
    }
}

impl Inner {
    fn shut_down(&self) {
        let failed = self.pending.fail_all_after(
            || {
                self.closed.send_replace(true);
            },
            || BridgeError::ConnectionClosed,
        );
        if failed > 0 {
            tracing::debug!(failed, "pending requests failed on close");
        }
    }

    fn route(self: &Arc<Self>, message: Message) {
        match MessageKind::of(&message) {
            MessageKind::Ready => {
                if self.handshake.mark_ready() {
                    tracing::info!("surface ready");
                } else {
                    tracing::debug!("duplicate ready signal ignored");
                }
            }
            MessageKind::Response => self.settle(message),
            MessageKind::Ack => {
                tracing::trace!(response_to_id = ?message.response_to_id, "ack received");
            }
            MessageKind::TimeoutHint => {
                tracing::debug!(message_id = %message.id, "ignoring inbound timeout hint");
            }
            MessageKind::Domain(_) => {
                tokio::spawn(self.clone().serve(message));
            }
        }
    }

    fn settle(&self, message: Message) {
        let Some(request_id) = message.response_to_id.clone() else {
            tracing::debug!(message_id = %message.id, "response without responseToId dropped");
            return;
        };

        let outcome = message.into_outcome().map_err(BridgeError::HandlerFailure);
        if !self.pending.settle(&request_id, outcome) {
            tracing::debug!(response_to_id = %request_id, "dropping unmatched response");
        }
    }

    /// Run the handler for one inbound domain message and reply.
    async fn serve(self: Arc<Self>, message: Message) {
        let message_type = message.message_type.as_str();
        let ctx = RequestContext::for_message(&message, self.transport.clone());
        let payload = message.payload.clone().unwrap_or(Value::Null);

        if !message.expects_response {
            if let Err(e) = self.registry.dispatch(message_type, payload, ctx).await {
                tracing::warn!(message_type, message_id = %message.id, error = %e, "fire-and-forget handler failed");
            }
            if let Err(e) = self.transport.send(Message::ack(&message.id)) {
                tracing::debug!(message_id = %message.id, error = %e, "ack not delivered");
            }
            return;
        }

        if self.registry.needs_progress(message_type) {
            if let Err(e) = self.transport.send(Message::timeout_hint(&message)) {
                tracing::debug!(message_type, error = %e, "timeout hint not delivered");
            }
        }

        let reply = match self.registry.dispatch(message_type, payload, ctx).await {
            Ok(value) => Message::response(&message.id, Some(value)),
            Err(e) => {
                tracing::debug!(message_type, message_id = %message.id, error = %e, "handler failed");
                Message::error_response(&message.id, e.to_string())
            }
        };

        if let Err(e) = self.transport.send(reply) {
            tracing::warn!(message_type, message_id = %message.id, error = %e, "response not delivered");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.loop_task.get_mut().take() {
            task.abort();
        }
    }
}

async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    // The sender lives as long as the manager, so an error cannot occur here.
    let _ = rx.wait_for(|closed| *closed).await;
}

/// Main inbound loop - classifies each message and routes it.
///
/// Holds only a weak reference so dropping every manager handle stops it.
async fn read_loop(inner: Weak<Inner>, mut inbound: Inbound) {
    while let Some(message) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.route(message);
    }

    tracing::debug!("surface inbound stream ended");
    if let Some(inner) = inner.upgrade() {
        inner.shut_down();
    }
}
