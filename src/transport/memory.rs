//! In-process transport pair.
//!
//! [`memory_pair`] returns the host side ([`MemoryTransport`], handed to the
//! manager) and the surface side ([`SurfaceEndpoint`]). An embedder glues the
//! endpoint to its webview's `postMessage`/`onMessage` API; tests use it to
//! play the surface directly.
//!
//! # Example
//!
//! ```
//! use panel_bridge::transport::{memory_pair, Transport};
//! use panel_bridge::protocol::Message;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (host, mut surface) = memory_pair();
//! host.send(Message::new("hello", None)).unwrap();
//! assert_eq!(surface.recv().await.unwrap().message_type, "hello");
//! # }
//! ```

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{Inbound, Transport};
use crate::error::{BridgeError, Result};
use crate::protocol::Message;

/// Create a connected host/surface pair.
pub fn memory_pair() -> (MemoryTransport, SurfaceEndpoint) {
    let (to_surface, from_host) = mpsc::unbounded_channel();
    let (to_host, from_surface) = mpsc::unbounded_channel();

    let transport = MemoryTransport {
        to_surface,
        inbound: Mutex::new(Some(from_surface)),
    };
    let endpoint = SurfaceEndpoint { to_host, from_host };

    (transport, endpoint)
}

/// Host side of an in-process channel.
pub struct MemoryTransport {
    to_surface: mpsc::UnboundedSender<Message>,
    inbound: Mutex<Option<Inbound>>,
}

impl Transport for MemoryTransport {
    fn send(&self, message: Message) -> Result<()> {
        self.to_surface
            .send(message)
            .map_err(|_| BridgeError::ConnectionClosed)
    }

    fn subscribe(&self) -> Result<Inbound> {
        self.inbound.lock().take().ok_or(BridgeError::AlreadySubscribed)
    }
}

/// Surface side of an in-process channel.
///
/// Dropping the endpoint ends the host's inbound stream, which the manager
/// treats as the surface being torn down.
pub struct SurfaceEndpoint {
    to_host: mpsc::UnboundedSender<Message>,
    from_host: mpsc::UnboundedReceiver<Message>,
}

impl SurfaceEndpoint {
    /// Deliver a message to the host.
    pub fn send(&self, message: Message) -> Result<()> {
        self.to_host
            .send(message)
            .map_err(|_| BridgeError::ConnectionClosed)
    }

    /// Send the readiness signal.
    pub fn signal_ready(&self) -> Result<()> {
        self.send(Message::ready())
    }

    /// Answer `request` with a payload.
    pub fn respond(&self, request: &Message, payload: Value) -> Result<()> {
        self.send(Message::response(&request.id, Some(payload)))
    }

    /// Answer `request` with an error.
    pub fn fail(&self, request: &Message, error: &str) -> Result<()> {
        self.send(Message::error_response(&request.id, error))
    }

    /// Next message from the host, or `None` once the host side is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        self.from_host.recv().await
    }

    /// Next message from the host if one is already queued.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.from_host.try_recv().ok()
    }
}
