//! Transport module - the channel between host and surface.
//!
//! The manager only needs two things from a transport:
//! - **send**: hand a message to the channel without waiting for delivery
//! - **subscribe**: obtain the single stream of inbound messages
//!
//! Provided implementations:
//! - [`MemoryTransport`] / [`SurfaceEndpoint`] - in-process pair, used by
//!   embedders that bridge to a webview API and by tests
//! - [`StreamTransport`] - newline-delimited JSON over any async byte stream
//!   (stdio of a child process, a socket, …)

mod memory;
mod stream;

pub use memory::{memory_pair, MemoryTransport, SurfaceEndpoint};
pub use stream::StreamTransport;

use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::Message;

/// Receiving half of a transport subscription.
pub type Inbound = mpsc::UnboundedReceiver<Message>;

/// A message channel to exactly one surface instance.
pub trait Transport: Send + Sync + 'static {
    /// Hand `message` to the channel. Never waits for delivery.
    fn send(&self, message: Message) -> Result<()>;

    /// Take the inbound message stream. Only the first call succeeds;
    /// later calls fail with [`BridgeError::AlreadySubscribed`](crate::BridgeError::AlreadySubscribed).
    fn subscribe(&self) -> Result<Inbound>;
}
