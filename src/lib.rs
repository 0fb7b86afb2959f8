//! # panel-bridge
//!
//! Host-side message protocol for sandboxed UI surfaces (webview panels and
//! similar isolated views) that talk to their host only by exchanging
//! JSON-like messages.
//!
//! ## Architecture
//!
//! - **Transport**: sends messages to one surface and yields its inbound stream
//! - **Handshake**: requests are gated until the surface sends `__ready__`
//! - **Requests**: every request gets a unique id, a timeout, and exactly
//!   one outcome (response, surface error, or timeout)
//! - **Handlers**: inbound messages are dispatched by type through a
//!   [`HandlerRegistry`](handler::HandlerRegistry)
//!
//! ## Example
//!
//! ```ignore
//! use panel_bridge::{BridgeError, CommunicationManager};
//! use panel_bridge::transport::memory_pair;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), BridgeError> {
//!     let (host, surface) = memory_pair();
//!
//!     let manager = CommunicationManager::builder()
//!         .handle("echo", |data: serde_json::Value, _ctx| async move {
//!             Ok::<_, BridgeError>(data)
//!         })
//!         .build(host)?;
//!
//!     // ... hand `surface` to the webview glue ...
//!     manager.initialize().await?;
//!     let theme = manager.request("get-theme", ()).await?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod control;
pub mod error;
pub mod handler;
pub mod manager;
pub mod protocol;
pub mod transport;

mod writer;

pub use control::HandshakeState;
pub use error::{BridgeError, Result};
pub use handler::{HandlerOptions, RequestContext};
pub use manager::{CommunicationManager, ManagerBuilder, ManagerConfig, ResponseHandle, WeakManager};
pub use protocol::Message;
pub use writer::WriterConfig;
