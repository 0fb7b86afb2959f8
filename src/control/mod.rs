//! Control plane - reserved message types and the readiness handshake.
//!
//! Four type names are reserved by the protocol and may not be used by
//! domain handlers:
//!
//! | Type | Direction | Meaning |
//! |---|---|---|
//! | `__ready__` | surface → host | surface loaded, sent once per lifetime |
//! | `__response__` | both | reply to a request (`isResponse`) |
//! | `__ack__` | both | receipt for a fire-and-forget message |
//! | `__timeout_hint__` | host → surface | advisory: the handler may be slow |
//!
//! Every inbound message is classified into a [`MessageKind`] before routing.
//!
//! # Example
//!
//! ```
//! use panel_bridge::control::MessageKind;
//! use panel_bridge::protocol::Message;
//!
//! let msg = Message::request("get-projects", None);
//! assert_eq!(MessageKind::of(&msg), MessageKind::Domain("get-projects"));
//! assert_eq!(MessageKind::of(&Message::ready()), MessageKind::Ready);
//! ```

mod handshake;

pub use handshake::{HandshakeGate, HandshakeState};

use crate::error::{BridgeError, Result};
use crate::protocol::Message;

/// Readiness signal sent by the surface.
pub const READY_TYPE: &str = "__ready__";

/// Generic response wrapper.
pub const RESPONSE_TYPE: &str = "__response__";

/// Acknowledgment of a fire-and-forget message.
pub const ACK_TYPE: &str = "__ack__";

/// Advisory slow-handler hint.
pub const TIMEOUT_HINT_TYPE: &str = "__timeout_hint__";

/// All reserved type names.
pub const RESERVED_TYPES: [&str; 4] = [READY_TYPE, RESPONSE_TYPE, ACK_TYPE, TIMEOUT_HINT_TYPE];

/// Whether `message_type` is one of the protocol's own control types.
#[inline]
pub fn is_reserved(message_type: &str) -> bool {
    RESERVED_TYPES.contains(&message_type)
}

/// Reject empty and reserved types where a domain type is required.
pub fn validate_domain_type(message_type: &str) -> Result<()> {
    if message_type.is_empty() || is_reserved(message_type) {
        return Err(BridgeError::InvalidMessageType(message_type.to_string()));
    }
    Ok(())
}

/// Routing class of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind<'a> {
    /// Surface readiness signal.
    Ready,
    /// Reply to one of our pending requests.
    Response,
    /// Receipt for something we sent fire-and-forget.
    Ack,
    /// Advisory hint (only meaningful host → surface).
    TimeoutHint,
    /// Domain message to dispatch through the registry.
    Domain(&'a str),
}

impl<'a> MessageKind<'a> {
    /// Classify a message.
    ///
    /// Precedence: readiness type, then `isResponse`, then the remaining
    /// reserved types, then domain.
    pub fn of(message: &'a Message) -> Self {
        match message.message_type.as_str() {
            READY_TYPE => MessageKind::Ready,
            _ if message.is_response => MessageKind::Response,
            RESPONSE_TYPE => MessageKind::Response,
            ACK_TYPE => MessageKind::Ack,
            TIMEOUT_HINT_TYPE => MessageKind::TimeoutHint,
            other => MessageKind::Domain(other),
        }
    }
}
