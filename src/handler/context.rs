//! Request context for handlers.
//!
//! Every handler invocation receives a [`RequestContext`] describing the
//! inbound message and giving the handler a way to talk back to the surface
//! while it runs:
//! - `send` - fire-and-forget domain message (progress updates, log lines, …)
//!
//! The handler's return value becomes the response; the context is only for
//! messages sent *in addition* to it.
//!
//! # Example
//!
//! ```ignore
//! async fn build(project: String, ctx: RequestContext) -> Result<Report, BridgeError> {
//!     for step in 0..3 {
//!         ctx.send("build-progress", &json!({ "step": step }))?;
//!     }
//!     Ok(Report::done(project))
//! }
//! ```

use std::sync::Arc;

use serde::Serialize;

use crate::codec::JsonCodec;
use crate::control::validate_domain_type;
use crate::error::Result;
use crate::protocol::Message;
use crate::transport::Transport;

/// Context passed to message handlers.
///
/// `Clone` and `Send`; a handler may move it into tasks it spawns.
#[derive(Clone)]
pub struct RequestContext {
    message_id: String,
    message_type: String,
    expects_response: bool,
    transport: Option<Arc<dyn Transport>>,
}

impl RequestContext {
    /// Create a context with no transport (sends become no-ops).
    pub fn new(message_type: &str, message_id: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            message_type: message_type.to_string(),
            expects_response: false,
            transport: None,
        }
    }

    /// Create the context for an inbound message.
    pub fn for_message(message: &Message, transport: Arc<dyn Transport>) -> Self {
        Self {
            message_id: message.id.clone(),
            message_type: message.message_type.clone(),
            expects_response: message.expects_response,
            transport: Some(transport),
        }
    }

    /// Id of the inbound message.
    #[inline]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Type of the inbound message.
    #[inline]
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Whether the sender is waiting for a typed response.
    #[inline]
    pub fn expects_response(&self) -> bool {
        self.expects_response
    }

    /// Send a fire-and-forget domain message to the surface.
    pub fn send<T: Serialize>(&self, message_type: &str, payload: &T) -> Result<()> {
        validate_domain_type(message_type)?;
        let payload = JsonCodec::to_payload(payload)?;

        match &self.transport {
            Some(transport) => transport.send(Message::new(message_type, payload)),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("message_id", &self.message_id)
            .field("message_type", &self.message_type)
            .field("expects_response", &self.expects_response)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::transport::memory_pair;
    use serde_json::json;

    #[test]
    fn test_context_creation() {
        let ctx = RequestContext::new("echo", "m-1");
        assert_eq!(ctx.message_type(), "echo");
        assert_eq!(ctx.message_id(), "m-1");
        assert!(!ctx.expects_response());
    }

    #[test]
    fn test_send_without_transport() {
        let ctx = RequestContext::new("echo", "m-1");
        assert!(ctx.send("progress", &json!({"pct": 10})).is_ok());
    }

    #[test]
    fn test_send_rejects_reserved_type() {
        let ctx = RequestContext::new("echo", "m-1");
        let result = ctx.send("__response__", &());
        assert!(matches!(result, Err(BridgeError::InvalidMessageType(_))));
    }

    #[tokio::test]
    async fn test_send_reaches_surface() {
        let (host, mut surface) = memory_pair();
        let inbound = Message::request("build", None);
        let ctx = RequestContext::for_message(&inbound, Arc::new(host));

        assert!(ctx.expects_response());
        ctx.send("build-progress", &json!({"pct": 50})).unwrap();

        let msg = surface.recv().await.unwrap();
        assert_eq!(msg.message_type, "build-progress");
        assert_eq!(msg.payload, Some(json!({"pct": 50})));
        assert!(!msg.expects_response);
    }

    #[test]
    fn test_context_is_clone() {
        let ctx = RequestContext::new("echo", "m-1");
        let ctx2 = ctx.clone();
        assert_eq!(ctx.message_id(), ctx2.message_id());
    }
}
