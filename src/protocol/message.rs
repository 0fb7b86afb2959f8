//! The message exchanged between host and surface.
//!
//! Wire shape (JSON, camelCase):
//!
//! ```text
//! { "id": "…", "type": "get-projects", "payload": {…}, "timestamp": 1700000000000,
//!   "isResponse": true, "responseToId": "…", "error": "…", "expectsResponse": true }
//! ```
//!
//! Optional fields are omitted when unset and default when absent, so a
//! surface may send the minimal `{ "id": "…", "type": "…" }`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::control::{ACK_TYPE, READY_TYPE, RESPONSE_TYPE, TIMEOUT_HINT_TYPE};

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique id chosen by the originating side.
    pub id: String,
    /// Domain type or one of the reserved control types.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Arbitrary serializable payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Producer wall clock in milliseconds. Informational only.
    #[serde(default)]
    pub timestamp: u64,
    /// Set on replies to a request.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_response: bool,
    /// Id of the message being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_to_id: Option<String>,
    /// Failure text, only on failed responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set by a sender that wants a typed response.
    #[serde(default, skip_serializing_if = "is_false")]
    pub expects_response: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Generate a fresh message id.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current wall clock in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// `Value::Null` is treated as "no payload".
fn normalize(payload: Option<Value>) -> Option<Value> {
    payload.filter(|v| !v.is_null())
}

impl Message {
    /// Create a fire-and-forget message with a fresh id.
    pub fn new(message_type: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            id: generate_id(),
            message_type: message_type.into(),
            payload: normalize(payload),
            timestamp: now_millis(),
            is_response: false,
            response_to_id: None,
            error: None,
            expects_response: false,
        }
    }

    /// Create a request that asks the peer for a typed response.
    pub fn request(message_type: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            expects_response: true,
            ..Self::new(message_type, payload)
        }
    }

    /// The readiness signal a surface sends once it has loaded.
    pub fn ready() -> Self {
        Self::new(READY_TYPE, None)
    }

    /// Successful response to `request_id`.
    pub fn response(request_id: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            is_response: true,
            response_to_id: Some(request_id.into()),
            ..Self::new(RESPONSE_TYPE, payload)
        }
    }

    /// Failed response to `request_id`.
    pub fn error_response(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::response(request_id, None)
        }
    }

    /// Receipt for a fire-and-forget message.
    pub fn ack(message_id: impl Into<String>) -> Self {
        Self {
            response_to_id: Some(message_id.into()),
            ..Self::new(ACK_TYPE, None)
        }
    }

    /// Advisory hint that the handler for `inbound` may be slow.
    pub fn timeout_hint(inbound: &Message) -> Self {
        let payload = serde_json::json!({
            "messageType": inbound.message_type,
            "messageId": inbound.id,
        });
        Self::new(TIMEOUT_HINT_TYPE, Some(payload))
    }

    /// Consume the response and turn it into the caller's result.
    ///
    /// `error` wins over `payload`; a missing payload becomes `Value::Null`.
    pub fn into_outcome(self) -> std::result::Result<Value, String> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.payload.unwrap_or(Value::Null)),
        }
    }
}
