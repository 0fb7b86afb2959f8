//! JSON codec using `serde_json`.
//!
//! Messages on stream transports are encoded as one compact JSON object per
//! line. `serde_json` never emits a raw newline inside a compact document
//! (newlines in strings are escaped), so `\n` is a safe delimiter.
//!
//! # Example
//!
//! ```
//! use panel_bridge::codec::JsonCodec;
//! use panel_bridge::protocol::Message;
//!
//! let msg = Message::new("ping", None);
//! let line = JsonCodec::encode_line(&msg).unwrap();
//! assert_eq!(line.last(), Some(&b'\n'));
//!
//! let decoded = JsonCodec::decode(&line).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::protocol::Message;

/// JSON codec for messages and payloads.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a message as a single newline-terminated line.
    pub fn encode_line(message: &Message) -> Result<Vec<u8>> {
        let mut buf = serde_json::to_vec(message)?;
        buf.push(b'\n');
        Ok(buf)
    }

    /// Decode one message. Surrounding whitespace (including the line
    /// terminator) is ignored.
    pub fn decode(bytes: &[u8]) -> Result<Message> {
        Ok(serde_json::from_slice(bytes.trim_ascii())?)
    }

    /// Convert a typed value into an outbound payload.
    ///
    /// `()` and other values serializing to `null` become `None`.
    pub fn to_payload<T: Serialize>(value: &T) -> Result<Option<Value>> {
        let value = serde_json::to_value(value)?;
        Ok((!value.is_null()).then_some(value))
    }

    /// Convert an inbound payload into a typed value.
    #[inline]
    pub fn from_payload<T: DeserializeOwned>(value: Value) -> Result<T> {
        Ok(serde_json::from_value(value)?)
    }
}
