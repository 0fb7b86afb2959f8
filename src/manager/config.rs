//! Manager configuration.
//!
//! The only tunable is the request timeout. It can be set through the
//! builder or loaded from JSON using the surface-facing option name:
//!
//! ```
//! use std::time::Duration;
//! use panel_bridge::ManagerConfig;
//!
//! let config = ManagerConfig::from_json(r#"{ "messageTimeout": 1000 }"#).unwrap();
//! assert_eq!(config.message_timeout, Duration::from_millis(1000));
//!
//! let defaults = ManagerConfig::from_json("{}").unwrap();
//! assert_eq!(defaults, ManagerConfig::default());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default time to wait for a response before failing a request.
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Configuration for a [`CommunicationManager`](super::CommunicationManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagerConfig {
    /// How long `request()` waits for a response. Milliseconds on the wire.
    #[serde(with = "millis")]
    pub message_timeout: Duration,
}

impl ManagerConfig {
    /// Parse a JSON configuration object. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the message timeout.
    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            message_timeout: DEFAULT_MESSAGE_TIMEOUT,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
