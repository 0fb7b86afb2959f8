//! Codec module - serialization of messages and payloads.
//!
//! - [`JsonCodec`] - `serde_json` encoding, one message per line on stream transports
//!
//! # Design
//!
//! Codecs are marker structs with static methods rather than trait objects.
//! The surface only understands JSON, so there is a single codec.

mod json;

pub use json::JsonCodec;
