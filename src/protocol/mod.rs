//! Protocol module - the message unit and its wire shape.
//!
//! - [`Message`] - one host/surface message with correlation fields
//! - [`generate_id`] - fresh correlation ids

mod message;

pub use message::{generate_id, now_millis, Message};
