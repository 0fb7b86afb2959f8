//! Handler module - inbound message handling and dispatch.
//!
//! Provides:
//! - [`HandlerRegistry`] - maps message types to handlers and their options
//! - [`RequestContext`] - lets a running handler send messages to the surface
//!
//! # Example
//!
//! ```ignore
//! use panel_bridge::handler::{HandlerOptions, HandlerRegistry, RequestContext};
//!
//! let registry = HandlerRegistry::new();
//!
//! // Plain request/response handler
//! registry.register("echo", |data: String, _ctx| async move {
//!     Ok::<_, BridgeError>(data)
//! }, HandlerOptions::default())?;
//!
//! // Handler that streams progress while it runs
//! registry.register("build", |project: String, ctx: RequestContext| async move {
//!     ctx.send("build-progress", &50)?;
//!     Ok::<_, BridgeError>(format!("{project} built"))
//! }, HandlerOptions::with_progress())?;
//! ```

mod context;
mod registry;

pub use context::RequestContext;
pub use registry::{BoxFuture, Handler, HandlerOptions, HandlerRegistry, HandlerResult, TypedHandler};
