//! Handler registry for dispatching inbound messages by type.
//!
//! The registry maps message-type names to handlers plus per-type metadata
//! (whether the handler streams progress). It knows nothing about transports
//! or replies: [`dispatch`](HandlerRegistry::dispatch) returns the handler's
//! result or failure unchanged and the caller decides what to send back.
//!
//! Registration takes `&self`, so feature modules can register against a
//! shared registry at any time. Re-registering a type replaces the previous
//! entry.
//!
//! # Example
//!
//! ```
//! use panel_bridge::handler::{HandlerOptions, HandlerRegistry};
//!
//! let registry = HandlerRegistry::new();
//!
//! registry
//!     .register("echo", |text: String, _ctx| async move { Ok::<_, String>(text) }, HandlerOptions::default())
//!     .unwrap();
//! registry
//!     .register("build", |_: (), _ctx| async { Ok::<_, String>("done") }, HandlerOptions::with_progress())
//!     .unwrap();
//!
//! assert!(registry.has("echo"));
//! assert!(registry.needs_progress("build"));
//! assert!(!registry.needs_progress("unknown"));
//! ```

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::RequestContext;
use crate::control::validate_domain_type;
use crate::error::{BridgeError, Result};

/// Result type for handler functions: the JSON reply payload.
pub type HandlerResult = Result<Value>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for handler functions.
pub trait Handler: Send + Sync + 'static {
    /// Handle a message with its raw JSON payload (`Value::Null` when absent).
    fn call(&self, payload: Value, ctx: RequestContext) -> BoxFuture<'static, HandlerResult>;
}

/// Wrapper that deserializes the payload before calling the handler and
/// serializes its output afterwards.
///
/// Any `Display` error returned by the handler becomes
/// [`BridgeError::HandlerFailure`] carrying exactly its message text.
pub struct TypedHandler<F, T, R, E, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    E: Display + Send + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> (Fut, R, E)>,
}

impl<F, T, R, E, Fut> TypedHandler<F, T, R, E, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    E: Display + Send + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, R, E, Fut> Handler for TypedHandler<F, T, R, E, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    E: Display + Send + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
{
    fn call(&self, payload: Value, ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
        let parsed: T = match serde_json::from_value(payload) {
            Ok(v) => v,
            Err(e) => {
                let err = BridgeError::HandlerFailure(format!(
                    "invalid payload for {}: {}",
                    ctx.message_type(),
                    e
                ));
                return Box::pin(async move { Err(err) });
            }
        };

        let fut = (self.handler)(parsed, ctx);
        Box::pin(async move {
            let output = fut.await.map_err(BridgeError::handler)?;
            Ok(serde_json::to_value(output)?)
        })
    }
}

/// Per-registration options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerOptions {
    /// The handler emits incremental progress; requests for this type get a
    /// timeout hint before the handler runs.
    pub needs_progress: bool,
}

impl HandlerOptions {
    /// Options for a handler that streams progress.
    pub fn with_progress() -> Self {
        Self {
            needs_progress: true,
        }
    }
}

/// Entry for a registered type.
struct HandlerEntry {
    handler: Arc<dyn Handler>,
    needs_progress: bool,
    /// Removed at the start of its first dispatch.
    once: bool,
}

/// Registry mapping message types to handlers.
pub struct HandlerRegistry {
    entries: RwLock<HashMap<String, HandlerEntry>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register a typed handler, replacing any existing one for `message_type`.
    ///
    /// Fails with `InvalidMessageType` for an empty or reserved type.
    pub fn register<F, T, R, E, Fut>(
        &self,
        message_type: &str,
        handler: F,
        options: HandlerOptions,
    ) -> Result<()>
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        self.register_handler(message_type, Arc::new(TypedHandler::new(handler)), options)
    }

    /// Register a typed handler that is removed as soon as it is first invoked.
    pub fn register_once<F, T, R, E, Fut>(
        &self,
        message_type: &str,
        handler: F,
        options: HandlerOptions,
    ) -> Result<()>
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        self.insert(
            message_type,
            Arc::new(TypedHandler::new(handler)),
            options,
            true,
        )
    }

    /// Register an already-built handler.
    pub fn register_handler(
        &self,
        message_type: &str,
        handler: Arc<dyn Handler>,
        options: HandlerOptions,
    ) -> Result<()> {
        self.insert(message_type, handler, options, false)
    }

    fn insert(
        &self,
        message_type: &str,
        handler: Arc<dyn Handler>,
        options: HandlerOptions,
        once: bool,
    ) -> Result<()> {
        validate_domain_type(message_type)?;

        let replaced = self.entries.write().insert(
            message_type.to_string(),
            HandlerEntry {
                handler,
                needs_progress: options.needs_progress,
                once,
            },
        );
        if replaced.is_some() {
            tracing::trace!(message_type, "handler replaced");
        }
        Ok(())
    }

    /// Remove the handler for `message_type`. Returns whether one existed.
    pub fn unregister(&self, message_type: &str) -> bool {
        self.entries.write().remove(message_type).is_some()
    }

    /// Whether a handler is registered for `message_type`.
    pub fn has(&self, message_type: &str) -> bool {
        self.entries.read().contains_key(message_type)
    }

    /// Registered types, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.entries.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Whether handlers for `message_type` stream progress. `false` when unknown.
    pub fn needs_progress(&self, message_type: &str) -> bool {
        self.entries
            .read()
            .get(message_type)
            .is_some_and(|e| e.needs_progress)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Look up the handler, removing it first if it is a one-shot entry.
    ///
    /// Runs under the write lock so two concurrent dispatches of the same
    /// one-shot type cannot both obtain it.
    fn resolve(&self, message_type: &str) -> Result<Arc<dyn Handler>> {
        let mut entries = self.entries.write();

        let once = match entries.get(message_type) {
            Some(entry) => entry.once,
            None => return Err(BridgeError::UnhandledMessageType(message_type.to_string())),
        };

        if once {
            let entry = entries
                .remove(message_type)
                .ok_or_else(|| BridgeError::UnhandledMessageType(message_type.to_string()))?;
            tracing::trace!(message_type, "one-shot handler consumed");
            return Ok(entry.handler);
        }

        entries
            .get(message_type)
            .map(|e| e.handler.clone())
            .ok_or_else(|| BridgeError::UnhandledMessageType(message_type.to_string()))
    }

    /// Dispatch a payload to the handler for `message_type`.
    ///
    /// Fails with `UnhandledMessageType` if nothing is registered; handler
    /// failures are returned unchanged.
    pub async fn dispatch(
        &self,
        message_type: &str,
        payload: Value,
        ctx: RequestContext,
    ) -> HandlerResult {
        let handler = self.resolve(message_type)?;
        handler.call(payload, ctx).await
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
