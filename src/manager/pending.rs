//! Outbound request correlation.
//!
//! Each `request()` gets an entry keyed by its message id, holding the
//! caller's oneshot sender and a timer task. An entry leaves the table
//! exactly once, under the table lock, by one of:
//!
//! - a matching response ([`PendingTable::settle`]), which also aborts the timer
//! - the timer firing, which fails the caller with `RequestTimeout`
//! - a bulk failure (re-handshake, connection closed)
//!
//! Whoever removes the entry owns the sender, so the other paths find
//! nothing and become no-ops.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{BridgeError, Result};

type Outcome = Result<Value>;
type EntryMap = HashMap<String, PendingRequest>;

struct PendingRequest {
    message_type: String,
    tx: oneshot::Sender<Outcome>,
    timer: JoinHandle<()>,
}

/// Table of requests awaiting a response.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: Arc<Mutex<EntryMap>>,
}

impl PendingTable {
    /// Add an entry and arm its timer, provided `admit` succeeds.
    ///
    /// `admit` runs under the table lock, as does the transition passed to
    /// [`fail_all_after`](Self::fail_all_after). An admitted entry is
    /// therefore either in the table before that transition or refused by
    /// `admit` after it. The timer is spawned while the lock is held, so it
    /// cannot observe the table before the entry exists.
    pub(crate) fn insert_if(
        &self,
        id: &str,
        message_type: &str,
        timeout: Duration,
        admit: impl FnOnce() -> Result<()>,
    ) -> Result<oneshot::Receiver<Outcome>> {
        let (tx, rx) = oneshot::channel();

        let mut entries = self.entries.lock();
        admit()?;
        let timer = tokio::spawn(expire_after(
            Arc::downgrade(&self.entries),
            id.to_string(),
            timeout,
        ));
        entries.insert(
            id.to_string(),
            PendingRequest {
                message_type: message_type.to_string(),
                tx,
                timer,
            },
        );

        Ok(rx)
    }

    /// Resolve the entry for `id`. Returns `false` if there was none.
    pub(crate) fn settle(&self, id: &str, outcome: Outcome) -> bool {
        let Some(request) = self.entries.lock().remove(id) else {
            return false;
        };
        request.timer.abort();
        // The caller may have dropped its handle; nothing to do then.
        let _ = request.tx.send(outcome);
        true
    }

    /// Remove the entry for `id` without resolving it.
    pub(crate) fn cancel(&self, id: &str) {
        if let Some(request) = self.entries.lock().remove(id) {
            request.timer.abort();
        }
    }

    /// Run `transition` under the table lock, then fail every entry with the
    /// error produced by `make_err`.
    pub(crate) fn fail_all_after(
        &self,
        transition: impl FnOnce(),
        make_err: impl Fn() -> BridgeError,
    ) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut entries = self.entries.lock();
            transition();
            entries.drain().map(|(_, r)| r).collect()
        };
        let count = drained.len();

        for request in drained {
            request.timer.abort();
            let _ = request.tx.send(Err(make_err()));
        }
        count
    }

    /// Number of outstanding requests.
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

async fn expire_after(entries: Weak<Mutex<EntryMap>>, id: String, timeout: Duration) {
    tokio::time::sleep(timeout).await;

    let Some(entries) = entries.upgrade() else {
        return;
    };
    let expired = entries.lock().remove(&id);

    if let Some(request) = expired {
        tracing::debug!(
            message_id = %id,
            message_type = %request.message_type,
            timeout_ms = timeout.as_millis() as u64,
            "request timed out"
        );
        let _ = request.tx.send(Err(BridgeError::RequestTimeout {
            message_type: request.message_type,
        }));
    }
}

/// Handle to the eventual response of a `request()`.
///
/// The message is already on the wire when this is returned; awaiting it
/// yields the response payload, the surface's error, or a protocol failure
/// (`NotReady`, `RequestTimeout`, `HandshakeReset`, `ConnectionClosed`).
#[must_use = "a request's outcome is only observable by awaiting its handle"]
pub struct ResponseHandle {
    message_id: Option<String>,
    state: HandleState,
}

enum HandleState {
    Failed(Option<BridgeError>),
    Waiting(oneshot::Receiver<Outcome>),
}

impl ResponseHandle {
    pub(crate) fn waiting(message_id: String, rx: oneshot::Receiver<Outcome>) -> Self {
        Self {
            message_id: Some(message_id),
            state: HandleState::Waiting(rx),
        }
    }

    pub(crate) fn failed(err: BridgeError) -> Self {
        Self {
            message_id: None,
            state: HandleState::Failed(Some(err)),
        }
    }

    /// Correlation id of the sent request, `None` if nothing was sent.
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }
}

impl Future for ResponseHandle {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            HandleState::Failed(err) => {
                Poll::Ready(Err(err.take().unwrap_or(BridgeError::ConnectionClosed)))
            }
            HandleState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(BridgeError::ConnectionClosed))),
        }
    }
}

impl std::fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseHandle")
            .field("message_id", &self.message_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn insert(table: &PendingTable, id: &str, ty: &str, timeout: Duration) -> oneshot::Receiver<Outcome> {
        table.insert_if(id, ty, timeout, || Ok(())).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_before_timeout() {
        let table = PendingTable::default();
        let rx = insert(&table, "a", "echo", Duration::from_millis(100));

        assert!(table.settle("a", Ok(json!(1))));
        assert_eq!(rx.await.unwrap().unwrap(), json!(1));
        assert_eq!(table.len(), 0);

        // Timer was aborted; nothing left to expire.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!table.settle("a", Ok(json!(2))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let table = PendingTable::default();
        let rx = insert(&table, "a", "slow", Duration::from_millis(1000));

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(&err, BridgeError::RequestTimeout { message_type } if message_type == "slow"));
        assert_eq!(table.len(), 0);
        assert!(!table.settle("a", Ok(json!("late"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_timers() {
        let table = PendingTable::default();
        let short = insert(&table, "s", "short", Duration::from_millis(10));
        let long = insert(&table, "l", "long", Duration::from_millis(1000));

        assert!(short.await.unwrap().is_err());
        assert_eq!(table.len(), 1);
        assert!(table.settle("l", Ok(json!("ok"))));
        assert_eq!(long.await.unwrap().unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn test_fail_all() {
        let table = PendingTable::default();
        let a = insert(&table, "a", "x", Duration::from_secs(60));
        let b = insert(&table, "b", "y", Duration::from_secs(60));

        assert_eq!(table.fail_all_after(|| {}, || BridgeError::HandshakeReset), 2);
        assert!(matches!(a.await.unwrap(), Err(BridgeError::HandshakeReset)));
        assert!(matches!(b.await.unwrap(), Err(BridgeError::HandshakeReset)));
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn test_refused_admission_leaves_no_entry() {
        let table = PendingTable::default();
        let result = table.insert_if("a", "x", Duration::from_secs(60), || Err(BridgeError::NotReady));
        assert!(matches!(result, Err(BridgeError::NotReady)));
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn test_admission_sees_transition() {
        let table = PendingTable::default();
        let open = AtomicBool::new(true);
        let admit = || {
            if open.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(BridgeError::HandshakeReset)
            }
        };

        let before = table.insert_if("a", "x", Duration::from_secs(60), admit).unwrap();
        let failed = table.fail_all_after(|| open.store(false, Ordering::SeqCst), || BridgeError::HandshakeReset);
        assert_eq!(failed, 1);
        assert!(matches!(before.await.unwrap(), Err(BridgeError::HandshakeReset)));

        let after = table.insert_if("b", "x", Duration::from_secs(60), admit);
        assert!(matches!(after, Err(BridgeError::HandshakeReset)));
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn test_cancel() {
        let table = PendingTable::default();
        let rx = insert(&table, "a", "x", Duration::from_secs(60));
        table.cancel("a");
        assert_eq!(table.len(), 0);
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_failed_handle() {
        let handle = ResponseHandle::failed(BridgeError::NotReady);
        assert!(handle.message_id().is_none());
        assert!(matches!(handle.await, Err(BridgeError::NotReady)));
    }

    #[tokio::test]
    async fn test_handle_sender_dropped() {
        let (tx, rx) = oneshot::channel();
        drop(tx);
        let handle = ResponseHandle::waiting("id".to_string(), rx);
        assert_eq!(handle.message_id(), Some("id"));
        assert!(matches!(handle.await, Err(BridgeError::ConnectionClosed)));
    }
}
