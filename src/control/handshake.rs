//! Readiness handshake state.
//!
//! A [`HandshakeGate`] starts in [`HandshakeState::AwaitingHandshake`] and
//! flips to [`HandshakeState::Ready`] the first time the surface's readiness
//! signal is observed. Any number of tasks can wait on the gate; they all
//! resolve off the same transition.

use tokio::sync::watch;

/// Handshake state of one manager/surface pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Initial state; outbound requests are refused.
    AwaitingHandshake,
    /// Readiness signal observed.
    Ready,
}

/// Single-writer, many-reader handshake flag.
#[derive(Debug)]
pub struct HandshakeGate {
    tx: watch::Sender<HandshakeState>,
}

impl HandshakeGate {
    /// Create a gate in the awaiting state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(HandshakeState::AwaitingHandshake);
        Self { tx }
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        *self.tx.borrow()
    }

    /// Whether the handshake has completed.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state() == HandshakeState::Ready
    }

    /// Transition to `Ready`. Returns `false` if already ready.
    pub fn mark_ready(&self) -> bool {
        self.transition(HandshakeState::Ready)
    }

    /// Transition back to `AwaitingHandshake`. Returns `false` if not ready.
    pub fn reset(&self) -> bool {
        self.transition(HandshakeState::AwaitingHandshake)
    }

    fn transition(&self, to: HandshakeState) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == to {
                false
            } else {
                *state = to;
                true
            }
        })
    }

    /// Wait until the gate is `Ready`. Returns immediately if it already is.
    pub async fn wait_ready(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|state| *state == HandshakeState::Ready).await;
    }
}

impl Default for HandshakeGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_initial_state() {
        let gate = HandshakeGate::new();
        assert_eq!(gate.state(), HandshakeState::AwaitingHandshake);
        assert!(!gate.is_ready());
    }

    #[test]
    fn test_mark_ready_once() {
        let gate = HandshakeGate::new();
        assert!(gate.mark_ready());
        assert!(!gate.mark_ready());
        assert!(gate.is_ready());
    }

    #[test]
    fn test_reset() {
        let gate = HandshakeGate::new();
        assert!(!gate.reset());
        gate.mark_ready();
        assert!(gate.reset());
        assert!(!gate.is_ready());
    }

    #[tokio::test]
    async fn test_concurrent_waiters_resolve_together() {
        let gate = Arc::new(HandshakeGate::new());

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.wait_ready().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        for w in &waiters {
            assert!(!w.is_finished());
        }

        gate.mark_ready();
        for w in waiters {
            w.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_wait_when_already_ready() {
        let gate = HandshakeGate::new();
        gate.mark_ready();
        gate.wait_ready().await;
    }
}
