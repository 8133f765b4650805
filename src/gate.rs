//! Single-completion gate
//!
//! A pending call can finish four ways: response, connect timeout, response
//! timeout, or transport failure. All four race to complete the same gate;
//! the first one wins and every later attempt is discarded.

use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// The sending side of a gate. Cheap to clone; all clones share one slot.
pub struct CompletionGate<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for CompletionGate<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> CompletionGate<T> {
    /// Create a gate and the receiver that observes its single completion.
    pub fn channel() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Offer a completion. Returns true only for the first caller.
    ///
    /// A dropped receiver still counts as completed.
    pub fn complete(&self, value: T) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match sender {
            Some(tx) => {
                let _ = tx.send(value);
                true
            }
            None => false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_completion_wins() {
        let (gate, rx) = CompletionGate::channel();
        let other = gate.clone();

        assert!(gate.complete("response"));
        assert!(!other.complete("timeout"));
        assert!(other.is_completed());
        assert_eq!(rx.await.unwrap(), "response");
    }

    #[tokio::test]
    async fn test_each_source_can_win() {
        for winner in ["response", "connect-timer", "response-timer", "error"] {
            let (gate, rx) = CompletionGate::channel();
            assert!(gate.complete(winner));
            for loser in ["response", "connect-timer", "response-timer", "error"] {
                assert!(!gate.complete(loser));
            }
            assert_eq!(rx.await.unwrap(), winner);
        }
    }

    #[test]
    fn test_complete_after_receiver_dropped() {
        let (gate, rx) = CompletionGate::<u8>::channel();
        drop(rx);
        assert!(gate.complete(1));
        assert!(!gate.complete(2));
    }
}
