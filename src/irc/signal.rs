//! One-shot notification that a session has ended.
//!
//! Both the reader and the writer may fail independently, and the owner may
//! close the session too, so firing is idempotent: the first call flips the
//! flag and wakes every waiter, later calls do nothing.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct ClosedSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ClosedSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Mark the session closed. Returns `true` only for the call that did it.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal has fired. Returns immediately if it already has.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender is owned by `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for ClosedSignal {
    fn default() -> Self {
        Self::new()
    }
}
