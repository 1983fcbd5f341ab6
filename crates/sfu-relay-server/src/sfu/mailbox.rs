//! Single-slot holding cell for a participant's next pending offer

use sfu_relay_protocol::SessionDescription;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Depth-1 queue. Deposits never block and are dropped while the slot is
/// occupied; the consumer waits at most a bounded time.
pub struct RenegotiationMailbox {
    tx: mpsc::Sender<SessionDescription>,
    rx: Mutex<mpsc::Receiver<SessionDescription>>,
}

impl RenegotiationMailbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Returns false if the slot was already occupied and `offer` was dropped
    pub fn deposit(&self, offer: SessionDescription) -> bool {
        self.tx.try_send(offer).is_ok()
    }

    /// Take the pending offer, waiting up to `timeout` for one to arrive
    pub async fn await_offer(&self, timeout: Duration) -> Option<SessionDescription> {
        tokio::time::timeout(timeout, async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        })
        .await
        .ok()
        .flatten()
    }
}

impl Default for RenegotiationMailbox {
    fn default() -> Self {
        Self::new()
    }
}
