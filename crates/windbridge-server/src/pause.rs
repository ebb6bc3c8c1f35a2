//! Pause/acknowledge handshake between the control and network tasks.
//!
//! The control task calls [`PauseController::pause`] before replacing the
//! transport configuration. The network task notices the request at its
//! next safe point, acknowledges, and parks until
//! [`PauseController::resume`] is called.

use std::time::Duration;

use tokio::sync::watch;

/// Upper bound on waiting for the network task to acknowledge.
pub const PAUSE_ACK_TIMEOUT: Duration = Duration::from_millis(500);

/// Create a connected controller/listener pair.
pub fn pause_gate() -> (PauseController, PauseListener) {
    let (request_tx, request_rx) = watch::channel(None);
    let (ack_tx, ack_rx) = watch::channel(0);
    (
        PauseController {
            request_tx,
            ack_rx,
            sequence: 0,
        },
        PauseListener { request_rx, ack_tx },
    )
}

/// Control side of the gate.
///
/// Every request carries a fresh sequence number and only an
/// acknowledgement of that number completes it.
#[derive(Debug)]
pub struct PauseController {
    request_tx: watch::Sender<Option<u64>>,
    ack_rx: watch::Receiver<u64>,
    sequence: u64,
}

impl PauseController {
    /// Request a pause and wait for the acknowledgement.
    ///
    /// Returns `false` when no acknowledgement arrived within `timeout`;
    /// the request stays raised until [`resume`](Self::resume).
    pub async fn pause(&mut self, timeout: Duration) -> bool {
        self.sequence += 1;
        let sequence = self.sequence;
        self.request_tx.send_replace(Some(sequence));
        matches!(
            tokio::time::timeout(timeout, self.ack_rx.wait_for(|acked| *acked == sequence)).await,
            Ok(Ok(_))
        )
    }

    /// Release a parked network task.
    pub fn resume(&self) {
        self.request_tx.send_replace(None);
    }

    pub fn is_paused(&self) -> bool {
        *self.request_tx.borrow() == Some(self.sequence) && *self.ack_rx.borrow() == self.sequence
    }
}

/// Network side of the gate.
#[derive(Debug)]
pub struct PauseListener {
    request_rx: watch::Receiver<Option<u64>>,
    ack_tx: watch::Sender<u64>,
}

impl PauseListener {
    pub fn is_requested(&self) -> bool {
        self.request_rx.borrow().is_some()
    }

    /// Resolve once a pause is requested. Cancel-safe.
    pub async fn requested(&mut self) {
        if self.request_rx.wait_for(Option::is_some).await.is_err() {
            // controller gone: no pause can ever arrive
            std::future::pending::<()>().await;
        }
    }

    /// Acknowledge the pending request and wait until it is withdrawn.
    pub async fn park(&mut self) {
        let requested = *self.request_rx.borrow_and_update();
        let Some(sequence) = requested else {
            return;
        };
        self.ack_tx.send_replace(sequence);
        let _ = self
            .request_rx
            .wait_for(|requested| *requested != Some(sequence))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pause_acknowledged() {
        let (mut controller, mut listener) = pause_gate();
        let parked = tokio::spawn(async move {
            listener.requested().await;
            listener.park().await;
            listener
        });

        assert!(controller.pause(Duration::from_secs(1)).await);
        assert!(controller.is_paused());
        controller.resume();

        let listener = tokio::time::timeout(Duration::from_secs(1), parked)
            .await
            .unwrap()
            .unwrap();
        assert!(!listener.is_requested());
        assert!(!controller.is_paused());
    }

    #[tokio::test]
    async fn test_pause_times_out_without_listener_progress() {
        let (mut controller, listener) = pause_gate();
        assert!(!controller.pause(Duration::from_millis(20)).await);
        assert!(listener.is_requested());
        controller.resume();
        assert!(!listener.is_requested());
    }

    #[tokio::test]
    async fn test_late_ack_does_not_complete_next_pause() {
        let (mut controller, listener) = pause_gate();
        assert!(!controller.pause(Duration::from_millis(20)).await);
        controller.resume();

        // the first request is acknowledged only after it was withdrawn
        listener.ack_tx.send_replace(1);
        assert!(!controller.is_paused());
        assert!(!controller.pause(Duration::from_millis(20)).await);
        assert!(!controller.is_paused());
        controller.resume();
    }
}
