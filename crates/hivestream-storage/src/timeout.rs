//! Idle Timeout Primitive
//!
//! A resettable dead-man's switch: after `max_idle` without a
//! [`IdleTimeout::ping`], the registered callbacks run once, in order,
//! and the primitive goes inert. Used to self-close writers nobody
//! writes to anymore and to drain sort buckets nobody inserts into.
//!
//! ## Semantics
//!
//! - `ping()` is non-blocking; a ping racing the expiry may lose; the
//!   callbacks can fire even though a ping "just" happened. Consumers
//!   of this primitive must make their callbacks idempotent.
//! - Cancelling the token ends the watch; callbacks run on cancellation
//!   only when `callback_on_cancel` is set (that is how sort buckets
//!   get drained on writer close, while cached blob writers are closed
//!   explicitly instead).
//! - Dropping every handle ends the watch silently.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Callback invoked when the idle timer fires.
pub type IdleCallback = Box<dyn FnOnce() + Send>;

/// Handle to a running idle watch. Cloning shares the same timer.
#[derive(Clone)]
pub struct IdleTimeout {
    ping_tx: mpsc::Sender<()>,
}

impl IdleTimeout {
    /// Spawn the watch task.
    pub fn arm(
        cancel: CancellationToken,
        max_idle: Duration,
        callback_on_cancel: bool,
        callbacks: Vec<IdleCallback>,
    ) -> Self {
        let (ping_tx, mut ping_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            let mut callbacks = Some(callbacks);
            let fire = |cbs: Option<Vec<IdleCallback>>| {
                if let Some(cbs) = cbs {
                    for cb in cbs {
                        cb();
                    }
                }
            };

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        if callback_on_cancel {
                            fire(callbacks.take());
                        }
                        return;
                    }
                    _ = tokio::time::sleep(max_idle) => {
                        fire(callbacks.take());
                        return;
                    }
                    ping = ping_rx.recv() => {
                        if ping.is_none() {
                            // Every handle dropped; nobody left to ping.
                            return;
                        }
                        // Pinged: loop around and sleep again.
                    }
                }
            }
        });

        Self { ping_tx }
    }

    /// Reset the idle clock. Never blocks; a ping that finds the signal
    /// slot full is dropped (a reset is already pending).
    pub fn ping(&self) {
        let _ = self.ping_tx.try_send(());
    }
}
