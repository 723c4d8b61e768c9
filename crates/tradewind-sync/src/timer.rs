//! Cancellable one-shot timers.
//!
//! A timer is a spawned task that sleeps and then posts an event back on
//! the manager's channel; cancelling aborts the task. Cancellation is
//! idempotent, and dropping a timer cancels it, so a session's timeout
//! dies with the session.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::event::{EventSender, SyncEvent};

/// A cancellable one-shot timer.
#[derive(Debug)]
pub struct Timer {
    handle: Option<JoinHandle<()>>,
}

impl Timer {
    /// Arm a timer that posts `event` after `delay`.
    ///
    /// If the event channel has closed by then the post is silently
    /// dropped; the manager is gone and nothing is listening.
    pub fn once(delay: Duration, events: EventSender, event: SyncEvent) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        });
        Self {
            handle: Some(handle),
        }
    }

    /// Cancel the timer. A no-op if it already fired or was cancelled.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Post an event after a delay with no cancellation handle.
///
/// Used for staggered dispatches and cleanup watchdogs, where a stale
/// firing is harmless: the handler re-checks current state against the
/// keys the event carries.
pub fn post_after(delay: Duration, events: EventSender, event: SyncEvent) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = events.send(event);
    });
}
