//! Inbound request sessions.
//!
//! One session per connection currently being served a response. Like the
//! requester side, the session owns its timeout timer and removal from
//! the manager's map cancels it.

use std::time::Duration;

use tradewind_core::ConnectionId;

use crate::event::{EventSender, SyncEvent};
use crate::timer::Timer;

/// A response being built and sent on one connection.
#[derive(Debug)]
pub struct ResponderSession {
    /// Connection the request arrived on.
    pub conn: ConnectionId,
    timeout: Timer,
}

impl ResponderSession {
    /// Open a session and arm its timeout. Fires
    /// [`SyncEvent::ResponderTimedOut`] if the response send has not
    /// completed in time.
    pub fn begin(conn: ConnectionId, timeout: Duration, events: EventSender) -> Self {
        let timer = Timer::once(timeout, events, SyncEvent::ResponderTimedOut { conn });
        Self {
            conn,
            timeout: timer,
        }
    }
}

impl Drop for ResponderSession {
    fn drop(&mut self) {
        self.timeout.cancel();
    }
}
