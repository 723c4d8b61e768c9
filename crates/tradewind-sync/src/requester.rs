//! Outbound request sessions.
//!
//! One session per address currently being asked for data. The session
//! owns its timeout timer, so removing it from the manager's map cancels
//! the timeout.

use std::time::Duration;

use tradewind_core::NodeAddress;

use crate::event::{EventSender, SyncEvent};
use crate::messages::RequestKind;
use crate::timer::Timer;

/// An in-flight outbound request.
#[derive(Debug)]
pub struct RequestSession {
    /// Peer being asked.
    pub address: NodeAddress,
    /// Correlation nonce; responses with any other nonce are dropped.
    pub nonce: u32,
    /// Which phase the request belongs to.
    pub kind: RequestKind,
    /// Fallback candidates to try if this peer fails, best first.
    pub remaining: Vec<NodeAddress>,
    timeout: Timer,
}

impl RequestSession {
    /// Open a session and arm its timeout. The timer posts
    /// [`SyncEvent::RequestTimedOut`] carrying this session's address and
    /// nonce, so a stale firing after the session is replaced cannot kill
    /// its successor.
    pub fn begin(
        address: NodeAddress,
        nonce: u32,
        kind: RequestKind,
        remaining: Vec<NodeAddress>,
        timeout: Duration,
        events: EventSender,
    ) -> Self {
        let timer = Timer::once(
            timeout,
            events,
            SyncEvent::RequestTimedOut {
                address: address.clone(),
                nonce,
            },
        );
        Self {
            address,
            nonce,
            kind,
            remaining,
            timeout: timer,
        }
    }

    /// Whether an inbound response nonce matches this session.
    pub fn matches_nonce(&self, request_nonce: u32) -> bool {
        self.nonce == request_nonce
    }
}

impl Drop for RequestSession {
    fn drop(&mut self) {
        self.timeout.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn addr(n: u16) -> NodeAddress {
        NodeAddress::new(format!("peer{n}.example.net"), n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_carries_address_and_nonce() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _session = RequestSession::begin(
            addr(1),
            42,
            RequestKind::Preliminary,
            vec![addr(2)],
            Duration::from_secs(180),
            tx,
        );
        match rx.recv().await.unwrap() {
            SyncEvent::RequestTimedOut { address, nonce } => {
                assert_eq!(address, addr(1));
                assert_eq!(nonce, 42);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_session_cancels_timeout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = RequestSession::begin(
            addr(1),
            42,
            RequestKind::Updated,
            Vec::new(),
            Duration::from_secs(180),
            tx,
        );
        assert!(session.matches_nonce(42));
        assert!(!session.matches_nonce(43));
        drop(session);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(rx.try_recv().is_err());
    }
}
