//! Events driving the sync manager's single-threaded actor loop.
//!
//! Every state transition in the manager - commands from the owner,
//! inbound traffic, timer expiries, send outcomes - arrives as one
//! [`SyncEvent`] on one mpsc channel, so session bookkeeping never races
//! and needs no locking.

use tokio::sync::mpsc;

use tradewind_core::{ConnectionId, NodeAddress};

use crate::messages::WireMessage;
use crate::transport::CloseReason;

/// Sender half of the manager's event channel.
pub type EventSender = mpsc::UnboundedSender<SyncEvent>;

/// Receiver half of the manager's event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<SyncEvent>;

/// Create the manager's event channel. The sender half is cloned into
/// the transport and every timer; the receiver is handed to the manager.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// One unit of work for the sync manager.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    // ── Commands from the owning layer ──────────────────────────────
    /// Start the preliminary round against the seed list.
    RequestPreliminary,
    /// Start the update round against the anchor plus extra seeds.
    RequestUpdate,
    /// Stop accepting work and cancel everything outstanding.
    Shutdown,

    // ── Transport-driven ────────────────────────────────────────────
    /// A message arrived on a connection.
    MessageReceived {
        /// Connection it arrived on.
        conn: ConnectionId,
        /// The decoded message.
        message: WireMessage,
    },
    /// A connection closed.
    Disconnected {
        /// The closed connection.
        conn: ConnectionId,
        /// Why it closed.
        reason: CloseReason,
    },
    /// The last connection dropped.
    AllConnectionsLost,
    /// A connection came up after all were lost.
    NewConnectionAfterAllConnectionsLost,
    /// The host woke from standby.
    AwakeFromStandby,

    // ── Internal (timers and send outcomes) ─────────────────────────
    /// Staggered dispatch of one outbound request.
    Dispatch {
        /// Candidate to contact.
        address: NodeAddress,
        /// Fallback chain if this candidate fails.
        remaining: Vec<NodeAddress>,
    },
    /// An outbound request could not be sent.
    RequestSendFailed {
        /// Target of the failed send.
        address: NodeAddress,
        /// Nonce of the session the send belonged to.
        nonce: u32,
        /// Transport diagnostic.
        error: String,
    },
    /// No response arrived within the request timeout.
    RequestTimedOut {
        /// Target that did not answer.
        address: NodeAddress,
        /// Nonce of the timed-out session.
        nonce: u32,
    },
    /// Forced-cleanup watchdog for a stuck requester session.
    RequesterCleanup {
        /// Address whose session is checked.
        address: NodeAddress,
    },
    /// A response was sent successfully.
    ResponseSendCompleted {
        /// Connection the response went out on.
        conn: ConnectionId,
    },
    /// A response could not be sent.
    ResponseSendFailed {
        /// Connection the send failed on.
        conn: ConnectionId,
        /// Transport diagnostic.
        error: String,
    },
    /// A responder session hit its timeout before the send finished.
    ResponderTimedOut {
        /// The stuck connection.
        conn: ConnectionId,
    },
    /// Forced-cleanup watchdog for a stuck responder session.
    ResponderCleanup {
        /// Connection whose session is checked.
        conn: ConnectionId,
    },
    /// Delayed preliminary notification, so a concurrently discovered
    /// update trigger cannot observe it out of order.
    EmitPreliminaryNotice,
    /// Restart tick after connectivity loss.
    RetryTick,
}

/// Notifications posted to the owning layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncNotice {
    /// The first preliminary response arrived; the anchor is recorded.
    PreliminaryDataReceived,
    /// The first response after an update round arrived.
    UpdatedDataReceived,
    /// Any successful response arrived (fires for every success).
    DataReceived,
    /// Every candidate failed and the exhausted address was not a seed.
    NoPeersAvailable,
    /// Every candidate failed and the exhausted address was a seed.
    NoSeedNodeAvailable,
}

/// Sender half of the notice channel.
pub type NoticeSender = mpsc::UnboundedSender<SyncNotice>;

/// Receiver half of the notice channel.
pub type NoticeReceiver = mpsc::UnboundedReceiver<SyncNotice>;
