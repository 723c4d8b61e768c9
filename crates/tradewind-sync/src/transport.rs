//! Transport abstraction for the sync protocol.
//!
//! The transport owns connections, framing and encryption; the sync layer
//! only needs to send envelopes, resolve a connection to its peer address
//! and close misbehaving connections. Inbound traffic does not flow
//! through this trait: the node wires the transport's receive side to the
//! manager's event channel as [`crate::SyncEvent::MessageReceived`].

use async_trait::async_trait;

use tradewind_core::{ConnectionId, NodeAddress};

use crate::error::Result;
use crate::messages::WireMessage;

/// Why a connection was (or is being) closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// An outbound send failed.
    SendFailure,
    /// An outbound send timed out.
    SendTimeout,
    /// The peer's request carried an unsupported protocol version.
    VersionNotSupported,
    /// The peer misbehaved badly enough to be banned.
    PeerBanned,
    /// The peer simply went away.
    PeerGone,
    /// Local shutdown.
    Shutdown,
}

/// Transport trait for sending sync messages.
///
/// Implementations must be thread-safe (Send + Sync); sends are issued
/// from short-lived tasks spawned by the manager.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send to a peer address, dialing a connection if none exists.
    /// Resolves once the message is handed to the network, with the
    /// connection used.
    async fn send_to(&self, address: &NodeAddress, message: WireMessage) -> Result<ConnectionId>;

    /// Send on an existing connection.
    async fn send_on(&self, conn: ConnectionId, message: WireMessage) -> Result<()>;

    /// The peer address of a live connection, if it has identified itself.
    fn peer_address(&self, conn: ConnectionId) -> Option<NodeAddress>;

    /// Close a connection with a reason.
    fn close(&self, conn: ConnectionId, reason: CloseReason);

    /// Whether any connection is currently up.
    fn has_connections(&self) -> bool;
}

/// A scriptable in-memory transport for tests.
///
/// Each known peer address carries a script deciding how sends to it
/// behave; responses are posted straight back onto the manager's event
/// channel, so paused-time tests stay fully deterministic.
pub mod memory {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use crate::error::SyncError;
    use crate::event::{EventSender, SyncEvent};
    use crate::messages::ResponseEnvelope;

    /// Delay before a scripted send failure resolves, standing in for a
    /// dial that has to give up.
    pub const DIAL_FAILURE_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

    /// How a scripted peer reacts to an inbound request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum PeerScript {
        /// Sends to this peer fail after [`DIAL_FAILURE_DELAY`].
        FailSend,
        /// Sends succeed; the peer never answers.
        Silent,
        /// Sends succeed; any request gets an empty, nonce-matching
        /// response.
        Respond,
        /// Sends succeed; any request gets a response with the wrong
        /// nonce.
        RespondWrongNonce,
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        events: EventSender,
        scripts: Mutex<HashMap<NodeAddress, PeerScript>>,
        connections: Mutex<HashMap<ConnectionId, NodeAddress>>,
        failing_conns: Mutex<HashSet<ConnectionId>>,
        sent: Mutex<Vec<(NodeAddress, WireMessage)>>,
        closed: Mutex<Vec<(ConnectionId, CloseReason)>>,
        next_conn: AtomicU64,
    }

    impl MemoryTransport {
        /// Create a transport that posts inbound traffic to `events`.
        pub fn new(events: EventSender) -> Self {
            Self {
                events,
                scripts: Mutex::new(HashMap::new()),
                connections: Mutex::new(HashMap::new()),
                failing_conns: Mutex::new(HashSet::new()),
                sent: Mutex::new(Vec::new()),
                closed: Mutex::new(Vec::new()),
                next_conn: AtomicU64::new(1),
            }
        }

        /// Script how sends to `address` behave (default: [`PeerScript::Silent`]).
        pub fn script(&self, address: NodeAddress, script: PeerScript) {
            self.scripts.lock().unwrap().insert(address, script);
        }

        /// Register an inbound connection from `address`, as if the peer
        /// had dialed us, and return its id.
        pub fn open_inbound(&self, address: NodeAddress) -> ConnectionId {
            let conn = ConnectionId(self.next_conn.fetch_add(1, Ordering::Relaxed));
            self.connections.lock().unwrap().insert(conn, address);
            conn
        }

        /// Make `send_on` fail for a connection.
        pub fn fail_sends_on(&self, conn: ConnectionId) {
            self.failing_conns.lock().unwrap().insert(conn);
        }

        /// Everything handed to the transport so far, failed dial
        /// attempts included, in order.
        pub fn sent(&self) -> Vec<(NodeAddress, WireMessage)> {
            self.sent.lock().unwrap().clone()
        }

        /// Connections closed so far, with reasons.
        pub fn closed(&self) -> Vec<(ConnectionId, CloseReason)> {
            self.closed.lock().unwrap().clone()
        }

        fn script_for(&self, address: &NodeAddress) -> PeerScript {
            self.scripts
                .lock()
                .unwrap()
                .get(address)
                .copied()
                .unwrap_or(PeerScript::Silent)
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send_to(&self, address: &NodeAddress, message: WireMessage) -> Result<ConnectionId> {
            let script = self.script_for(address);
            // Attempts are recorded even when the dial fails, so tests can
            // assert on the full send order.
            self.sent.lock().unwrap().push((address.clone(), message.clone()));
            if script == PeerScript::FailSend {
                tokio::time::sleep(DIAL_FAILURE_DELAY).await;
                return Err(SyncError::Transport(format!("{address} unreachable")));
            }

            let conn = ConnectionId(self.next_conn.fetch_add(1, Ordering::Relaxed));
            self.connections.lock().unwrap().insert(conn, address.clone());

            if let WireMessage::Request(req) = &message {
                let nonce = match script {
                    PeerScript::Respond => Some(req.nonce),
                    PeerScript::RespondWrongNonce => Some(req.nonce.wrapping_add(1)),
                    _ => None,
                };
                if let Some(request_nonce) = nonce {
                    let response = ResponseEnvelope {
                        request_nonce,
                        entries: Vec::new(),
                        bulk_items: Vec::new(),
                        entries_truncated: false,
                        bulk_truncated: false,
                    };
                    let _ = self.events.send(SyncEvent::MessageReceived {
                        conn,
                        message: WireMessage::Response(response),
                    });
                }
            }
            Ok(conn)
        }

        async fn send_on(&self, conn: ConnectionId, message: WireMessage) -> Result<()> {
            if self.failing_conns.lock().unwrap().contains(&conn) {
                return Err(SyncError::Transport(format!("{conn} broke mid-send")));
            }
            let address = self
                .connections
                .lock()
                .unwrap()
                .get(&conn)
                .cloned()
                .ok_or_else(|| SyncError::Transport(format!("{conn} not open")))?;
            self.sent.lock().unwrap().push((address, message));
            Ok(())
        }

        fn peer_address(&self, conn: ConnectionId) -> Option<NodeAddress> {
            self.connections.lock().unwrap().get(&conn).cloned()
        }

        fn close(&self, conn: ConnectionId, reason: CloseReason) {
            self.connections.lock().unwrap().remove(&conn);
            self.closed.lock().unwrap().push((conn, reason));
        }

        fn has_connections(&self) -> bool {
            !self.connections.lock().unwrap().is_empty()
        }
    }
}
