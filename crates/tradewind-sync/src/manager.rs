//! The sync manager actor.
//!
//! Drives the two-phase bootstrap: a preliminary round against the seed
//! list, then an update round against the anchor peer once the node's
//! own address is published. All state lives on one task fed by one
//! event channel; timers and sends are spawned tasks that report back
//! through the same channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::mpsc;

use tradewind_core::{ConnectionId, NodeAddress};

use crate::event::{
    EventReceiver, EventSender, NoticeReceiver, NoticeSender, SyncEvent, SyncNotice,
};
use crate::messages::{RequestEnvelope, RequestKind, WireMessage, MIN_PROTOCOL_VERSION};
use crate::peers::{filtered, filtered_non_seed, sorted_by_recency, PeerPool};
use crate::requester::RequestSession;
use crate::responder::ResponderSession;
use crate::store::SyncStore;
use crate::timer::{post_after, Timer};
use crate::transport::{CloseReason, Transport};

/// Tuning knobs for the sync manager. Immutable once the manager is
/// constructed.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Seeds contacted in parallel during the preliminary round.
    pub num_seeds_for_preliminary: usize,
    /// Extra seeds contacted alongside the anchor during the update
    /// round.
    pub num_additional_seeds_for_update: usize,
    /// How long a requester session waits for a response.
    pub request_timeout: Duration,
    /// How long a responder session may take to send its response.
    pub response_timeout: Duration,
    /// Watchdog delay before a stuck session is forcibly discarded.
    pub cleanup_window: Duration,
    /// Delay before retrying after connectivity loss.
    pub restart_delay: Duration,
    /// Gap between staggered dispatches within one round.
    pub dispatch_stagger: Duration,
    /// Delay before the preliminary-data notice is emitted, so an update
    /// trigger racing the first response observes the anchor first.
    pub preliminary_notice_delay: Duration,
    /// Per-kind cap on payloads in one response.
    pub max_response_entries: usize,
    /// Oldest request version served; older requests close the
    /// connection.
    pub min_protocol_version: u16,
}

impl SyncConfig {
    /// Defaults for a node. Seed nodes contact one more peer per round
    /// than ordinary nodes.
    pub fn for_node(is_seed: bool) -> Self {
        Self {
            num_seeds_for_preliminary: if is_seed { 3 } else { 2 },
            num_additional_seeds_for_update: if is_seed { 2 } else { 1 },
            request_timeout: Duration::from_secs(180),
            response_timeout: Duration::from_secs(180),
            cleanup_window: Duration::from_secs(120),
            restart_delay: Duration::from_secs(10),
            dispatch_stagger: Duration::from_millis(200),
            preliminary_notice_delay: Duration::from_millis(100),
            max_response_entries: 10_000,
            min_protocol_version: MIN_PROTOCOL_VERSION,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::for_node(false)
    }
}

/// Cloneable handle for driving a running [`SyncManager`].
#[derive(Debug, Clone)]
pub struct SyncHandle {
    events: EventSender,
}

impl SyncHandle {
    /// Start the preliminary round.
    pub fn request_preliminary_data(&self) {
        let _ = self.events.send(SyncEvent::RequestPreliminary);
    }

    /// Start the update round. Ignored (with a warning) until a
    /// preliminary response has recorded an anchor.
    pub fn request_update_data(&self) {
        let _ = self.events.send(SyncEvent::RequestUpdate);
    }

    /// Stop the manager and cancel everything outstanding.
    pub fn shutdown(&self) {
        let _ = self.events.send(SyncEvent::Shutdown);
    }

    /// The raw event sender, for wiring the transport's receive side.
    pub fn event_sender(&self) -> EventSender {
        self.events.clone()
    }
}

/// The sync protocol actor.
pub struct SyncManager<S, P, T> {
    config: SyncConfig,
    store: Arc<S>,
    peers: Arc<P>,
    transport: Arc<T>,
    events_tx: EventSender,
    events_rx: Option<EventReceiver>,
    notices: NoticeSender,
    /// Seed candidates, shuffled once at construction so load spreads
    /// across the seed population.
    seed_addresses: Vec<NodeAddress>,
    requesters: HashMap<NodeAddress, RequestSession>,
    responders: HashMap<ConnectionId, ResponderSession>,
    /// First peer that answered a preliminary request; the update round
    /// goes back to it first.
    anchor: Option<NodeAddress>,
    update_phase: bool,
    update_notice_pending: bool,
    retry_timer: Option<Timer>,
    stopped: bool,
}

impl<S, P, T> SyncManager<S, P, T>
where
    S: SyncStore + 'static,
    P: PeerPool + 'static,
    T: Transport + 'static,
{
    /// Build a manager around its collaborators and a pre-made event
    /// channel (the transport needs the sender before the manager
    /// exists). Returns the manager, a handle and the notice stream.
    pub fn new(
        config: SyncConfig,
        store: Arc<S>,
        peers: Arc<P>,
        transport: Arc<T>,
        events: (EventSender, EventReceiver),
    ) -> (Self, SyncHandle, NoticeReceiver) {
        let (events_tx, events_rx) = events;
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();

        let mut seed_addresses: Vec<NodeAddress> = peers
            .seed_addresses()
            .into_iter()
            .filter(|a| !peers.is_self(a))
            .collect();
        seed_addresses.shuffle(&mut rand::thread_rng());

        let handle = SyncHandle {
            events: events_tx.clone(),
        };
        let manager = Self {
            config,
            store,
            peers,
            transport,
            events_tx,
            events_rx: Some(events_rx),
            notices: notices_tx,
            seed_addresses,
            requesters: HashMap::new(),
            responders: HashMap::new(),
            anchor: None,
            update_phase: false,
            update_notice_pending: false,
            retry_timer: None,
            stopped: false,
        };
        (manager, handle, notices_rx)
    }

    /// Run the actor loop until shutdown or until every handle and the
    /// transport drop their senders.
    pub async fn run(mut self) {
        let Some(mut events) = self.events_rx.take() else {
            return;
        };
        while let Some(event) = events.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }
        tracing::info!("sync manager stopped");
    }

    /// The peer whose preliminary response anchored this node, if any.
    pub fn anchor(&self) -> Option<&NodeAddress> {
        self.anchor.as_ref()
    }

    /// Apply one event. Returns false when the manager should stop.
    pub fn handle_event(&mut self, event: SyncEvent) -> bool {
        match event {
            SyncEvent::RequestPreliminary => self.start_preliminary_round(),
            SyncEvent::RequestUpdate => self.start_update_round(),
            SyncEvent::Shutdown => {
                self.stopped = true;
                self.retry_timer = None;
                self.requesters.clear();
                self.responders.clear();
                return false;
            }
            SyncEvent::MessageReceived { conn, message } => match message {
                WireMessage::Response(response) => self.on_response(conn, response),
                WireMessage::Request(request) => self.on_request(conn, request),
            },
            SyncEvent::Disconnected { conn, reason } => self.on_disconnected(conn, reason),
            SyncEvent::AllConnectionsLost => {
                tracing::info!("all connections lost, pausing sync");
                self.requesters.clear();
                self.responders.clear();
                self.stopped = true;
                self.schedule_retry(self.config.restart_delay);
            }
            SyncEvent::NewConnectionAfterAllConnectionsLost => {
                self.requesters.clear();
                self.responders.clear();
                self.stopped = false;
                self.schedule_retry(Duration::ZERO);
            }
            SyncEvent::AwakeFromStandby => {
                if self.stopped && self.transport.has_connections() {
                    self.stopped = false;
                    self.schedule_retry(Duration::ZERO);
                }
            }
            SyncEvent::Dispatch { address, remaining } => {
                if self.stopped {
                    tracing::debug!(%address, "dropping dispatch, manager is stopped");
                } else {
                    self.request_data(address, remaining);
                }
            }
            SyncEvent::RequestSendFailed {
                address,
                nonce,
                error,
            } => {
                tracing::warn!(%address, %error, "request send failed");
                self.fail_requester(&address, nonce);
            }
            SyncEvent::RequestTimedOut { address, nonce } => {
                tracing::warn!(%address, "request timed out");
                self.fail_requester(&address, nonce);
            }
            SyncEvent::RequesterCleanup { address } => {
                if self.requesters.remove(&address).is_some() {
                    tracing::warn!(%address, "forced cleanup of stuck requester session");
                }
            }
            SyncEvent::ResponseSendCompleted { conn } => {
                if self.responders.remove(&conn).is_some() {
                    tracing::debug!(%conn, "response delivered");
                }
            }
            SyncEvent::ResponseSendFailed { conn, error } => {
                if self.responders.remove(&conn).is_some() {
                    tracing::warn!(%conn, %error, "response send failed, closing connection");
                    self.transport.close(conn, CloseReason::SendFailure);
                }
            }
            SyncEvent::ResponderTimedOut { conn } => {
                if self.responders.remove(&conn).is_some() {
                    tracing::warn!(%conn, "response send timed out, closing connection");
                    self.transport.close(conn, CloseReason::SendTimeout);
                }
            }
            SyncEvent::ResponderCleanup { conn } => {
                if self.responders.remove(&conn).is_some() {
                    tracing::warn!(%conn, "forced cleanup of stuck responder session");
                }
            }
            SyncEvent::EmitPreliminaryNotice => {
                self.notify(SyncNotice::PreliminaryDataReceived);
            }
            SyncEvent::RetryTick => {
                self.retry_timer = None;
                self.stopped = false;
                self.retry();
            }
        }
        true
    }

    // ── Outbound rounds ─────────────────────────────────────────────

    fn start_preliminary_round(&mut self) {
        self.update_phase = false;
        let candidates = self.seed_addresses.clone();
        if candidates.is_empty() {
            tracing::warn!("no seed addresses known, cannot bootstrap");
            self.notify(SyncNotice::NoSeedNodeAvailable);
            return;
        }
        self.stagger_dispatches(candidates, self.config.num_seeds_for_preliminary);
    }

    fn start_update_round(&mut self) {
        let Some(anchor) = self.anchor.clone() else {
            tracing::warn!("update requested before preliminary sync completed, ignoring");
            return;
        };
        self.update_phase = true;
        self.update_notice_pending = true;

        // Anchor first, then extra seeds not already in flight.
        let mut candidates = vec![anchor.clone()];
        candidates.extend(
            self.seed_addresses
                .iter()
                .filter(|a| **a != anchor && !self.requesters.contains_key(*a))
                .cloned(),
        );
        self.stagger_dispatches(candidates, 1 + self.config.num_additional_seeds_for_update);
    }

    /// Dispatch requests to the first `count` candidates, spaced by the
    /// stagger interval. Each dispatch carries the tail of the candidate
    /// list as its fallback chain.
    fn stagger_dispatches(&self, candidates: Vec<NodeAddress>, count: usize) {
        let count = count.min(candidates.len());
        for i in 0..count {
            let address = candidates[i].clone();
            let remaining = candidates[i + 1..].to_vec();
            post_after(
                self.config.dispatch_stagger * i as u32,
                self.events_tx.clone(),
                SyncEvent::Dispatch { address, remaining },
            );
        }
    }

    fn request_data(&mut self, address: NodeAddress, remaining: Vec<NodeAddress>) {
        if self.requesters.contains_key(&address) {
            tracing::warn!(%address, "request already pending, scheduling forced cleanup");
            post_after(
                self.config.cleanup_window,
                self.events_tx.clone(),
                SyncEvent::RequesterCleanup { address },
            );
            return;
        }

        let nonce = self.unique_nonce();
        let kind = if self.update_phase {
            RequestKind::Updated
        } else {
            RequestKind::Preliminary
        };
        let envelope = self.build_request(kind, nonce);

        tracing::info!(%address, nonce, ?kind, fallbacks = remaining.len(), "requesting data");

        // The session (and its timeout) must exist before the send task
        // can possibly report back.
        let session = RequestSession::begin(
            address.clone(),
            nonce,
            kind,
            remaining,
            self.config.request_timeout,
            self.events_tx.clone(),
        );
        self.requesters.insert(address.clone(), session);

        let transport = Arc::clone(&self.transport);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = transport
                .send_to(&address, WireMessage::Request(envelope))
                .await
            {
                let _ = events.send(SyncEvent::RequestSendFailed {
                    address,
                    nonce,
                    error: e.to_string(),
                });
            }
        });
    }

    fn build_request(&self, kind: RequestKind, nonce: u32) -> RequestEnvelope {
        match kind {
            RequestKind::Preliminary => self.store.build_preliminary_request(nonce),
            RequestKind::Updated => {
                let own = self.peers.self_address();
                if own.is_none() {
                    tracing::warn!("own address unknown, sending update request without it");
                }
                self.store.build_update_request(own.as_ref(), nonce)
            }
        }
    }

    /// A nonzero nonce no outstanding session is using.
    fn unique_nonce(&self) -> u32 {
        loop {
            let nonce: u32 = rand::random();
            if nonce != 0 && !self.requesters.values().any(|s| s.nonce == nonce) {
                return nonce;
            }
        }
    }

    // ── Failure and fallback ────────────────────────────────────────

    /// A send failure or timeout for (`address`, `nonce`). Stale reports
    /// for a replaced session are ignored.
    fn fail_requester(&mut self, address: &NodeAddress, nonce: u32) {
        let matches = self
            .requesters
            .get(address)
            .map(|s| s.matches_nonce(nonce))
            .unwrap_or(false);
        if !matches {
            tracing::debug!(%address, nonce, "stale failure report, ignoring");
            return;
        }
        if let Some(session) = self.requesters.remove(address) {
            self.peers.handle_connection_fault(address);
            self.advance_or_exhaust(session);
        }
    }

    fn advance_or_exhaust(&mut self, failed: RequestSession) {
        let mut remaining = failed.remaining.clone();
        while !remaining.is_empty() {
            let next = remaining.remove(0);
            if self.requesters.contains_key(&next) {
                continue;
            }
            self.request_data(next, remaining);
            return;
        }

        // Chain exhausted. Only give up once every parallel attempt has
        // also died.
        if !self.requesters.is_empty() {
            return;
        }
        // Only the bootstrap surfaces exhaustion to the owner; once an
        // anchor exists the fallback round below still runs.
        if self.anchor.is_none() {
            if self.peers.is_seed(&failed.address) {
                tracing::warn!("every seed candidate failed");
                self.notify(SyncNotice::NoSeedNodeAvailable);
            } else {
                tracing::warn!("every peer candidate failed");
                self.notify(SyncNotice::NoPeersAvailable);
            }
        }
        self.request_from_non_seed_peers();
    }

    /// Last resort: ask recently seen non-seed peers for data.
    fn request_from_non_seed_peers(&mut self) {
        let mut candidates = filtered_non_seed(
            self.peers.as_ref(),
            sorted_by_recency(self.peers.reported_peers()),
            &[],
        );
        let already = candidates.clone();
        candidates.extend(filtered_non_seed(
            self.peers.as_ref(),
            sorted_by_recency(self.peers.persisted_peers()),
            &already,
        ));
        if candidates.is_empty() {
            tracing::warn!("no non-seed peers known either, retrying after a pause");
            self.schedule_retry(self.config.restart_delay);
            return;
        }
        let first = candidates.remove(0);
        self.request_data(first, candidates);
    }

    // ── Inbound ─────────────────────────────────────────────────────

    fn on_response(&mut self, conn: ConnectionId, response: crate::messages::ResponseEnvelope) {
        let Some(address) = self.transport.peer_address(conn) else {
            tracing::warn!(%conn, "response on unidentified connection, dropping");
            return;
        };
        let Some(session) = self.requesters.get(&address) else {
            tracing::debug!(%address, "response without a pending request, dropping");
            return;
        };
        if !session.matches_nonce(response.request_nonce) {
            tracing::info!(
                %address,
                expected = session.nonce,
                got = response.request_nonce,
                "response nonce mismatch, dropping"
            );
            return;
        }

        // Retire the session before any notification goes out, so a
        // re-entrant request from a listener sees a clean slate.
        let Some(session) = self.requesters.remove(&address) else {
            return;
        };
        self.retry_timer = None;

        let accounting = response.accounting();
        tracing::info!(
            %address,
            entries = accounting.entry_count,
            entry_bytes = accounting.entry_bytes,
            bulk = accounting.bulk_count,
            bulk_bytes = accounting.bulk_bytes,
            entries_truncated = response.entries_truncated,
            bulk_truncated = response.bulk_truncated,
            "received data response"
        );

        self.store.merge_response(&response, &address);

        if session.kind == RequestKind::Preliminary && self.anchor.is_none() {
            self.anchor = Some(address);
            post_after(
                self.config.preliminary_notice_delay,
                self.events_tx.clone(),
                SyncEvent::EmitPreliminaryNotice,
            );
        }
        // Once an update has been requested, the first successful response
        // of any kind satisfies it.
        if self.update_notice_pending {
            self.update_notice_pending = false;
            self.notify(SyncNotice::UpdatedDataReceived);
        }
        self.notify(SyncNotice::DataReceived);
    }

    fn on_request(&mut self, conn: ConnectionId, request: RequestEnvelope) {
        if self.stopped {
            tracing::warn!(%conn, "ignoring inbound request while stopped");
            return;
        }
        if request.protocol_version < self.config.min_protocol_version {
            tracing::warn!(
                %conn,
                version = request.protocol_version,
                min = self.config.min_protocol_version,
                "unsupported request version, closing connection"
            );
            self.transport.close(conn, CloseReason::VersionNotSupported);
            return;
        }
        if self.responders.contains_key(&conn) {
            tracing::warn!(%conn, "response already in flight, scheduling forced cleanup");
            post_after(
                self.config.cleanup_window,
                self.events_tx.clone(),
                SyncEvent::ResponderCleanup { conn },
            );
            return;
        }

        let response = self
            .store
            .build_response(&request, self.config.max_response_entries);
        let accounting = response.accounting();
        tracing::info!(
            %conn,
            nonce = request.nonce,
            entries = accounting.entry_count,
            entry_bytes = accounting.entry_bytes,
            bulk = accounting.bulk_count,
            bulk_bytes = accounting.bulk_bytes,
            entries_truncated = response.entries_truncated,
            bulk_truncated = response.bulk_truncated,
            "serving data response"
        );

        let session = ResponderSession::begin(conn, self.config.response_timeout, self.events_tx.clone());
        self.responders.insert(conn, session);

        let transport = Arc::clone(&self.transport);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            match transport.send_on(conn, WireMessage::Response(response)).await {
                Ok(()) => {
                    let _ = events.send(SyncEvent::ResponseSendCompleted { conn });
                }
                Err(e) => {
                    let _ = events.send(SyncEvent::ResponseSendFailed {
                        conn,
                        error: e.to_string(),
                    });
                }
            }
        });
    }

    fn on_disconnected(&mut self, conn: ConnectionId, reason: CloseReason) {
        if let Some(address) = self.transport.peer_address(conn) {
            if self.requesters.remove(&address).is_some() {
                tracing::debug!(%address, "peer disconnected with request in flight");
            }
            if self.peers.is_banned(reason, conn) {
                tracing::warn!(%address, "peer banned, removing from seed candidates");
                self.seed_addresses.retain(|a| a != &address);
            }
        }
        self.responders.remove(&conn);
    }

    // ── Restart ─────────────────────────────────────────────────────

    fn schedule_retry(&mut self, delay: Duration) {
        if self.retry_timer.is_none() {
            self.retry_timer = Some(Timer::once(
                delay,
                self.events_tx.clone(),
                SyncEvent::RetryTick,
            ));
        }
    }

    /// Rebuild the candidate pool from scratch and go again: freshly
    /// shuffled seeds first, then reported peers by recency, then
    /// persisted peers.
    fn retry(&mut self) {
        let mut seeds: Vec<NodeAddress> = self
            .peers
            .seed_addresses()
            .into_iter()
            .filter(|a| !self.peers.is_self(a))
            .collect();
        seeds.shuffle(&mut rand::thread_rng());
        self.seed_addresses = seeds.clone();

        let mut candidates = filtered(self.peers.as_ref(), seeds, &[]);
        let reported = filtered_non_seed(
            self.peers.as_ref(),
            sorted_by_recency(self.peers.reported_peers()),
            &candidates,
        );
        candidates.extend(reported);
        let persisted = filtered_non_seed(
            self.peers.as_ref(),
            sorted_by_recency(self.peers.persisted_peers()),
            &candidates,
        );
        candidates.extend(persisted);

        if candidates.is_empty() {
            tracing::warn!("retry found no candidates");
            return;
        }
        let width = if self.update_phase {
            1 + self.config.num_additional_seeds_for_update
        } else {
            self.config.num_seeds_for_preliminary
        };
        tracing::info!(candidates = candidates.len(), "retrying sync");
        self.stagger_dispatches(candidates, width);
    }

    fn notify(&self, notice: SyncNotice) {
        let _ = self.notices.send(notice);
    }
}
