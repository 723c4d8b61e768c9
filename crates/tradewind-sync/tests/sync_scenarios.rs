//! End-to-end sync manager scenarios on the in-memory transport.
//!
//! All tests run with the tokio clock paused, so every timer (staggered
//! dispatch, request timeout, cleanup watchdog, retry tick) fires
//! deterministically.

use std::sync::Arc;
use std::time::Duration;

use tradewind_core::{ItemId, NodeAddress, ProtectedEntry};
use tradewind_sync::{
    event_channel,
    memory_peers::MemoryPeerPool,
    memory_store::MemoryStore,
    memory_transport::{MemoryTransport, PeerScript},
    CloseReason, NoticeReceiver, RequestEnvelope, RequestKind, ResponseEnvelope, SyncConfig,
    SyncEvent, SyncHandle, SyncManager, SyncNotice, WireMessage, PROTOCOL_VERSION,
};

fn addr(n: u16) -> NodeAddress {
    NodeAddress::new(format!("peer{n}.example.net"), n)
}

fn id(n: u32) -> ItemId {
    let mut bytes = [0u8; 20];
    bytes[..4].copy_from_slice(&n.to_be_bytes());
    ItemId::from_bytes(bytes)
}

struct Harness {
    handle: SyncHandle,
    notices: NoticeReceiver,
    transport: Arc<MemoryTransport>,
    store: Arc<MemoryStore>,
}

fn start(pool: MemoryPeerPool, config: SyncConfig) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (tx, rx) = event_channel();
    let transport = Arc::new(MemoryTransport::new(tx.clone()));
    let store = Arc::new(MemoryStore::new());
    let (manager, handle, notices) = SyncManager::new(
        config,
        Arc::clone(&store),
        Arc::new(pool),
        Arc::clone(&transport),
        (tx, rx),
    );
    tokio::spawn(manager.run());
    Harness {
        handle,
        notices,
        transport,
        store,
    }
}

fn start_with_seeds(seeds: Vec<NodeAddress>) -> Harness {
    start(MemoryPeerPool::with_seeds(seeds), SyncConfig::default())
}

/// Addresses of every request sent so far, in order, with their kinds.
fn requests_sent(transport: &MemoryTransport) -> Vec<(NodeAddress, RequestKind)> {
    transport
        .sent()
        .into_iter()
        .filter_map(|(address, message)| match message {
            WireMessage::Request(req) => Some((address, req.kind)),
            _ => None,
        })
        .collect()
}

/// Let spawned send tasks and the manager loop catch up.
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_preliminary_falls_back_until_a_seed_answers() {
    let seeds = vec![addr(1), addr(2), addr(3)];
    let mut h = start_with_seeds(seeds);
    h.transport.script(addr(1), PeerScript::FailSend);
    h.transport.script(addr(2), PeerScript::FailSend);
    h.transport.script(addr(3), PeerScript::Respond);

    h.handle.request_preliminary_data();

    // The only reachable seed eventually answers, whatever the shuffled
    // dispatch order was.
    assert_eq!(h.notices.recv().await, Some(SyncNotice::DataReceived));
    assert_eq!(
        h.notices.recv().await,
        Some(SyncNotice::PreliminaryDataReceived)
    );

    settle().await;
    let requests = requests_sent(&h.transport);
    assert!(requests.iter().any(|(address, _)| *address == addr(3)));
    assert!(requests
        .iter()
        .all(|(_, kind)| *kind == RequestKind::Preliminary));
    // Parallel fallback chains may reach the live seed more than once,
    // but no exhaustion notice fires and the anchor notice fired once.
    tokio::time::sleep(Duration::from_secs(5)).await;
    while let Ok(notice) = h.notices.try_recv() {
        assert_eq!(notice, SyncNotice::DataReceived);
    }
}

#[tokio::test(start_paused = true)]
async fn test_update_round_goes_to_anchor_first() {
    let seeds = vec![addr(1), addr(2), addr(3)];
    let mut h = start_with_seeds(seeds);
    for n in 1..=3 {
        h.transport.script(addr(n), PeerScript::Respond);
    }

    h.handle.request_preliminary_data();
    // Two parallel preliminary responses plus the delayed anchor notice.
    let mut got = Vec::new();
    for _ in 0..3 {
        got.push(h.notices.recv().await.unwrap());
    }
    assert_eq!(
        got.iter()
            .filter(|n| **n == SyncNotice::DataReceived)
            .count(),
        2
    );
    assert!(got.contains(&SyncNotice::PreliminaryDataReceived));

    // The anchor is the first seed dispatched, since everyone answers
    // instantly and dispatches are staggered.
    let anchor = requests_sent(&h.transport)[0].0.clone();

    h.handle.request_update_data();
    got.clear();
    for _ in 0..3 {
        got.push(h.notices.recv().await.unwrap());
    }
    assert_eq!(
        got.iter()
            .filter(|n| **n == SyncNotice::UpdatedDataReceived)
            .count(),
        1
    );
    assert_eq!(
        got.iter()
            .filter(|n| **n == SyncNotice::DataReceived)
            .count(),
        2
    );

    settle().await;
    let updated: Vec<NodeAddress> = requests_sent(&h.transport)
        .into_iter()
        .filter(|(_, kind)| *kind == RequestKind::Updated)
        .map(|(address, _)| address)
        .collect();
    assert_eq!(updated.len(), 2);
    assert_eq!(updated[0], anchor);
}

#[tokio::test(start_paused = true)]
async fn test_update_before_preliminary_is_ignored() {
    let mut h = start_with_seeds(vec![addr(1)]);
    h.transport.script(addr(1), PeerScript::Respond);

    h.handle.request_update_data();
    settle().await;
    assert!(requests_sent(&h.transport).is_empty());
    assert!(h.notices.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_wrong_nonce_dropped_then_seed_exhaustion_notice() {
    let mut h = start_with_seeds(vec![addr(1)]);
    h.transport.script(addr(1), PeerScript::RespondWrongNonce);

    h.handle.request_preliminary_data();

    // The mismatched response is dropped; the session dies by timeout
    // and with no candidates left the seed-exhaustion notice fires.
    assert_eq!(
        h.notices.recv().await,
        Some(SyncNotice::NoSeedNodeAvailable)
    );
    assert!(h.notices.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_falls_back_to_reported_peers_when_seeds_fail() {
    let mut pool = MemoryPeerPool::with_seeds(vec![addr(1)]);
    pool.add_reported(addr(10), 1_000);
    pool.add_reported(addr(11), 2_000);
    let mut h = start(pool, SyncConfig::default());
    h.transport.script(addr(1), PeerScript::FailSend);
    h.transport.script(addr(10), PeerScript::Respond);
    h.transport.script(addr(11), PeerScript::FailSend);

    h.handle.request_preliminary_data();

    assert_eq!(
        h.notices.recv().await,
        Some(SyncNotice::NoSeedNodeAvailable)
    );
    // Most recent reported peer is tried first; it fails, the older one
    // answers.
    assert_eq!(h.notices.recv().await, Some(SyncNotice::DataReceived));
    assert_eq!(
        h.notices.recv().await,
        Some(SyncNotice::PreliminaryDataReceived)
    );

    settle().await;
    let targets: Vec<NodeAddress> = requests_sent(&h.transport)
        .into_iter()
        .map(|(address, _)| address)
        .collect();
    assert_eq!(targets, vec![addr(1), addr(11), addr(10)]);
}

#[tokio::test(start_paused = true)]
async fn test_update_exhaustion_falls_back_to_reported_peers() {
    let mut pool = MemoryPeerPool::with_seeds(vec![addr(1)]);
    pool.add_reported(addr(10), 1_000);
    pool.add_reported(addr(11), 2_000);
    let mut h = start(pool, SyncConfig::default());
    h.transport.script(addr(1), PeerScript::FailSend);
    h.transport.script(addr(10), PeerScript::Respond);
    h.transport.script(addr(11), PeerScript::FailSend);

    // Bootstrap anchors on addr(10), the only reachable peer.
    h.handle.request_preliminary_data();
    assert_eq!(
        h.notices.recv().await,
        Some(SyncNotice::NoSeedNodeAvailable)
    );
    assert_eq!(h.notices.recv().await, Some(SyncNotice::DataReceived));
    assert_eq!(
        h.notices.recv().await,
        Some(SyncNotice::PreliminaryDataReceived)
    );

    // The anchor goes dark; the previously unreachable reported peer
    // comes back.
    h.transport.script(addr(10), PeerScript::FailSend);
    h.transport.script(addr(11), PeerScript::Respond);

    // Every update candidate (anchor + seed) fails, so the round must
    // fall back to reported peers instead of stalling.
    h.handle.request_update_data();
    assert_eq!(
        h.notices.recv().await,
        Some(SyncNotice::UpdatedDataReceived)
    );
    assert_eq!(h.notices.recv().await, Some(SyncNotice::DataReceived));
    // With an anchor on record no exhaustion notice fires.
    assert!(h.notices.try_recv().is_err());

    settle().await;
    assert!(requests_sent(&h.transport)
        .into_iter()
        .any(|(address, kind)| address == addr(11) && kind == RequestKind::Updated));
}

#[tokio::test(start_paused = true)]
async fn test_late_preliminary_response_completes_update_round() {
    let mut h = start_with_seeds(vec![addr(1), addr(2)]);
    h.transport.script(addr(1), PeerScript::Respond);
    h.transport.script(addr(2), PeerScript::Silent);

    h.handle.request_preliminary_data();
    assert_eq!(h.notices.recv().await, Some(SyncNotice::DataReceived));
    assert_eq!(
        h.notices.recv().await,
        Some(SyncNotice::PreliminaryDataReceived)
    );
    settle().await;
    // Advance past the dispatch stagger so the request to the second
    // seed has been sent regardless of the shuffled dispatch order.
    tokio::time::sleep(Duration::from_millis(200)).await;
    settle().await;

    // The silent seed still has a preliminary request pending; remember
    // its nonce and connection. Successful sends open connections in
    // order, numbered from 1.
    let pending = h
        .transport
        .sent()
        .iter()
        .enumerate()
        .find_map(|(i, (address, message))| match message {
            WireMessage::Request(req) if *address == addr(2) => Some((i, req.nonce)),
            _ => None,
        });
    let (idx, nonce) = pending.expect("preliminary request to the silent seed");
    let conn = tradewind_core::ConnectionId(idx as u64 + 1);

    // The anchor stops answering, then the stale preliminary response
    // arrives. The first success of any kind completes the update round.
    h.transport.script(addr(1), PeerScript::Silent);
    h.handle.request_update_data();
    settle().await;

    let response = ResponseEnvelope {
        request_nonce: nonce,
        entries: Vec::new(),
        bulk_items: Vec::new(),
        entries_truncated: false,
        bulk_truncated: false,
    };
    let _ = h.handle.event_sender().send(SyncEvent::MessageReceived {
        conn,
        message: WireMessage::Response(response),
    });

    assert_eq!(
        h.notices.recv().await,
        Some(SyncNotice::UpdatedDataReceived)
    );
    assert_eq!(h.notices.recv().await, Some(SyncNotice::DataReceived));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_request_is_rejected_until_forced_cleanup() {
    let h = start_with_seeds(vec![addr(1)]);
    h.transport.script(addr(1), PeerScript::Silent);

    h.handle.request_preliminary_data();
    settle().await;
    assert_eq!(requests_sent(&h.transport).len(), 1);

    // A second round while the first is still pending must not open a
    // second session against the same peer.
    h.handle.request_preliminary_data();
    settle().await;
    assert_eq!(requests_sent(&h.transport).len(), 1);

    // The watchdog clears the stuck session after the cleanup window and
    // the address becomes requestable again.
    tokio::time::sleep(Duration::from_secs(121)).await;
    settle().await;
    h.handle.request_preliminary_data();
    settle().await;
    assert_eq!(requests_sent(&h.transport).len(), 2);
    drop(h.notices);
}

#[tokio::test(start_paused = true)]
async fn test_old_protocol_version_closes_connection() {
    let h = start_with_seeds(vec![addr(1)]);
    let conn = h.transport.open_inbound(addr(50));

    let request = RequestEnvelope {
        kind: RequestKind::Preliminary,
        nonce: 7,
        protocol_version: 1,
        responder_address: None,
        excluded_ids: Vec::new(),
        delta_sketch: None,
    };
    let _ = h.handle.event_sender().send(SyncEvent::MessageReceived {
        conn,
        message: WireMessage::Request(request),
    });

    settle().await;
    assert_eq!(
        h.transport.closed(),
        vec![(conn, CloseReason::VersionNotSupported)]
    );
    assert!(h.transport.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_inbound_request_served_with_truncation() {
    let config = SyncConfig {
        max_response_entries: 5,
        ..SyncConfig::default()
    };
    let h = start(MemoryPeerPool::with_seeds(vec![addr(1)]), config);
    for n in 0..8 {
        h.store.put_entry(ProtectedEntry::new(id(n), vec![0; 16], 1));
    }

    let conn = h.transport.open_inbound(addr(50));
    let request = RequestEnvelope {
        kind: RequestKind::Preliminary,
        nonce: 77,
        protocol_version: PROTOCOL_VERSION,
        responder_address: None,
        excluded_ids: vec![id(0)],
        delta_sketch: None,
    };
    let _ = h.handle.event_sender().send(SyncEvent::MessageReceived {
        conn,
        message: WireMessage::Request(request),
    });

    settle().await;
    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    match &sent[0].1 {
        WireMessage::Response(response) => {
            assert_eq!(response.request_nonce, 77);
            assert_eq!(response.entries.len(), 5);
            assert!(response.entries_truncated);
            assert!(response.entries.iter().all(|e| e.id != id(0)));
        }
        other => panic!("expected response, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_all_connections_lost() {
    let mut h = start_with_seeds(vec![addr(1)]);
    h.transport.script(addr(1), PeerScript::Respond);

    let _ = h
        .handle
        .event_sender()
        .send(SyncEvent::AllConnectionsLost);
    settle().await;
    assert!(requests_sent(&h.transport).is_empty());

    // The retry tick fires after the restart delay and runs the
    // preliminary round.
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(h.notices.recv().await, Some(SyncNotice::DataReceived));
    assert_eq!(
        h.notices.recv().await,
        Some(SyncNotice::PreliminaryDataReceived)
    );
}

#[tokio::test(start_paused = true)]
async fn test_banned_peer_dropped_from_seed_candidates() {
    let mut pool = MemoryPeerPool::with_seeds(vec![addr(1), addr(2)]);
    // The transport numbers connections from 1; the inbound connection
    // opened below is the first one.
    pool.ban_connection(tradewind_core::ConnectionId(1));
    let mut h = start(pool, SyncConfig::default());
    h.transport.script(addr(2), PeerScript::Respond);

    let conn = h.transport.open_inbound(addr(1));
    let _ = h.handle.event_sender().send(SyncEvent::Disconnected {
        conn,
        reason: CloseReason::PeerGone,
    });
    settle().await;

    h.handle.request_preliminary_data();
    assert_eq!(h.notices.recv().await, Some(SyncNotice::DataReceived));

    settle().await;
    let targets: Vec<NodeAddress> = requests_sent(&h.transport)
        .into_iter()
        .map(|(address, _)| address)
        .collect();
    assert!(!targets.contains(&addr(1)));
    assert!(targets.contains(&addr(2)));
}

#[tokio::test(start_paused = true)]
async fn test_merged_data_lands_in_store() {
    // A seed that actually serves content: wire two managers together by
    // hand, feeding the requester the responder's real response.
    let mut h = start_with_seeds(vec![addr(1)]);
    h.transport.script(addr(1), PeerScript::Silent);

    h.handle.request_preliminary_data();
    settle().await;
    let sent = h.transport.sent();
    let nonce = match &sent[0].1 {
        WireMessage::Request(req) => req.nonce,
        other => panic!("expected request, got {other:?}"),
    };

    // Answer by hand with real payloads on the connection the transport
    // opened for the outbound request.
    let seed_store = MemoryStore::new();
    seed_store.put_entry(ProtectedEntry::new(id(1), vec![9; 32], 4));
    let response = {
        use tradewind_sync::SyncStore;
        let inbound = RequestEnvelope {
            kind: RequestKind::Preliminary,
            nonce,
            protocol_version: PROTOCOL_VERSION,
            responder_address: None,
            excluded_ids: Vec::new(),
            delta_sketch: None,
        };
        seed_store.build_response(&inbound, 10_000)
    };
    let conn = tradewind_core::ConnectionId(1);
    let _ = h.handle.event_sender().send(SyncEvent::MessageReceived {
        conn,
        message: WireMessage::Response(response),
    });

    assert_eq!(h.notices.recv().await, Some(SyncNotice::DataReceived));
    assert_eq!(h.store.entry_len(), 1);
    assert_eq!(h.store.merged_from(), vec![addr(1)]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_the_manager() {
    let h = start_with_seeds(vec![addr(1)]);
    h.transport.script(addr(1), PeerScript::Respond);

    h.handle.shutdown();
    settle().await;
    h.handle.request_preliminary_data();
    settle().await;
    assert!(requests_sent(&h.transport).is_empty());
}
