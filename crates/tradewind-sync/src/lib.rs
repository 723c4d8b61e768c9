//! # Tradewind Sync
//!
//! Bootstrap data synchronization for Tradewind nodes.
//!
//! ## Overview
//!
//! A node joining the network holds little or no network data. The sync
//! manager contacts seed nodes in two phases to catch up:
//!
//! 1. **Preliminary round**: before the node publishes its own address,
//!    it asks a few seeds in parallel for a snapshot, excluding whatever
//!    it already holds. The first seed to answer becomes the *anchor*.
//! 2. **Update round**: once the node is published, it asks the anchor
//!    (plus a couple of extra seeds) for everything that changed in the
//!    meantime.
//!
//! Failed candidates fall through priority-ordered backup chains; when
//! every seed is unreachable the manager falls back to recently seen
//! ordinary peers. Connectivity loss pauses the manager and a retry
//! timer restarts the whole dance.
//!
//! ## Key Properties
//!
//! - **Single-threaded core**: every state transition arrives as one
//!   [`SyncEvent`] on one channel, so sessions never race
//! - **Nonce-correlated**: responses must echo the request nonce or they
//!   are dropped
//! - **Bounded responses**: responders cap payload counts per kind and
//!   flag truncation rather than streaming unbounded snapshots
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tradewind_sync::{
//!     event_channel, memory_peers::MemoryPeerPool, memory_store::MemoryStore,
//!     memory_transport::MemoryTransport, SyncConfig, SyncManager,
//! };
//! use tradewind_core::NodeAddress;
//!
//! #[tokio::main]
//! async fn main() {
//!     let seeds = vec![NodeAddress::new("seed1.example.net", 8000)];
//!     let (tx, rx) = event_channel();
//!     let transport = Arc::new(MemoryTransport::new(tx.clone()));
//!     let (manager, handle, mut notices) = SyncManager::new(
//!         SyncConfig::default(),
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(MemoryPeerPool::with_seeds(seeds)),
//!         transport,
//!         (tx, rx),
//!     );
//!     tokio::spawn(manager.run());
//!
//!     handle.request_preliminary_data();
//!     while let Some(notice) = notices.recv().await {
//!         println!("sync notice: {notice:?}");
//!     }
//! }
//! ```

pub mod error;
pub mod event;
pub mod manager;
pub mod messages;
pub mod peers;
pub mod requester;
pub mod responder;
pub mod store;
pub mod timer;
pub mod transport;

pub use error::{Result, SyncError};
pub use event::{
    event_channel, EventReceiver, EventSender, NoticeReceiver, NoticeSender, SyncEvent, SyncNotice,
};
pub use manager::{SyncConfig, SyncHandle, SyncManager};
pub use messages::{
    RequestEnvelope, RequestKind, ResponseAccounting, ResponseEnvelope, WireMessage,
    MIN_PROTOCOL_VERSION, PROTOCOL_VERSION,
};
pub use peers::{PeerPool, PeerRecord};
pub use store::SyncStore;
pub use transport::{CloseReason, Transport};

pub use peers::memory as memory_peers;
pub use store::memory as memory_store;
pub use transport::memory as memory_transport;
