//! Sync protocol message envelopes.
//!
//! Requests are built by the store collaborator and carried opaquely by
//! the sync layer, which only inspects the kind, the protocol version and
//! the correlation nonce. Envelopes are CBOR on the wire.

use serde::{Deserialize, Serialize};

use tradewind_core::{BulkItem, ItemId, NodeAddress, ProtectedEntry};

use crate::error::{Result, SyncError};

/// Current protocol version, stamped into outbound requests.
pub const PROTOCOL_VERSION: u16 = 2;

/// Oldest protocol version a responder will serve. Connections carrying
/// older requests are closed.
pub const MIN_PROTOCOL_VERSION: u16 = 2;

/// The two request phases of a sync round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    /// First contact: ask for a full (or near-full) snapshot.
    Preliminary,
    /// Follow-up: ask for what changed since the preliminary snapshot.
    Updated,
}

/// One inbound or outbound data request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Which phase this request belongs to.
    pub kind: RequestKind,
    /// Correlation nonce echoed by the response.
    pub nonce: u32,
    /// Requester's protocol version.
    pub protocol_version: u16,
    /// Address the responder should report the requester under; only
    /// present on updated requests (the requester is published by then).
    pub responder_address: Option<NodeAddress>,
    /// Identities the requester already holds; the responder leaves them
    /// out of its response.
    pub excluded_ids: Vec<ItemId>,
    /// Optional reconciliation sketch in its wire form, opaque here;
    /// stores that support delta responses decode it.
    pub delta_sketch: Option<Vec<u8>>,
}

/// One data response, capped per payload kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Nonce of the request this answers.
    pub request_nonce: u32,
    /// Protected entries, at most the responder's cap.
    pub entries: Vec<ProtectedEntry>,
    /// Bulk items, at most the responder's cap.
    pub bulk_items: Vec<BulkItem>,
    /// True when eligible entries were dropped to respect the cap;
    /// consumers must not assume completeness.
    pub entries_truncated: bool,
    /// Same, for bulk items.
    pub bulk_truncated: bool,
}

/// Per-kind counts and serialized byte sizes of a response. Logged by
/// both sides as part of the contract, not merely as diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseAccounting {
    /// Number of protected entries included.
    pub entry_count: usize,
    /// Serialized bytes of the included protected entries.
    pub entry_bytes: usize,
    /// Number of bulk items included.
    pub bulk_count: usize,
    /// Serialized bytes of the included bulk items.
    pub bulk_bytes: usize,
}

impl ResponseEnvelope {
    /// Compute the per-kind accounting for this response.
    pub fn accounting(&self) -> ResponseAccounting {
        ResponseAccounting {
            entry_count: self.entries.len(),
            entry_bytes: self.entries.iter().map(ProtectedEntry::serialized_size).sum(),
            bulk_count: self.bulk_items.len(),
            bulk_bytes: self.bulk_items.iter().map(BulkItem::serialized_size).sum(),
        }
    }
}

/// Everything that travels between two nodes on a sync connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireMessage {
    /// A data request.
    Request(RequestEnvelope),
    /// A data response.
    Response(ResponseEnvelope),
}

impl WireMessage {
    /// Encode to CBOR bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf).map_err(|e| SyncError::Codec(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from CBOR bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        ciborium::de::from_reader(data).map_err(|e| SyncError::Codec(e.to_string()))
    }
}
