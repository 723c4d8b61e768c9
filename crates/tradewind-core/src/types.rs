//! Strong type definitions for Tradewind.
//!
//! All identifiers are newtypes to prevent misuse at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 20-byte item identifier: the stable 160-bit identity of a payload
/// held in the replicated store.
///
/// The store computes it from payload content; the sync layer only needs
/// it to be stable, hashable and cheap to copy.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub [u8; 20]);

impl ItemId {
    /// Create a new ItemId from raw bytes.
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 20 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for ItemId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 20]> for ItemId {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

/// Overlay address of a node (host + port).
///
/// Seed nodes, reported peers and persisted peers are all identified by
/// their NodeAddress; equality is structural.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    /// Host name (onion address or DNS name).
    pub host: String,
    /// Listening port.
    pub port: u16,
}

impl NodeAddress {
    /// Create a new address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The "host:port" form used in logs.
    pub fn full_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeAddress({}:{})", self.host, self.port)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Transport-assigned identity of one live connection.
///
/// Stable for the lifetime of the connection, never reused concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// An append-only payload with no independent protection or expiry
/// semantics. Opaque to the sync layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BulkItem {
    /// Stable identity.
    pub id: ItemId,
    /// Serialized payload bytes.
    pub payload: Vec<u8>,
}

impl BulkItem {
    /// Create a new bulk item.
    pub fn new(id: ItemId, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    /// Serialized size in bytes (identity + payload).
    pub fn serialized_size(&self) -> usize {
        self.id.0.len() + self.payload.len()
    }
}

/// A payload carrying its own protection envelope (ownership, expiry,
/// sequence). The envelope itself is opaque here; only the sequence number
/// is surfaced because responders log it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtectedEntry {
    /// Stable identity.
    pub id: ItemId,
    /// Serialized payload bytes, protection envelope included.
    pub payload: Vec<u8>,
    /// Envelope sequence number (monotonic per id).
    pub sequence: u32,
}

impl ProtectedEntry {
    /// Create a new protected entry.
    pub fn new(id: ItemId, payload: Vec<u8>, sequence: u32) -> Self {
        Self {
            id,
            payload,
            sequence,
        }
    }

    /// Serialized size in bytes (identity + payload + sequence).
    pub fn serialized_size(&self) -> usize {
        self.id.0.len() + self.payload.len() + 4
    }
}
