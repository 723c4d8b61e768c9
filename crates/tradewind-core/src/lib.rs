//! # Tradewind Core
//!
//! Pure primitives for the Tradewind overlay: item identities, peer
//! addresses, and the keyed hashing that maps stored items onto the 64-bit
//! key space used by the reconciliation sketch.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`ItemId`] - 160-bit identity of a replicated payload
//! - [`BulkItem`] / [`ProtectedEntry`] - the two payload kinds held in the store
//! - [`NodeAddress`] - overlay address of a peer
//! - [`Salt`] / [`Key`] - keyed-hash parameters and the derived 64-bit key

pub mod keys;
pub mod types;

pub use keys::{item_key, Key, Salt};
pub use types::{BulkItem, ConnectionId, ItemId, NodeAddress, ProtectedEntry};
