//! Keyed derivation of sketch keys from item identities.
//!
//! The reconciliation sketch operates on 64-bit keys, not raw item ids.
//! Keys are derived with a keyed Blake3 hash under a 128-bit salt so that
//! remote peers cannot grind identities into colliding keys unless they
//! know the salt the requesting node chose.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 64-bit sketch key.
pub type Key = u64;

/// A 128-bit salt for key derivation.
///
/// Both sides of an exchange must use the same salt for their sketches to
/// be combinable; the requester picks it and ships it in the sketch wire
/// form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Salt(pub [u8; 16]);

impl Salt {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Generate a random salt.
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// The all-zero salt (sentinel for "no sketch").
    pub const ZERO: Self = Self([0u8; 16]);
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Salt({})", hex::encode(self.0))
    }
}

/// Derive the 64-bit sketch key for an item identity under a salt.
///
/// The salt is expanded into a 32-byte Blake3 key by repetition; the first
/// eight output bytes, little-endian, become the key. Deterministic for a
/// given (salt, id) pair.
pub fn item_key(salt: &Salt, id: &crate::ItemId) -> Key {
    let mut hash_key = [0u8; 32];
    hash_key[..16].copy_from_slice(&salt.0);
    hash_key[16..].copy_from_slice(&salt.0);

    let hash = blake3::keyed_hash(&hash_key, id.as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ItemId;

    #[test]
    fn test_item_key_deterministic() {
        let salt = Salt::from_bytes([7; 16]);
        let id = ItemId::from_bytes([0x11; 20]);
        assert_eq!(item_key(&salt, &id), item_key(&salt, &id));
    }

    #[test]
    fn test_item_key_depends_on_salt() {
        let id = ItemId::from_bytes([0x11; 20]);
        let k1 = item_key(&Salt::from_bytes([1; 16]), &id);
        let k2 = item_key(&Salt::from_bytes([2; 16]), &id);
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_item_key_depends_on_id() {
        let salt = Salt::from_bytes([7; 16]);
        let k1 = item_key(&salt, &ItemId::from_bytes([0x11; 20]));
        let k2 = item_key(&salt, &ItemId::from_bytes([0x12; 20]));
        assert_ne!(k1, k2);
    }
}
