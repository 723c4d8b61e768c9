//! The replicated-store contract the sync layer consumes.
//!
//! Conflict resolution, expiry and signature validation all live in the
//! store collaborator; the sync layer only asks it to build envelopes,
//! serve capped responses and merge what a peer sent back.

use tradewind_core::NodeAddress;

use crate::messages::{RequestEnvelope, ResponseEnvelope};

/// Store operations the sync protocol delegates to.
///
/// All methods run on the manager's actor task (or a short-lived send
/// task) and must not block for long; implementations own their interior
/// mutability.
pub trait SyncStore: Send + Sync {
    /// Build a preliminary (first-contact) request carrying the keys this
    /// node already holds.
    fn build_preliminary_request(&self, nonce: u32) -> RequestEnvelope;

    /// Build an updated (incremental) request. `self_address` is included
    /// so the responder can report this node; `None` if the node has not
    /// published its address yet.
    fn build_update_request(&self, self_address: Option<&NodeAddress>, nonce: u32)
        -> RequestEnvelope;

    /// Build a response to an inbound request, including at most
    /// `max_entries` payloads of each kind and setting the per-kind
    /// truncation flags when the cap was hit.
    fn build_response(&self, request: &RequestEnvelope, max_entries: usize) -> ResponseEnvelope;

    /// Merge a peer's response into the local store.
    fn merge_response(&self, response: &ResponseEnvelope, from: &NodeAddress);
}

/// An in-memory store for tests.
pub mod memory {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use tradewind_core::{item_key, BulkItem, ItemId, ProtectedEntry, Salt};
    use tradewind_sketch::{encode_sketch, KeySetDelta};

    use crate::messages::{RequestKind, PROTOCOL_VERSION};

    /// Map-backed store that serves and merges items verbatim.
    #[derive(Default)]
    pub struct MemoryStore {
        bulk: Mutex<BTreeMap<ItemId, BulkItem>>,
        entries: Mutex<BTreeMap<ItemId, ProtectedEntry>>,
        merges: Mutex<Vec<NodeAddress>>,
        sketch_salt: Option<Salt>,
    }

    impl MemoryStore {
        /// Empty store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Empty store that attaches a reconciliation sketch of its key
        /// set to outbound requests, under the given salt.
        pub fn with_sketch_salt(salt: Salt) -> Self {
            Self {
                sketch_salt: Some(salt),
                ..Default::default()
            }
        }

        /// Insert a bulk item.
        pub fn put_bulk(&self, item: BulkItem) {
            self.bulk.lock().unwrap().insert(item.id, item);
        }

        /// Insert a protected entry.
        pub fn put_entry(&self, entry: ProtectedEntry) {
            self.entries.lock().unwrap().insert(entry.id, entry);
        }

        /// Number of bulk items held.
        pub fn bulk_len(&self) -> usize {
            self.bulk.lock().unwrap().len()
        }

        /// Number of protected entries held.
        pub fn entry_len(&self) -> usize {
            self.entries.lock().unwrap().len()
        }

        /// Peers whose responses were merged, in order.
        pub fn merged_from(&self) -> Vec<NodeAddress> {
            self.merges.lock().unwrap().clone()
        }

        fn known_ids(&self) -> Vec<ItemId> {
            let mut ids: Vec<ItemId> = self.bulk.lock().unwrap().keys().copied().collect();
            ids.extend(self.entries.lock().unwrap().keys().copied());
            ids
        }

        fn build_request(&self, kind: RequestKind, responder: Option<&NodeAddress>, nonce: u32) -> RequestEnvelope {
            let excluded_ids = self.known_ids();
            let delta_sketch = self.sketch_salt.map(|salt| {
                let mut sketch = KeySetDelta::for_capacity(salt, excluded_ids.len() as u64);
                sketch.xor_filtered(excluded_ids.iter().map(|id| item_key(&salt, id)));
                encode_sketch(&sketch)
            });
            RequestEnvelope {
                kind,
                nonce,
                protocol_version: PROTOCOL_VERSION,
                responder_address: responder.cloned(),
                excluded_ids,
                delta_sketch,
            }
        }
    }

    impl SyncStore for MemoryStore {
        fn build_preliminary_request(&self, nonce: u32) -> RequestEnvelope {
            self.build_request(RequestKind::Preliminary, None, nonce)
        }

        fn build_update_request(
            &self,
            self_address: Option<&NodeAddress>,
            nonce: u32,
        ) -> RequestEnvelope {
            self.build_request(RequestKind::Updated, self_address, nonce)
        }

        fn build_response(&self, request: &RequestEnvelope, max_entries: usize) -> ResponseEnvelope {
            let excluded: std::collections::BTreeSet<ItemId> =
                request.excluded_ids.iter().copied().collect();

            let mut bulk_truncated = false;
            let mut bulk_items = Vec::new();
            for item in self.bulk.lock().unwrap().values() {
                if excluded.contains(&item.id) {
                    continue;
                }
                if bulk_items.len() == max_entries {
                    bulk_truncated = true;
                    break;
                }
                bulk_items.push(item.clone());
            }

            let mut entries_truncated = false;
            let mut entries = Vec::new();
            for entry in self.entries.lock().unwrap().values() {
                if excluded.contains(&entry.id) {
                    continue;
                }
                if entries.len() == max_entries {
                    entries_truncated = true;
                    break;
                }
                entries.push(entry.clone());
            }

            ResponseEnvelope {
                request_nonce: request.nonce,
                entries,
                bulk_items,
                entries_truncated,
                bulk_truncated,
            }
        }

        fn merge_response(&self, response: &ResponseEnvelope, from: &NodeAddress) {
            for item in &response.bulk_items {
                self.put_bulk(item.clone());
            }
            for entry in &response.entries {
                self.put_entry(entry.clone());
            }
            self.merges.lock().unwrap().push(from.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;
    use tradewind_core::{BulkItem, ItemId, NodeAddress, ProtectedEntry, Salt};
    use tradewind_sketch::decode_sketch;

    fn id(n: u32) -> ItemId {
        let mut bytes = [0u8; 20];
        bytes[..4].copy_from_slice(&n.to_be_bytes());
        ItemId::from_bytes(bytes)
    }

    fn filled_store(entries: usize) -> MemoryStore {
        let store = MemoryStore::new();
        for n in 0..entries {
            store.put_entry(ProtectedEntry::new(id(n as u32), vec![0; 8], 1));
        }
        store
    }

    #[test]
    fn test_response_truncated_at_cap() {
        let store = filled_store(15_000);
        let request = store.build_preliminary_request(1);
        // Request built from the same store excludes everything; use an
        // empty-handed requester instead.
        let empty_requester = MemoryStore::new().build_preliminary_request(1);
        let response = store.build_response(&empty_requester, 10_000);
        assert_eq!(response.entries.len(), 10_000);
        assert!(response.entries_truncated);
        assert!(!response.bulk_truncated);
        drop(request);
    }

    #[test]
    fn test_response_complete_under_cap() {
        let store = filled_store(500);
        let request = MemoryStore::new().build_preliminary_request(2);
        let response = store.build_response(&request, 10_000);
        assert_eq!(response.entries.len(), 500);
        assert!(!response.entries_truncated);
    }

    #[test]
    fn test_response_honors_excluded_ids() {
        let store = filled_store(10);
        let requester = filled_store(4); // already holds ids 0..4
        let request = requester.build_preliminary_request(3);
        let response = store.build_response(&request, 10_000);
        assert_eq!(response.entries.len(), 6);
        assert!(response.entries.iter().all(|e| !request.excluded_ids.contains(&e.id)));
    }

    #[test]
    fn test_merge_adds_items_and_records_peer(){
        let store = MemoryStore::new();
        let peer = NodeAddress::new("peer.example.net", 4000);
        let response = ResponseEnvelope {
            request_nonce: 9,
            entries: vec![ProtectedEntry::new(id(1), vec![1], 1)],
            bulk_items: vec![BulkItem::new(id(2), vec![2])],
            entries_truncated: false,
            bulk_truncated: false,
        };
        store.merge_response(&response, &peer);
        assert_eq!(store.entry_len(), 1);
        assert_eq!(store.bulk_len(), 1);
        assert_eq!(store.merged_from(), vec![peer]);
    }

    #[test]
    fn test_sketch_attached_and_decodable() {
        let store = MemoryStore::with_sketch_salt(Salt::from_bytes([5; 16]));
        for n in 0..50 {
            store.put_bulk(BulkItem::new(id(n), vec![0; 4]));
        }
        let request = store.build_preliminary_request(4);
        let wire = request.delta_sketch.expect("sketch attached");
        let sketch = decode_sketch(&wire).unwrap().expect("a sketch");
        let keys = sketch.decode().expect("50 keys decode");
        assert_eq!(keys.len(), 50);
    }
}
