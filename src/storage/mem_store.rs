//! In-memory backing store.

use super::{BackingStore, WriteBatch};
use crate::types::hash::Hash;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Thread-safe in-memory [`BackingStore`].
///
/// Keys are kept sorted so [`MemStore::root`] is a deterministic digest of
/// the whole content.
#[derive(Default)]
pub struct MemStore {
    data: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Digest of every key-value pair, in key order.
    pub fn root(&self) -> Hash {
        Hash::tagged(b"STORE", &*self.lock())
    }

    /// Copy of every pair whose key starts with `prefix`.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.lock()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl BackingStore for MemStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.lock().get(key).cloned()
    }

    fn apply_batch(&self, writes: WriteBatch) {
        let mut data = self.lock();
        for (key, value) in writes {
            match value {
                Some(v) => {
                    data.insert(key, v);
                }
                None => {
                    data.remove(&key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_inserts_and_deletes() {
        let store = MemStore::new();
        store.put(b"a", b"1".to_vec());
        store.apply_batch(vec![
            (b"a".to_vec(), None),
            (b"b".to_vec(), Some(b"2".to_vec())),
        ]);
        assert_eq!(store.get(b"a"), None);
        assert_eq!(store.get(b"b"), Some(b"2".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn root_tracks_content() {
        let store = MemStore::new();
        let empty = store.root();
        store.put(b"k", b"v".to_vec());
        let one = store.root();
        assert_ne!(empty, one);
        store.apply_batch(vec![(b"k".to_vec(), None)]);
        assert_eq!(store.root(), empty);
    }

    #[test]
    fn scan_prefix_stops_at_prefix_end() {
        let store = MemStore::new();
        store.put(b"oid:1", vec![1]);
        store.put(b"oid:2", vec![2]);
        store.put(b"pkg:x", vec![3]);
        let hits = store.scan_prefix(b"oid:");
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|(k, _)| k.starts_with(b"oid:")));
    }
}
