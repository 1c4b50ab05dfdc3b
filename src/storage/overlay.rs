//! Per-transaction write buffer.

use super::{BackingStore, KvStore, WriteBatch};
use std::cell::RefCell;
use std::collections::BTreeMap;

/// Write-through overlay on top of a [`BackingStore`].
///
/// Buffers writes in memory while reading through to the base for keys
/// not yet written. Every value read from the base is remembered, so a
/// caller can check with [`first_conflict`](Overlay::first_conflict) that
/// nothing it depended on changed before it commits.
/// [`commit`](Overlay::commit) hands every write to the base in one batch;
/// dropping the overlay discards them.
pub struct Overlay<'a> {
    base: &'a dyn BackingStore,
    /// Pending writes: `Some(value)` for insertions, `None` for deletions.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    /// First value seen in the base for every key read through.
    reads: RefCell<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl<'a> Overlay<'a> {
    pub fn new(base: &'a dyn BackingStore) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
            reads: RefCell::new(BTreeMap::new()),
        }
    }

    /// Number of distinct keys read from the base.
    pub fn reads(&self) -> usize {
        self.reads.borrow().len()
    }

    /// First key whose base value no longer matches what this overlay read.
    ///
    /// Only meaningful while no other writer can reach the base, i.e. under
    /// the same lock that guards the following [`commit`](Self::commit).
    pub fn first_conflict(&self) -> Option<Vec<u8>> {
        self.reads
            .borrow()
            .iter()
            .find(|(key, seen)| self.base.get(key) != **seen)
            .map(|(key, _)| key.clone())
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Consumes the overlay and returns the pending writes in key order.
    pub fn into_writes(self) -> WriteBatch {
        self.writes.into_iter().collect()
    }

    /// Applies every pending write to the base store atomically and
    /// returns how many keys were touched.
    pub fn commit(self) -> usize {
        let base = self.base;
        let writes = self.into_writes();
        let n = writes.len();
        if n > 0 {
            base.apply_batch(writes);
        }
        n
    }
}

impl KvStore for Overlay<'_> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(v) = self.writes.get(key) {
            return v.clone();
        }
        let value = self.base.get(key);
        self.reads
            .borrow_mut()
            .entry(key.to_vec())
            .or_insert_with(|| value.clone());
        value
    }

    fn put(&mut self, key: &[u8], value: Vec<u8>) {
        self.writes.insert(key.to_vec(), Some(value));
    }

    fn delete(&mut self, key: &[u8]) {
        self.writes.insert(key.to_vec(), None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStore;

    fn base_with(pairs: &[(&[u8], &[u8])]) -> MemStore {
        let store = MemStore::new();
        for (k, v) in pairs {
            store.put(k, v.to_vec());
        }
        store
    }

    #[test]
    fn overlay_reads_through_to_base() {
        let base = base_with(&[(b"key", b"value")]);
        let overlay = Overlay::new(&base);
        assert_eq!(overlay.get(b"key"), Some(b"value".to_vec()));
        assert_eq!(overlay.get(b"missing"), None);
    }

    #[test]
    fn overlay_write_shadows_base() {
        let base = base_with(&[(b"key", b"old")]);
        let mut overlay = Overlay::new(&base);
        overlay.put(b"key", b"new".to_vec());
        assert_eq!(overlay.get(b"key"), Some(b"new".to_vec()));
        assert_eq!(base.get(b"key"), Some(b"old".to_vec()));
    }

    #[test]
    fn overlay_delete_returns_none() {
        let base = base_with(&[(b"key", b"value")]);
        let mut overlay = Overlay::new(&base);
        overlay.delete(b"key");
        assert_eq!(overlay.get(b"key"), None);
    }

    #[test]
    fn dropped_overlay_leaves_base_untouched() {
        let base = base_with(&[(b"a", b"1")]);
        let before = base.root();
        {
            let mut overlay = Overlay::new(&base);
            overlay.put(b"a", b"2".to_vec());
            overlay.put(b"b", b"3".to_vec());
        }
        assert_eq!(base.root(), before);
    }

    #[test]
    fn changed_read_is_a_conflict() {
        let base = base_with(&[(b"time", b"1"), (b"other", b"x")]);
        let mut overlay = Overlay::new(&base);
        assert_eq!(overlay.get(b"time"), Some(b"1".to_vec()));
        assert_eq!(overlay.get(b"absent"), None);
        overlay.put(b"time", b"2".to_vec());
        assert_eq!(overlay.reads(), 2);
        assert_eq!(overlay.first_conflict(), None);

        // Unread keys may change freely.
        base.put(b"other", b"y".to_vec());
        assert_eq!(overlay.first_conflict(), None);

        base.put(b"time", b"2".to_vec());
        assert_eq!(overlay.first_conflict(), Some(b"time".to_vec()));
    }

    #[test]
    fn key_appearing_after_a_missed_read_is_a_conflict() {
        let base = MemStore::new();
        let overlay = Overlay::new(&base);
        assert_eq!(overlay.get(b"code"), None);
        base.put(b"code", b"deployed".to_vec());
        assert_eq!(overlay.first_conflict(), Some(b"code".to_vec()));
    }

    #[test]
    fn reads_of_own_writes_are_not_tracked() {
        let base = base_with(&[(b"a", b"1")]);
        let mut overlay = Overlay::new(&base);
        overlay.put(b"a", b"2".to_vec());
        assert_eq!(overlay.get(b"a"), Some(b"2".to_vec()));
        assert_eq!(overlay.reads(), 0);
        base.put(b"a", b"3".to_vec());
        assert_eq!(overlay.first_conflict(), None);
    }

    #[test]
    fn commit_applies_every_write() {
        let base = base_with(&[(b"a", b"1"), (b"c", b"9")]);
        let mut overlay = Overlay::new(&base);
        overlay.put(b"a", b"2".to_vec());
        overlay.put(b"b", b"3".to_vec());
        overlay.delete(b"c");
        assert_eq!(overlay.len(), 3);
        assert_eq!(overlay.commit(), 3);
        assert_eq!(base.get(b"a"), Some(b"2".to_vec()));
        assert_eq!(base.get(b"b"), Some(b"3".to_vec()));
        assert_eq!(base.get(b"c"), None);
    }
}
