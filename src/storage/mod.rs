//! Byte-oriented storage beneath the object model.
//!
//! - [`BackingStore`]: the shared, thread-safe key-value layer
//! - [`mem_store`]: in-memory [`MemStore`] implementation
//! - [`overlay`]: per-transaction [`Overlay`] buffering writes until commit
//!
//! The store has no knowledge of objects. Keys are built by the object
//! model and the banker; values are canonical encodings.

pub mod mem_store;
pub mod overlay;

pub use mem_store::MemStore;
pub use overlay::Overlay;

/// Pending writes: `Some(value)` for insertions, `None` for deletions.
pub type WriteBatch = Vec<(Vec<u8>, Option<Vec<u8>>)>;

/// Durable key-value storage shared by every transaction.
///
/// Implementations must be thread-safe; concurrent transactions only ever
/// read from it and hand their writes over in one [`apply_batch`](Self::apply_batch).
pub trait BackingStore: Send + Sync {
    /// Retrieves a value by key, returning `None` if the key does not exist.
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    /// Applies a batch of writes atomically.
    fn apply_batch(&self, writes: WriteBatch);

    /// Stores a single key-value pair.
    fn put(&self, key: &[u8], value: Vec<u8>) {
        self.apply_batch(vec![(key.to_vec(), Some(value))]);
    }
}

/// Read/write view used while executing a transaction.
pub trait KvStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn put(&mut self, key: &[u8], value: Vec<u8>);
    fn delete(&mut self, key: &[u8]);
}
