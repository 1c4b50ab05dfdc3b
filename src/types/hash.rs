//! 32-byte SHA3-256 content hash.

use crate::types::encoding::{Encode, EncodeSink};
use realmvm_derive::BinaryCodec;
use sha3::{Digest, Sha3_256};
use std::fmt;

/// SHA3-256 hash length in bytes.
pub const HASH_LEN: usize = 32;

/// Content hash of a persisted record, also used as a backing-store key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec, Default, Hash, Ord, PartialOrd)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    /// All-zero hash. References to escaped objects carry it in place of
    /// the child's hash.
    pub fn zero() -> Hash {
        Hash([0u8; HASH_LEN])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Starts an incremental SHA3-256 computation.
    pub fn sha3() -> HashBuilder {
        HashBuilder::new()
    }

    /// Hashes `value`'s canonical encoding under a domain tag.
    pub fn tagged<T: Encode + ?Sized>(tag: &[u8], value: &T) -> Hash {
        let mut h = Hash::sha3();
        h.update(tag);
        value.encode(&mut h);
        h.finalize()
    }

    /// Short hex prefix for log lines.
    pub fn short(&self) -> String {
        self.0[..4].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Incremental SHA3-256 builder.
///
/// Implements [`EncodeSink`], so records are hashed straight from their
/// encoding without an intermediate buffer.
pub struct HashBuilder {
    hasher: Sha3_256,
}

impl Default for HashBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HashBuilder {
    pub fn new() -> Self {
        Self {
            hasher: Sha3_256::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Chained form of [`HashBuilder::update`].
    pub fn chain(mut self, data: &[u8]) -> Self {
        self.hasher.update(data);
        self
    }

    pub fn finalize(self) -> Hash {
        Hash(self.hasher.finalize().into())
    }
}

impl EncodeSink for HashBuilder {
    fn write(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_hash_matches_manual_stream() {
        let manual = Hash::sha3().chain(b"OBJECT").chain(&7u64.to_bytes()).finalize();
        assert_eq!(Hash::tagged(b"OBJECT", &7u64), manual);
    }

    #[test]
    fn domain_tag_separates_hashes() {
        assert_ne!(Hash::tagged(b"A", &1u64), Hash::tagged(b"B", &1u64));
    }

    #[test]
    fn zero_hash() {
        assert!(Hash::zero().is_zero());
        assert!(!Hash::tagged(b"x", &0u8).is_zero());
        assert_eq!(Hash::zero().to_string(), "0".repeat(64));
    }

    #[test]
    fn short_is_eight_hex_chars() {
        let h = Hash::tagged(b"x", &1u8);
        assert_eq!(h.short().len(), 8);
        assert!(h.to_string().starts_with(&h.short()));
    }
}
