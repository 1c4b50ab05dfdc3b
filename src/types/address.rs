//! 20-byte account/realm addresses and package ids.
//!
//! A user realm is identified by an arbitrary account address. A code realm's
//! address is derived from its package path, so every replica derives the
//! same address for the same package.

use crate::types::hash::Hash;
use realmvm_derive::BinaryCodec;
use std::fmt;

pub const ADDRESS_LEN: usize = 20;

/// Account or realm address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BinaryCodec)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    /// Address of the realm backing `pkg_path`.
    pub fn from_pkg_path(pkg_path: &str) -> Address {
        Address(truncate(Hash::tagged(b"pkgPath:", pkg_path)))
    }

    /// Deterministic test/user address from a seed string.
    pub fn from_seed(seed: &str) -> Address {
        Address(truncate(Hash::tagged(b"account:", seed)))
    }

    /// Parses the `g`-prefixed hex form produced by `Display`.
    pub fn parse(s: &str) -> Option<Address> {
        let hex = s.strip_prefix('g')?;
        if hex.len() != ADDRESS_LEN * 2 {
            return None;
        }
        let mut out = [0u8; ADDRESS_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(hex.get(i * 2..i * 2 + 2)?, 16).ok()?;
        }
        Some(Address(out))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Identifier of a package's object namespace.
///
/// Every object persisted by a realm carries its package id, which is how
/// ownership checks decide which realm may mutate it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BinaryCodec)]
pub struct PkgId(pub [u8; ADDRESS_LEN]);

impl PkgId {
    pub fn from_pkg_path(pkg_path: &str) -> PkgId {
        PkgId(truncate(Hash::tagged(b"PKGID", pkg_path)))
    }
}

impl fmt::Display for PkgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..6] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

fn truncate(hash: Hash) -> [u8; ADDRESS_LEN] {
    let mut out = [0u8; ADDRESS_LEN];
    out.copy_from_slice(&hash.0[hash.0.len() - ADDRESS_LEN..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkg_address_is_deterministic() {
        let a = Address::from_pkg_path("gno.land/r/demo/counter");
        let b = Address::from_pkg_path("gno.land/r/demo/counter");
        assert_eq!(a, b);
        assert_ne!(a, Address::from_pkg_path("gno.land/r/demo/other"));
    }

    #[test]
    fn pkg_id_differs_from_address() {
        let path = "gno.land/r/demo/counter";
        assert_ne!(PkgId::from_pkg_path(path).0, Address::from_pkg_path(path).0);
    }

    #[test]
    fn display_parse_round_trip() {
        let addr = Address::from_seed("alice");
        let text = addr.to_string();
        assert!(text.starts_with('g'));
        assert_eq!(Address::parse(&text), Some(addr));
        assert_eq!(Address::parse("g1234"), None);
        assert_eq!(Address::parse(&text[1..]), None);
    }
}
