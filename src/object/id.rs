//! Object identities and the backing-store keys derived from them.

use crate::types::address::PkgId;
use realmvm_derive::BinaryCodec;
use std::fmt;

/// Identity of a persisted object: the owning package's id plus the value
/// of that package's realm clock when the object was first attached.
///
/// Time 0 is reserved for the package object itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BinaryCodec)]
pub struct ObjectId {
    pub pkg_id: PkgId,
    pub time: u64,
}

impl ObjectId {
    pub fn new(pkg_id: PkgId, time: u64) -> Self {
        Self { pkg_id, time }
    }

    /// Id of the package object for `pkg_path`.
    pub fn package(pkg_path: &str) -> Self {
        Self::new(PkgId::from_pkg_path(pkg_path), 0)
    }

    pub fn is_package(&self) -> bool {
        self.time == 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pkg_id, self.time)
    }
}

/// Key prefixes of every record kind the VM writes.
pub mod keys {
    use super::ObjectId;
    use crate::types::address::{Address, PkgId};

    pub const OBJECT: &[u8] = b"oid:";
    pub const ESCAPED: &[u8] = b"escaped:";
    pub const PACKAGE_ROOT: &[u8] = b"pkg:";
    pub const PACKAGE_CODE: &[u8] = b"pkgcode:";
    pub const REALM_TIME: &[u8] = b"realm-time:";
    pub const BALANCE: &[u8] = b"balance:";

    fn with_prefix(prefix: &[u8], rest: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(prefix.len() + rest.len());
        key.extend_from_slice(prefix);
        key.extend_from_slice(rest);
        key
    }

    fn id_bytes(id: &ObjectId) -> Vec<u8> {
        let mut out = id.pkg_id.0.to_vec();
        // Big-endian so keys of one package sort by creation time.
        out.extend_from_slice(&id.time.to_be_bytes());
        out
    }

    pub fn object(id: &ObjectId) -> Vec<u8> {
        with_prefix(OBJECT, &id_bytes(id))
    }

    /// Current hash of an escaped object.
    pub fn escaped(id: &ObjectId) -> Vec<u8> {
        with_prefix(ESCAPED, &id_bytes(id))
    }

    pub fn package_root(pkg_path: &str) -> Vec<u8> {
        with_prefix(PACKAGE_ROOT, pkg_path.as_bytes())
    }

    pub fn package_code(pkg_path: &str) -> Vec<u8> {
        with_prefix(PACKAGE_CODE, pkg_path.as_bytes())
    }

    pub fn realm_time(pkg_id: &PkgId) -> Vec<u8> {
        with_prefix(REALM_TIME, &pkg_id.0)
    }

    pub fn balance(addr: &Address) -> Vec<u8> {
        with_prefix(BALANCE, &addr.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_sort_by_time_within_package() {
        let pkg = PkgId::from_pkg_path("gno.land/r/demo/counter");
        let a = keys::object(&ObjectId::new(pkg, 2));
        let b = keys::object(&ObjectId::new(pkg, 256));
        assert!(a < b);
        assert!(a.starts_with(keys::OBJECT));
        assert_ne!(keys::object(&ObjectId::new(pkg, 2)), keys::escaped(&ObjectId::new(pkg, 2)));
    }

    #[test]
    fn package_id_uses_time_zero() {
        let id = ObjectId::package("gno.land/r/demo/counter");
        assert!(id.is_package());
        assert_eq!(id.pkg_id, PkgId::from_pkg_path("gno.land/r/demo/counter"));
    }
}
