//! Object header: identity, hash, ownership and reference count.

use super::id::ObjectId;
use crate::types::hash::Hash;
use realmvm_derive::BinaryCodec;

/// Header persisted in front of every object body.
///
/// While `escaped` is false the object has exactly one strong referrer,
/// recorded in `owner`, and it is deleted together with that owner. Once a
/// second reference appears the object escapes: `owner` is cleared and the
/// object lives until `ref_count` drops to zero. Escaping is permanent.
#[derive(Clone, Debug, PartialEq, Eq, Default, BinaryCodec)]
pub struct ObjectInfo {
    pub id: ObjectId,
    pub hash: Hash,
    pub owner: Option<ObjectId>,
    pub mod_time: u64,
    pub ref_count: u64,
    pub escaped: bool,
}

impl ObjectInfo {
    /// Header of an object just attached under `owner`.
    pub fn attached(id: ObjectId, owner: Option<ObjectId>) -> Self {
        Self {
            id,
            hash: Hash::zero(),
            owner,
            mod_time: 0,
            ref_count: 1,
            escaped: false,
        }
    }

    /// Adds a strong reference held by `parent`.
    ///
    /// An unreferenced owned object moves to `parent`. A second reference
    /// makes the object escape. Either way the previous owner is returned,
    /// since its stored reference is now stale.
    pub fn retain(&mut self, parent: ObjectId) -> Option<ObjectId> {
        self.ref_count = self.ref_count.saturating_add(1);
        if self.escaped {
            return None;
        }
        if self.ref_count == 1 {
            return self.owner.replace(parent).filter(|old| *old != parent);
        }
        self.escaped = true;
        self.owner.take()
    }

    /// Drops a strong reference and returns the remaining count.
    pub fn release(&mut self) -> u64 {
        self.ref_count = self.ref_count.saturating_sub(1);
        self.ref_count
    }

    pub fn is_owned(&self) -> bool {
        !self.escaped && self.owner.is_some()
    }

    /// Copy with the hash zeroed, as covered by the content hash.
    pub fn unhashed(&self) -> Self {
        Self {
            hash: Hash::zero(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::address::PkgId;

    fn info() -> ObjectInfo {
        let pkg = PkgId::from_pkg_path("gno.land/r/demo/a");
        ObjectInfo::attached(ObjectId::new(pkg, 3), Some(ObjectId::new(pkg, 0)))
    }

    fn other_parent(x: &ObjectInfo) -> ObjectId {
        ObjectId::new(x.id.pkg_id, 7)
    }

    #[test]
    fn second_reference_escapes_and_clears_owner() {
        let mut x = info();
        assert!(x.is_owned());
        let old_owner = x.retain(other_parent(&x));
        assert_eq!(old_owner, Some(ObjectId::new(x.id.pkg_id, 0)));
        assert!(x.escaped);
        assert_eq!(x.owner, None);
        assert_eq!(x.ref_count, 2);
    }

    #[test]
    fn escaped_never_reverts() {
        let mut x = info();
        let parent = other_parent(&x);
        let mut history = vec![x.escaped];
        x.retain(parent);
        history.push(x.escaped);
        assert_eq!(x.release(), 1);
        history.push(x.escaped);
        assert_eq!(x.retain(parent), None);
        history.push(x.escaped);
        assert_eq!(x.release(), 1);
        assert_eq!(x.release(), 0);
        history.push(x.escaped);

        let flips = history.windows(2).filter(|w| w[0] != w[1]).count();
        assert_eq!(flips, 1);
        assert!(history.windows(2).all(|w| !(w[0] && !w[1])));
    }

    #[test]
    fn unreferenced_object_moves_to_new_parent() {
        let mut x = info();
        let old = x.owner;
        let parent = other_parent(&x);
        assert_eq!(x.release(), 0);
        assert_eq!(x.retain(parent), old);
        assert_eq!(x.owner, Some(parent));
        assert_eq!(x.ref_count, 1);
        assert!(!x.escaped);
    }

    #[test]
    fn reattaching_to_same_parent_reports_no_stale_owner() {
        let mut x = info();
        let parent = x.owner.unwrap();
        x.release();
        assert_eq!(x.retain(parent), None);
        assert!(x.is_owned());
    }

    #[test]
    fn unhashed_only_clears_hash() {
        let mut x = info();
        x.hash = Hash::tagged(b"t", &1u8);
        let u = x.unhashed();
        assert!(u.hash.is_zero());
        assert_eq!(u.id, x.id);
        assert_eq!(u.ref_count, x.ref_count);
    }
}
