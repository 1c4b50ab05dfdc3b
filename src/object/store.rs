//! Transaction heap backed by a key-value store.
//!
//! Objects enter the heap either freshly allocated (transient) or as lazy
//! stubs created from a persisted [`RefValue`]. A stub is loaded on first
//! access and its record is checked against the expected hash before any
//! of its content is used.
//!
//! Writes into a real object go through [`ObjectStore::did_update`], which
//! keeps reference counts and ownership current: a transient value stored
//! into a real object is attached (it and everything it references become
//! real), and an object gaining a second referrer escapes. At the end of a
//! transaction [`ObjectStore::finalize`] deletes unreachable objects and
//! writes every dirty one, children before parents, so a parent always
//! records its owned children's final hashes.

use super::errors::StoreError;
use super::id::{ObjectId, keys};
use super::info::ObjectInfo;
use super::value::{Handle, MapKey, ObjectBody, RefValue, StoredBody, Value};
use crate::debug;
use crate::preprocess::Type;
use crate::storage::KvStore;
use crate::types::address::PkgId;
use crate::types::encoding::{Decode, Encode};
use crate::types::hash::Hash;
use realmvm_derive::BinaryCodec;
use std::collections::{BTreeMap, BTreeSet};

/// Header and body as written to the store.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct ObjectRecord {
    pub info: ObjectInfo,
    pub body: StoredBody,
}

impl ObjectRecord {
    /// Content hash: the header without its own hash, then the body.
    /// References inside the body carry their targets' hashes, so the
    /// result covers every owned descendant.
    pub fn compute_hash(&self) -> Hash {
        Hash::tagged(b"OBJECT", &(self.info.unhashed(), &self.body))
    }
}

/// Index entry pointing at a package's current state.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct PackageRoot {
    pub id: ObjectId,
    pub hash: Hash,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FinalizeStats {
    pub saved: usize,
    pub deleted: usize,
    pub bytes_written: u64,
}

struct HeapEntry {
    /// `None` while transient, or until a stub is loaded.
    info: Option<ObjectInfo>,
    /// `None` until a stub is loaded.
    body: Option<ObjectBody<Handle>>,
    lazy: Option<RefValue>,
    dirty: bool,
    new_real: bool,
    deleted: bool,
}

impl HeapEntry {
    fn transient(body: ObjectBody<Handle>) -> Self {
        Self {
            info: None,
            body: Some(body),
            lazy: None,
            dirty: false,
            new_real: false,
            deleted: false,
        }
    }

    fn stub(r: RefValue) -> Self {
        Self {
            info: None,
            body: None,
            lazy: Some(r),
            dirty: false,
            new_real: false,
            deleted: false,
        }
    }

    fn is_real(&self) -> bool {
        self.info.is_some() || self.lazy.is_some()
    }

    fn id(&self) -> Option<ObjectId> {
        match (&self.info, &self.lazy) {
            (Some(info), _) => Some(info.id),
            (None, Some(r)) => Some(r.object_id),
            (None, None) => None,
        }
    }

    fn is_package(&self) -> bool {
        match (&self.body, &self.lazy) {
            (Some(body), _) => body.is_package(),
            (None, Some(r)) => r.pkg_path.is_some(),
            (None, None) => false,
        }
    }
}

/// Object heap of one transaction.
pub struct ObjectStore<'a> {
    kv: &'a mut dyn KvStore,
    heap: Vec<HeapEntry>,
    loaded: BTreeMap<ObjectId, Handle>,
    packages: BTreeMap<String, Handle>,
    realm_times: BTreeMap<PkgId, u64>,
    pending_delete: BTreeSet<Handle>,
    bytes_read: u64,
}

impl<'a> ObjectStore<'a> {
    pub fn new(kv: &'a mut dyn KvStore) -> Self {
        Self {
            kv,
            heap: Vec::new(),
            loaded: BTreeMap::new(),
            packages: BTreeMap::new(),
            realm_times: BTreeMap::new(),
            pending_delete: BTreeSet::new(),
            bytes_read: 0,
        }
    }

    /// The underlying key-value view, for records that are not objects.
    pub fn kv_mut(&mut self) -> &mut (dyn KvStore + 'a) {
        &mut *self.kv
    }

    /// Bytes fetched from the backing store so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn heap_len(&self) -> usize {
        self.heap.len()
    }

    fn entry(&self, h: Handle) -> Result<&HeapEntry, StoreError> {
        self.heap.get(h.index()).ok_or(StoreError::InvalidHandle(h))
    }

    fn entry_mut(&mut self, h: Handle) -> Result<&mut HeapEntry, StoreError> {
        self.heap.get_mut(h.index()).ok_or(StoreError::InvalidHandle(h))
    }

    fn push(&mut self, entry: HeapEntry) -> Handle {
        let h = Handle(self.heap.len() as u32);
        self.heap.push(entry);
        h
    }

    /// Allocates a transient object.
    pub fn alloc(&mut self, body: ObjectBody<Handle>) -> Handle {
        self.push(HeapEntry::transient(body))
    }

    pub fn is_real(&self, h: Handle) -> bool {
        self.entry(h).is_ok_and(HeapEntry::is_real)
    }

    pub fn is_package(&self, h: Handle) -> bool {
        self.entry(h).is_ok_and(HeapEntry::is_package)
    }

    pub fn object_id(&self, h: Handle) -> Option<ObjectId> {
        self.entry(h).ok().and_then(HeapEntry::id)
    }

    /// Header of a real object, loading it if needed.
    pub fn header(&mut self, h: Handle) -> Result<Option<ObjectInfo>, StoreError> {
        if !self.is_real(h) {
            return Ok(None);
        }
        self.load(h)?;
        Ok(self.entry(h)?.info.clone())
    }

    // ----- loading -----

    /// Handle for a persisted reference, creating a stub on first sight.
    fn ref_handle(&mut self, r: &RefValue) -> Handle {
        if let Some(&h) = self.loaded.get(&r.object_id) {
            return h;
        }
        let h = self.push(HeapEntry::stub(r.clone()));
        self.loaded.insert(r.object_id, h);
        if let Some(path) = &r.pkg_path {
            self.packages.insert(path.clone(), h);
        }
        h
    }

    fn package_root(&self, pkg_path: &str) -> Result<Option<PackageRoot>, StoreError> {
        self.kv
            .get(&keys::package_root(pkg_path))
            .map(|bytes| PackageRoot::from_bytes(&bytes))
            .transpose()
            .map_err(StoreError::from)
    }

    /// Hash a referenced object must have.
    fn expected_hash(&self, r: &RefValue) -> Result<Hash, StoreError> {
        if let Some(path) = &r.pkg_path {
            let root = self
                .package_root(path)?
                .ok_or_else(|| StoreError::UnknownPackage(path.clone()))?;
            if root.id != r.object_id {
                return Err(StoreError::Missing(r.object_id));
            }
            return Ok(root.hash);
        }
        if r.escaped {
            let bytes = self
                .kv
                .get(&keys::escaped(&r.object_id))
                .ok_or(StoreError::Missing(r.object_id))?;
            return Ok(Hash::from_bytes(&bytes)?);
        }
        Ok(r.hash)
    }

    /// Materializes a stub. Loaded and transient objects are left alone.
    pub fn load(&mut self, h: Handle) -> Result<(), StoreError> {
        let entry = self.entry(h)?;
        if entry.body.is_some() {
            return Ok(());
        }
        let r = entry.lazy.clone().ok_or(StoreError::InvalidHandle(h))?;
        let bytes = self
            .kv
            .get(&keys::object(&r.object_id))
            .ok_or(StoreError::Missing(r.object_id))?;
        self.bytes_read += bytes.len() as u64;
        let record = ObjectRecord::from_bytes(&bytes)?;

        let expected = self.expected_hash(&r)?;
        let actual = record.compute_hash();
        if record.info.id != r.object_id || actual != expected || record.info.hash != actual {
            return Err(StoreError::Integrity {
                id: r.object_id,
                expected,
                actual,
            });
        }
        let body = record
            .body
            .try_map_refs(&mut |child: &RefValue| Ok::<_, StoreError>(self.ref_handle(child)))?;
        debug!("loaded object {} ({}, {} bytes)", r.object_id, body.kind(), bytes.len());
        let entry = self.entry_mut(h)?;
        entry.info = Some(record.info);
        entry.body = Some(body);
        Ok(())
    }

    /// Handle of a package's object, from this transaction or the store.
    pub fn package(&mut self, pkg_path: &str) -> Result<Handle, StoreError> {
        if let Some(&h) = self.packages.get(pkg_path) {
            return Ok(h);
        }
        let root = self
            .package_root(pkg_path)?
            .ok_or_else(|| StoreError::UnknownPackage(pkg_path.to_string()))?;
        Ok(self.ref_handle(&RefValue {
            object_id: root.id,
            escaped: false,
            pkg_path: Some(pkg_path.to_string()),
            hash: Hash::zero(),
        }))
    }

    /// Makes a freshly instantiated package findable before it is real.
    pub fn register_package(&mut self, pkg_path: &str, h: Handle) {
        self.packages.insert(pkg_path.to_string(), h);
    }

    pub fn has_package(&self, pkg_path: &str) -> Result<bool, StoreError> {
        Ok(self.packages.contains_key(pkg_path) || self.package_root(pkg_path)?.is_some())
    }

    // ----- access -----

    pub fn body(&mut self, h: Handle) -> Result<&ObjectBody<Handle>, StoreError> {
        self.load(h)?;
        self.entry(h)?.body.as_ref().ok_or(StoreError::InvalidHandle(h))
    }

    fn body_mut(&mut self, h: Handle) -> Result<&mut ObjectBody<Handle>, StoreError> {
        self.load(h)?;
        self.entry_mut(h)?.body.as_mut().ok_or(StoreError::InvalidHandle(h))
    }

    pub fn elem(&mut self, h: Handle, index: u32) -> Result<Value, StoreError> {
        let body = self.body(h)?;
        body.elem(index).cloned().ok_or(StoreError::NoSuchElement {
            kind: body.kind(),
            index,
        })
    }

    /// Replaces an element and returns the previous value.
    pub fn set_elem(&mut self, h: Handle, index: u32, value: Value) -> Result<Value, StoreError> {
        let new_refs = value.refs();
        let body = self.body_mut(h)?;
        let kind = body.kind();
        let slot = body
            .elem_mut(index)
            .ok_or(StoreError::NoSuchElement { kind, index })?;
        let old = std::mem::replace(slot, value);
        self.did_update(h, &old.refs(), &new_refs)?;
        Ok(old)
    }

    pub fn len(&mut self, h: Handle) -> Result<usize, StoreError> {
        Ok(match self.body(h)? {
            ObjectBody::Array { elems } | ObjectBody::List { elems } => elems.len(),
            ObjectBody::Map { entries, .. } => entries.len(),
            ObjectBody::Struct { fields, .. } => fields.len(),
            other => {
                return Err(StoreError::WrongKind {
                    expected: "list",
                    found: other.kind(),
                });
            }
        })
    }

    pub fn list_push(&mut self, h: Handle, value: Value) -> Result<usize, StoreError> {
        let new_refs = value.refs();
        let len = match self.body_mut(h)? {
            ObjectBody::List { elems } => {
                elems.push(value);
                elems.len()
            }
            other => {
                return Err(StoreError::WrongKind {
                    expected: "list",
                    found: other.kind(),
                });
            }
        };
        self.did_update(h, &[], &new_refs)?;
        Ok(len)
    }

    pub fn map_get(&mut self, h: Handle, key: &MapKey) -> Result<Option<Value>, StoreError> {
        match self.body(h)? {
            ObjectBody::Map { entries, .. } => Ok(entries.get(key).cloned()),
            other => Err(StoreError::WrongKind {
                expected: "map",
                found: other.kind(),
            }),
        }
    }

    pub fn map_value_type(&mut self, h: Handle) -> Result<Type, StoreError> {
        match self.body(h)? {
            ObjectBody::Map { value_ty, .. } => Ok(value_ty.clone()),
            other => Err(StoreError::WrongKind {
                expected: "map",
                found: other.kind(),
            }),
        }
    }

    pub fn map_set(&mut self, h: Handle, key: MapKey, value: Value) -> Result<(), StoreError> {
        let new_refs = value.refs();
        let old = match self.body_mut(h)? {
            ObjectBody::Map { entries, .. } => entries.insert(key, value),
            other => {
                return Err(StoreError::WrongKind {
                    expected: "map",
                    found: other.kind(),
                });
            }
        };
        let old_refs = old.map(|v| v.refs()).unwrap_or_default();
        self.did_update(h, &old_refs, &new_refs)
    }

    /// Entries of a map in key order.
    pub fn map_entries(&mut self, h: Handle) -> Result<Vec<(MapKey, Value)>, StoreError> {
        match self.body(h)? {
            ObjectBody::Map { entries, .. } => Ok(entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            other => Err(StoreError::WrongKind {
                expected: "map",
                found: other.kind(),
            }),
        }
    }

    // ----- ownership and reference counts -----

    fn handle_of(&self, id: &ObjectId) -> Result<Handle, StoreError> {
        self.loaded.get(id).copied().ok_or(StoreError::Missing(*id))
    }

    fn info_mut(&mut self, h: Handle) -> Result<&mut ObjectInfo, StoreError> {
        self.load(h)?;
        self.entry_mut(h)?.info.as_mut().ok_or(StoreError::Unattached(h))
    }

    fn mark_dirty(&mut self, h: Handle) -> Result<(), StoreError> {
        if !self.is_real(h) {
            return Ok(());
        }
        self.load(h)?;
        self.entry_mut(h)?.dirty = true;
        Ok(())
    }

    /// Next id on a package's realm clock.
    fn next_id(&mut self, pkg_id: PkgId) -> Result<ObjectId, StoreError> {
        let current = match self.realm_times.get(&pkg_id) {
            Some(&t) => t,
            None => self
                .kv
                .get(&keys::realm_time(&pkg_id))
                .map(|bytes| u64::from_bytes(&bytes))
                .transpose()?
                .unwrap_or(0),
        };
        let time = current + 1;
        self.realm_times.insert(pkg_id, time);
        Ok(ObjectId::new(pkg_id, time))
    }

    /// Records that real object `parent` now references `child`.
    ///
    /// A transient child is attached under `parent`. A real child gains a
    /// reference: an unreferenced one moves to `parent`, and one gaining a
    /// second reference escapes. Its previous owner is marked dirty so the
    /// stale reference gets rewritten.
    pub fn retain(&mut self, parent: Handle, child: Handle) -> Result<(), StoreError> {
        if self.is_package(child) {
            return Ok(());
        }
        if !self.is_real(child) {
            return self.attach(child, parent);
        }
        let parent_id = self.object_id(parent).ok_or(StoreError::Unattached(parent))?;
        let old_owner = self.info_mut(child)?.retain(parent_id);
        self.entry_mut(child)?.dirty = true;
        if let Some(owner) = old_owner {
            debug!("object {:?} left owner {}", self.object_id(child), owner);
            // An owner that was never loaded holds no reference to rewrite.
            if let Some(&owner) = self.loaded.get(&owner) {
                self.mark_dirty(owner)?;
            }
        }
        Ok(())
    }

    /// Drops a reference held by a real object. Objects left without any
    /// reference are deleted at finalization.
    pub fn release(&mut self, child: Handle) -> Result<(), StoreError> {
        if self.is_package(child) || !self.is_real(child) {
            return Ok(());
        }
        if self.info_mut(child)?.release() == 0 {
            self.pending_delete.insert(child);
        } else {
            self.entry_mut(child)?.dirty = true;
        }
        Ok(())
    }

    fn attach(&mut self, child: Handle, parent: Handle) -> Result<(), StoreError> {
        let parent_id = self.object_id(parent).ok_or(StoreError::Unattached(parent))?;
        let id = self.next_id(parent_id.pkg_id)?;
        let entry = self.entry_mut(child)?;
        entry.info = Some(ObjectInfo::attached(id, Some(parent_id)));
        entry.dirty = true;
        entry.new_real = true;
        self.loaded.insert(id, child);
        let grandchildren = self.body(child)?.children();
        for g in grandchildren {
            self.retain(child, g)?;
        }
        Ok(())
    }

    /// Bookkeeping after `parent` dropped `old` references and gained `new`
    /// ones. Does nothing while `parent` is transient.
    pub fn did_update(&mut self, parent: Handle, old: &[Handle], new: &[Handle]) -> Result<(), StoreError> {
        if !self.is_real(parent) {
            return Ok(());
        }
        self.mark_dirty(parent)?;
        for &c in new {
            self.retain(parent, c)?;
        }
        for &x in old {
            self.release(x)?;
        }
        Ok(())
    }

    /// Turns a transient package object into the root of its realm's state.
    /// Package objects start with one reference and are never counted.
    pub fn make_package_real(&mut self, h: Handle) -> Result<ObjectId, StoreError> {
        let pkg_path = match self.body(h)? {
            ObjectBody::Package { pkg_path, .. } => pkg_path.clone(),
            other => {
                return Err(StoreError::WrongKind {
                    expected: "package",
                    found: other.kind(),
                });
            }
        };
        let id = ObjectId::package(&pkg_path);
        let entry = self.entry_mut(h)?;
        entry.info = Some(ObjectInfo::attached(id, None));
        entry.dirty = true;
        entry.new_real = true;
        self.loaded.insert(id, h);
        self.packages.insert(pkg_path, h);
        let children = self.body(h)?.children();
        for c in children {
            self.retain(h, c)?;
        }
        Ok(id)
    }

    // ----- finalization -----

    fn ref_of(&self, h: Handle) -> Result<RefValue, StoreError> {
        let entry = self.entry(h)?;
        match (&entry.info, &entry.lazy) {
            (Some(info), _) => {
                let pkg_path = match &entry.body {
                    Some(ObjectBody::Package { pkg_path, .. }) => Some(pkg_path.clone()),
                    _ => None,
                };
                let hash = if info.escaped || pkg_path.is_some() {
                    Hash::zero()
                } else {
                    info.hash
                };
                Ok(RefValue {
                    object_id: info.id,
                    escaped: info.escaped,
                    pkg_path,
                    hash,
                })
            }
            (None, Some(r)) => Ok(r.clone()),
            (None, None) => Err(StoreError::Unattached(h)),
        }
    }

    fn dirty_handles(&self) -> Vec<Handle> {
        self.heap
            .iter()
            .enumerate()
            .filter(|(_, e)| e.dirty && !e.deleted && e.info.is_some())
            .map(|(i, _)| Handle(i as u32))
            .collect()
    }

    /// Deletes unreferenced objects and writes every dirty one.
    pub fn finalize(&mut self) -> Result<FinalizeStats, StoreError> {
        let mut stats = FinalizeStats::default();

        while let Some(h) = self.pending_delete.pop_first() {
            let entry = self.entry(h)?;
            let unreferenced = entry.info.as_ref().is_some_and(|i| i.ref_count == 0);
            if entry.deleted || !unreferenced {
                continue;
            }
            let children = self.body(h)?.children();
            let entry = self.entry_mut(h)?;
            entry.deleted = true;
            entry.dirty = false;
            let persisted = !entry.new_real;
            let (id, escaped) = match &entry.info {
                Some(info) => (info.id, info.escaped),
                None => continue,
            };
            if persisted {
                self.kv.delete(&keys::object(&id));
                if escaped {
                    self.kv.delete(&keys::escaped(&id));
                }
            }
            stats.deleted += 1;
            debug!("deleted object {}", id);
            for c in children {
                self.release(c)?;
            }
        }

        // An owned object's hash is recorded by its owner, so every owner
        // up to the first escaped ancestor must be rewritten.
        let mut visited = BTreeSet::new();
        for h in self.dirty_handles() {
            let mut current = h;
            while visited.insert(current) {
                let owner = match &self.entry(current)?.info {
                    Some(info) if !info.escaped => info.owner,
                    _ => None,
                };
                let Some(owner) = owner else {
                    break;
                };
                let owner = self.handle_of(&owner)?;
                if self.entry(owner)?.deleted {
                    break;
                }
                self.mark_dirty(owner)?;
                current = owner;
            }
        }

        let mut saved = BTreeSet::new();
        for h in self.dirty_handles() {
            self.save(h, &mut saved, &mut stats)?;
        }

        let times: Vec<(PkgId, u64)> = self.realm_times.iter().map(|(k, v)| (*k, *v)).collect();
        for (pkg_id, time) in times {
            let bytes = time.to_bytes();
            stats.bytes_written += bytes.len() as u64;
            self.kv.put(&keys::realm_time(&pkg_id), bytes);
        }
        Ok(stats)
    }

    fn save(&mut self, h: Handle, saved: &mut BTreeSet<Handle>, stats: &mut FinalizeStats) -> Result<(), StoreError> {
        if !saved.insert(h) {
            return Ok(());
        }
        let body = self.body(h)?.clone();
        for c in body.children() {
            let entry = self.entry(c)?;
            let owned_and_dirty = entry.dirty
                && !entry.deleted
                && !entry.is_package()
                && entry.info.as_ref().is_some_and(|i| !i.escaped);
            if owned_and_dirty {
                self.save(c, saved, stats)?;
            }
        }

        let stored = body.try_map_refs(&mut |c: &Handle| self.ref_of(*c))?;
        let entry = self.entry_mut(h)?;
        let info = entry.info.as_mut().ok_or(StoreError::Unattached(h))?;
        info.mod_time += 1;
        let mut record = ObjectRecord {
            info: info.clone(),
            body: stored,
        };
        let hash = record.compute_hash();
        info.hash = hash;
        record.info.hash = hash;
        entry.dirty = false;
        entry.new_real = false;

        let id = record.info.id;
        let bytes = record.to_bytes();
        stats.saved += 1;
        stats.bytes_written += bytes.len() as u64;
        self.kv.put(&keys::object(&id), bytes);
        if record.info.escaped {
            self.kv.put(&keys::escaped(&id), hash.to_bytes());
        }
        if let ObjectBody::Package { pkg_path, .. } = &record.body {
            let root = PackageRoot { id, hash };
            self.kv.put(&keys::package_root(pkg_path), root.to_bytes());
        }
        debug!("saved object {} hash={}", id, hash.short());
        Ok(())
    }
}
