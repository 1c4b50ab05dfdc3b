//! Lexical scopes and name resolution.
//!
//! Scopes live in a [`ScopeTable`] arena indexed by [`ScopeId`]; each one
//! points at its parent by id. Names get a slot index in the scope that
//! declares them, and [`ScopeTable::resolve`] turns a name into an
//! [`Address`] counting how many scopes up it lives.

use super::errors::ProgramError;
use super::types::Type;
use super::universe::Universal;
use crate::ast::{Address, MAX_VALUE_PATH_DEPTH, Name, NodeId, ScopeId};
use crate::config::MAX_NAMES_PER_SCOPE;
use realmvm_derive::BinaryCodec;

#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec)]
pub enum ScopeKind {
    Package,
    File,
    Func,
    FuncLit,
    Block,
    For,
    Range,
    If,
    IfCase,
    Switch,
    SwitchClause,
}

impl ScopeKind {
    pub fn is_loop(self) -> bool {
        matches!(self, ScopeKind::For | ScopeKind::Range)
    }

    /// Scopes that end the search for an enclosing loop.
    pub fn is_function_boundary(self) -> bool {
        matches!(
            self,
            ScopeKind::Func | ScopeKind::FuncLit | ScopeKind::File | ScopeKind::Package
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct Slot {
    pub name: Name,
    /// `None` while the name is predefined but not yet defined.
    pub ty: Option<Type>,
    pub is_const: bool,
    /// The value lives in a heap item so closures can share it.
    pub heap_item: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct Scope {
    pub kind: ScopeKind,
    pub source: NodeId,
    pub parent: Option<ScopeId>,
    pub slots: Vec<Slot>,
    /// Names found by searching through this scope into an ancestor.
    pub externs: Vec<Name>,
}

impl Scope {
    pub fn local_index(&self, name: &Name) -> Option<u16> {
        self.slots
            .iter()
            .position(|s| &s.name == name)
            .map(|i| i as u16)
    }

    pub fn num_names(&self) -> usize {
        self.slots.len()
    }
}

/// A function slot replaced by [`ScopeTable::redefine_function`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Upgrade {
    pub scope: ScopeId,
    pub index: u16,
    pub previous: Slot,
}

/// Arena of every scope of one package.
///
/// `ScopeId`s are only ever produced by [`ScopeTable::push`], so indexing
/// with one of them cannot go out of bounds.
#[derive(Clone, Debug, Default, PartialEq, Eq, BinaryCodec)]
pub struct ScopeTable {
    scopes: Vec<Scope>,
    #[binary_codec(skip)]
    upgrades: Vec<Upgrade>,
}

impl ScopeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: ScopeKind, source: NodeId, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            kind,
            source,
            parent,
            slots: Vec::new(),
            externs: Vec::new(),
        });
        id
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ScopeId, &Scope)> {
        self.scopes
            .iter()
            .enumerate()
            .map(|(i, s)| (ScopeId(i as u32), s))
    }

    pub fn slot(&self, scope: ScopeId, index: u16) -> Option<&Slot> {
        self.get(scope).slots.get(index as usize)
    }

    /// Scope `depth` levels up from `scope`, where depth 1 is `scope` itself.
    pub fn ancestor(&self, scope: ScopeId, depth: u8) -> Option<ScopeId> {
        let mut current = scope;
        for _ in 1..depth {
            current = self.get(current).parent?;
        }
        (depth >= 1).then_some(current)
    }

    fn push_slot(&mut self, scope: ScopeId, slot: Slot) -> Result<u16, ProgramError> {
        let s = self.get_mut(scope);
        if s.slots.len() >= MAX_NAMES_PER_SCOPE {
            return Err(ProgramError::TooManyNames {
                limit: MAX_NAMES_PER_SCOPE,
            });
        }
        s.slots.push(slot);
        Ok((s.slots.len() - 1) as u16)
    }

    /// Reserves a slot for a top-level name before its type is known.
    ///
    /// Reserving an existing name returns its slot; the const/var status
    /// must agree.
    pub fn predefine(&mut self, scope: ScopeId, is_const: bool, name: &Name) -> Result<u16, ProgramError> {
        if name.is_blank() {
            return Ok(0);
        }
        if let Some(index) = self.get(scope).local_index(name) {
            let slot = &self.get(scope).slots[index as usize];
            if slot.is_const != is_const {
                return Err(ProgramError::ConstStatusChanged { name: name.clone() });
            }
            return Ok(index);
        }
        self.push_slot(
            scope,
            Slot {
                name: name.clone(),
                ty: None,
                is_const,
                heap_item: false,
            },
        )
    }

    /// Declares `name` with a static type.
    ///
    /// Redefinition is allowed only when the slot has no type yet or the
    /// types are identical; const status may never change.
    pub fn define(
        &mut self,
        scope: ScopeId,
        name: &Name,
        ty: Type,
        is_const: bool,
    ) -> Result<u16, ProgramError> {
        if name.is_blank() {
            return Ok(0);
        }
        let Some(index) = self.get(scope).local_index(name) else {
            return self.push_slot(
                scope,
                Slot {
                    name: name.clone(),
                    ty: Some(ty),
                    is_const,
                    heap_item: false,
                },
            );
        };
        let slot = &mut self.get_mut(scope).slots[index as usize];
        if slot.is_const != is_const {
            return Err(ProgramError::ConstStatusChanged { name: name.clone() });
        }
        match &slot.ty {
            None => slot.ty = Some(ty),
            Some(old) if *old == ty => {}
            Some(old) => {
                return Err(ProgramError::ConflictingRedefinition {
                    name: name.clone(),
                    old: old.to_string(),
                    new: ty.to_string(),
                });
            }
        }
        Ok(index)
    }

    /// Replaces an already defined function during incremental loading.
    ///
    /// The new declaration must keep the signature. The replaced slot is
    /// recorded and can be restored with [`revert_upgrades`](Self::revert_upgrades).
    pub fn redefine_function(&mut self, scope: ScopeId, name: &Name, ty: Type) -> Result<u16, ProgramError> {
        let index = self
            .get(scope)
            .local_index(name)
            .ok_or_else(|| ProgramError::NotAFunction { name: name.clone() })?;
        let previous = self.get(scope).slots[index as usize].clone();
        match (&previous.ty, &ty) {
            (Some(Type::Func(old)), Type::Func(new)) if !previous.is_const => {
                if old != new {
                    return Err(ProgramError::SignatureChanged {
                        name: name.clone(),
                        old: Type::Func(old.clone()).to_string(),
                        new: ty.to_string(),
                    });
                }
            }
            _ => return Err(ProgramError::NotAFunction { name: name.clone() }),
        }
        self.upgrades.push(Upgrade {
            scope,
            index,
            previous,
        });
        self.get_mut(scope).slots[index as usize].ty = Some(ty);
        Ok(index)
    }

    pub fn upgrades(&self) -> &[Upgrade] {
        &self.upgrades
    }

    /// Restores every slot replaced by a function upgrade, newest first.
    pub fn revert_upgrades(&mut self) {
        while let Some(up) = self.upgrades.pop() {
            self.get_mut(up.scope).slots[up.index as usize] = up.previous;
        }
    }

    /// Forgets recorded upgrades once they are final.
    pub fn commit_upgrades(&mut self) {
        self.upgrades.clear();
    }

    /// Appends a slot for a closure capture. Capture slots are never looked
    /// up by name, so they may shadow an existing local.
    pub fn push_capture(&mut self, scope: ScopeId, name: &Name, ty: Option<Type>) -> Result<u16, ProgramError> {
        self.push_slot(
            scope,
            Slot {
                name: name.clone(),
                ty,
                is_const: false,
                heap_item: true,
            },
        )
    }

    pub fn set_heap_item(&mut self, scope: ScopeId, index: u16) {
        if let Some(slot) = self.get_mut(scope).slots.get_mut(index as usize) {
            slot.heap_item = true;
        }
    }

    /// Resolves `name` as seen from `scope`.
    ///
    /// Depth 1 is `scope` itself and grows by one per ancestor. Every scope
    /// searched before the declaring one records the name as an extern.
    /// Names not declared in any scope fall back to the universe; `line`
    /// locates the use when the name is not found there either.
    pub fn resolve(&mut self, scope: ScopeId, name: &Name, line: u32) -> Result<Address, ProgramError> {
        if name.is_blank() {
            return Ok(Address::blank());
        }
        let mut depth: u8 = 1;
        let mut current = scope;
        let mut passed = Vec::new();
        loop {
            if let Some(index) = self.get(current).local_index(name) {
                for id in passed {
                    let externs = &mut self.get_mut(id).externs;
                    if !externs.contains(name) {
                        externs.push(name.clone());
                    }
                }
                return Ok(Address::block(depth, index, name.clone()));
            }
            passed.push(current);
            match self.get(current).parent {
                Some(parent) => {
                    current = parent;
                    if depth == MAX_VALUE_PATH_DEPTH {
                        return Err(crate::ast::AddressError::TooDeep {
                            name: name.clone(),
                            depth: depth.saturating_add(1),
                        }
                        .into());
                    }
                    depth += 1;
                }
                None => break,
            }
        }
        match Universal::lookup(name) {
            Some(u) => Ok(Address::universe(u.index(), name.clone())),
            None => Err(ProgramError::UndeclaredName {
                name: name.clone(),
                line,
            }),
        }
    }

    /// The scope a block address resolved from `scope` refers to.
    pub fn declaring_scope(&self, scope: ScopeId, addr: &Address) -> Option<ScopeId> {
        if addr.category != crate::ast::AddressCategory::Block || addr.is_blank() {
            return None;
        }
        self.ancestor(scope, addr.depth)
    }

    /// Whether `scope` sits inside a loop of the same function.
    pub fn is_loop_local(&self, scope: ScopeId) -> bool {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = self.get(id);
            if s.kind.is_loop() {
                return true;
            }
            if s.kind.is_function_boundary() {
                return false;
            }
            current = s.parent;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AddressCategory;

    fn chain() -> (ScopeTable, ScopeId, ScopeId, ScopeId) {
        let mut t = ScopeTable::new();
        let pkg = t.push(ScopeKind::Package, NodeId(0), None);
        let func = t.push(ScopeKind::Func, NodeId(1), Some(pkg));
        let block = t.push(ScopeKind::Block, NodeId(2), Some(func));
        (t, pkg, func, block)
    }

    #[test]
    fn resolve_counts_depth_and_records_externs() {
        let (mut t, pkg, func, block) = chain();
        t.define(pkg, &Name::from("counter"), Type::Int, false).unwrap();
        t.define(block, &Name::from("x"), Type::Int, false).unwrap();

        let local = t.resolve(block, &Name::from("x"), 1).unwrap();
        assert_eq!(local, Address::block(1, 0, Name::from("x")));

        let outer = t.resolve(block, &Name::from("counter"), 1).unwrap();
        assert_eq!(outer, Address::block(3, 0, Name::from("counter")));
        assert_eq!(t.get(block).externs, vec![Name::from("counter")]);
        assert_eq!(t.get(func).externs, vec![Name::from("counter")]);
        assert!(t.get(pkg).externs.is_empty());
    }

    #[test]
    fn resolve_is_idempotent() {
        let (mut t, pkg, _, block) = chain();
        t.define(pkg, &Name::from("counter"), Type::Int, false).unwrap();
        let first = t.resolve(block, &Name::from("counter"), 1).unwrap();
        let snapshot = t.clone();
        let second = t.resolve(block, &Name::from("counter"), 1).unwrap();
        assert_eq!(first, second);
        assert_eq!(t, snapshot);
    }

    #[test]
    fn resolve_falls_back_to_universe() {
        let (mut t, _, _, block) = chain();
        let addr = t.resolve(block, &Name::from("len"), 1).unwrap();
        assert_eq!(addr.category, AddressCategory::Universe);
        assert_eq!(addr.depth, 0);
        assert_eq!(addr.index, Universal::Len.index());

        assert_eq!(
            t.resolve(block, &Name::from("nope"), 12),
            Err(ProgramError::UndeclaredName {
                name: Name::from("nope"),
                line: 12,
            })
        );
        assert!(t.resolve(block, &Name::from("_"), 1).unwrap().is_blank());
    }

    #[test]
    fn resolve_rejects_chains_deeper_than_limit() {
        let mut t = ScopeTable::new();
        let root = t.push(ScopeKind::Package, NodeId(0), None);
        t.define(root, &Name::from("deep"), Type::Int, false).unwrap();
        let mut leaf = root;
        for i in 0..MAX_VALUE_PATH_DEPTH as u32 {
            leaf = t.push(ScopeKind::Block, NodeId(i + 1), Some(leaf));
        }
        assert!(matches!(
            t.resolve(leaf, &Name::from("deep"), 1),
            Err(ProgramError::Address(_))
        ));
        let shallower = t.get(leaf).parent.unwrap();
        let addr = t.resolve(shallower, &Name::from("deep"), 1).unwrap();
        assert_eq!(addr.depth, MAX_VALUE_PATH_DEPTH);
    }

    #[test]
    fn define_rules() {
        let (mut t, pkg, _, _) = chain();
        let x = Name::from("x");
        assert_eq!(t.predefine(pkg, false, &x).unwrap(), 0);
        assert_eq!(t.define(pkg, &x, Type::Int, false).unwrap(), 0);
        assert_eq!(t.define(pkg, &x, Type::Int, false).unwrap(), 0);
        assert!(matches!(
            t.define(pkg, &x, Type::String, false),
            Err(ProgramError::ConflictingRedefinition { .. })
        ));
        assert!(matches!(
            t.define(pkg, &x, Type::Int, true),
            Err(ProgramError::ConstStatusChanged { .. })
        ));
        assert!(matches!(
            t.predefine(pkg, true, &x),
            Err(ProgramError::ConstStatusChanged { .. })
        ));
    }

    #[test]
    fn function_upgrade_keeps_signature_and_reverts() {
        use crate::preprocess::types::FuncSig;
        let (mut t, pkg, _, _) = chain();
        let f = Name::from("Render");
        let sig = Type::Func(FuncSig {
            params: vec![Type::String],
            results: vec![Type::String],
        });
        t.define(pkg, &f, sig.clone(), false).unwrap();
        assert_eq!(t.redefine_function(pkg, &f, sig.clone()).unwrap(), 0);
        assert_eq!(t.upgrades().len(), 1);

        let changed = Type::Func(FuncSig {
            params: vec![],
            results: vec![Type::String],
        });
        assert!(matches!(
            t.redefine_function(pkg, &f, changed),
            Err(ProgramError::SignatureChanged { .. })
        ));

        t.define(pkg, &Name::from("v"), Type::Int, false).unwrap();
        assert!(matches!(
            t.redefine_function(pkg, &Name::from("v"), sig),
            Err(ProgramError::NotAFunction { .. })
        ));

        t.revert_upgrades();
        assert!(t.upgrades().is_empty());
    }

    #[test]
    fn loop_locality_stops_at_function_boundary() {
        let mut t = ScopeTable::new();
        let pkg = t.push(ScopeKind::Package, NodeId(0), None);
        let func = t.push(ScopeKind::Func, NodeId(1), Some(pkg));
        let for_scope = t.push(ScopeKind::For, NodeId(2), Some(func));
        let body_block = t.push(ScopeKind::Block, NodeId(3), Some(for_scope));
        let lit = t.push(ScopeKind::FuncLit, NodeId(4), Some(body_block));
        assert!(t.is_loop_local(for_scope));
        assert!(t.is_loop_local(body_block));
        assert!(!t.is_loop_local(lit));
        assert!(!t.is_loop_local(func));
    }
}
