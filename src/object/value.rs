//! Runtime and persisted value representations.
//!
//! [`ValueOf`] and [`ObjectBody`] are generic over how an object reference
//! is held: in memory a reference is a [`Handle`] into the transaction's
//! heap, in the store it is a [`RefValue`] carrying the target's identity
//! and expected hash. Converting between the two is a single
//! [`ObjectBody::try_map_refs`] call.

use super::id::ObjectId;
use crate::ast::NodeId;
use crate::preprocess::{Type, TypeRef, Universal};
use crate::types::hash::Hash;
use realmvm_derive::BinaryCodec;
use std::collections::BTreeMap;
use std::fmt;

/// Index of an object in the transaction heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(pub u32);

impl Handle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Lazy reference to a persisted object.
///
/// `hash` is the expected content hash for owned objects. Escaped objects
/// and packages carry a zero hash; theirs is kept in the escaped-hash and
/// package-root indexes, since any number of referrers may point at them.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct RefValue {
    pub object_id: ObjectId,
    pub escaped: bool,
    pub pkg_path: Option<String>,
    pub hash: Hash,
}

/// A value as held in slots, fields and elements.
///
/// Structs and arrays are objects with value semantics: they are copied
/// whenever they are stored. Everything else that points at an object
/// shares it.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub enum ValueOf<R> {
    Nil,
    Bool(bool),
    Int(i64),
    String(String),
    Struct(R),
    Array(R),
    Map(R),
    Closure(R),
    /// Window over a list object; capacity runs to the end of the list.
    Slice {
        list: R,
        offset: u32,
        len: u32,
    },
    /// Address of element `index` of an object (field, element, slot).
    Pointer {
        base: R,
        index: u32,
    },
    /// Cell of a boxed name. Never visible to programs.
    HeapItem(R),
    /// Top-level function.
    Func {
        pkg_path: String,
        decl: NodeId,
    },
    /// Method value with its receiver bound.
    Bound {
        recv: Box<ValueOf<R>>,
        pkg_path: String,
        decl: NodeId,
    },
    Package(String),
    Type(Type),
    Builtin(Universal),
    /// Results of a multi-value call.
    Tuple(Vec<ValueOf<R>>),
}

pub type Value = ValueOf<Handle>;
pub type StoredValue = ValueOf<RefValue>;

impl<R: Clone> ValueOf<R> {
    /// Object references held directly by this value.
    pub fn refs(&self) -> Vec<R> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs(&self, out: &mut Vec<R>) {
        match self {
            ValueOf::Struct(r)
            | ValueOf::Array(r)
            | ValueOf::Map(r)
            | ValueOf::Closure(r)
            | ValueOf::HeapItem(r) => out.push(r.clone()),
            ValueOf::Slice { list, .. } => out.push(list.clone()),
            ValueOf::Pointer { base, .. } => out.push(base.clone()),
            ValueOf::Bound { recv, .. } => recv.collect_refs(out),
            ValueOf::Tuple(items) => items.iter().for_each(|v| v.collect_refs(out)),
            ValueOf::Nil
            | ValueOf::Bool(_)
            | ValueOf::Int(_)
            | ValueOf::String(_)
            | ValueOf::Func { .. }
            | ValueOf::Package(_)
            | ValueOf::Type(_)
            | ValueOf::Builtin(_) => {}
        }
    }

    /// Rebuilds the value with every reference converted by `f`.
    pub fn try_map_refs<S, E>(&self, f: &mut impl FnMut(&R) -> Result<S, E>) -> Result<ValueOf<S>, E> {
        Ok(match self {
            ValueOf::Nil => ValueOf::Nil,
            ValueOf::Bool(b) => ValueOf::Bool(*b),
            ValueOf::Int(i) => ValueOf::Int(*i),
            ValueOf::String(s) => ValueOf::String(s.clone()),
            ValueOf::Struct(r) => ValueOf::Struct(f(r)?),
            ValueOf::Array(r) => ValueOf::Array(f(r)?),
            ValueOf::Map(r) => ValueOf::Map(f(r)?),
            ValueOf::Closure(r) => ValueOf::Closure(f(r)?),
            ValueOf::Slice { list, offset, len } => ValueOf::Slice {
                list: f(list)?,
                offset: *offset,
                len: *len,
            },
            ValueOf::Pointer { base, index } => ValueOf::Pointer {
                base: f(base)?,
                index: *index,
            },
            ValueOf::HeapItem(r) => ValueOf::HeapItem(f(r)?),
            ValueOf::Func { pkg_path, decl } => ValueOf::Func {
                pkg_path: pkg_path.clone(),
                decl: *decl,
            },
            ValueOf::Bound { recv, pkg_path, decl } => ValueOf::Bound {
                recv: Box::new(recv.try_map_refs(&mut *f)?),
                pkg_path: pkg_path.clone(),
                decl: *decl,
            },
            ValueOf::Package(p) => ValueOf::Package(p.clone()),
            ValueOf::Type(t) => ValueOf::Type(t.clone()),
            ValueOf::Builtin(u) => ValueOf::Builtin(*u),
            ValueOf::Tuple(items) => ValueOf::Tuple(
                items
                    .iter()
                    .map(|v| v.try_map_refs(&mut *f))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

impl<R> ValueOf<R> {
    pub fn kind(&self) -> &'static str {
        match self {
            ValueOf::Nil => "nil",
            ValueOf::Bool(_) => "bool",
            ValueOf::Int(_) => "int",
            ValueOf::String(_) => "string",
            ValueOf::Struct(_) => "struct",
            ValueOf::Array(_) => "array",
            ValueOf::Map(_) => "map",
            ValueOf::Closure(_) | ValueOf::Func { .. } | ValueOf::Bound { .. } => "func",
            ValueOf::Slice { .. } => "slice",
            ValueOf::Pointer { .. } => "pointer",
            ValueOf::HeapItem(_) => "heap item",
            ValueOf::Package(_) => "package",
            ValueOf::Type(_) => "type",
            ValueOf::Builtin(_) => "builtin",
            ValueOf::Tuple(_) => "tuple",
        }
    }
}

/// Key of a map entry. Maps iterate in key order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, BinaryCodec)]
pub enum MapKey {
    Bool(bool),
    Int(i64),
    String(String),
}

impl MapKey {
    pub fn from_value<R>(v: &ValueOf<R>) -> Option<MapKey> {
        match v {
            ValueOf::Bool(b) => Some(MapKey::Bool(*b)),
            ValueOf::Int(i) => Some(MapKey::Int(*i)),
            ValueOf::String(s) => Some(MapKey::String(s.clone())),
            _ => None,
        }
    }

    pub fn to_value<R>(&self) -> ValueOf<R> {
        match self {
            MapKey::Bool(b) => ValueOf::Bool(*b),
            MapKey::Int(i) => ValueOf::Int(*i),
            MapKey::String(s) => ValueOf::String(s.clone()),
        }
    }
}

/// Enclosing block of a closure or block object.
///
/// File blocks only hold imports, which are rebuilt from the compiled
/// package, so they are referenced by node instead of by object.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub enum BlockParent<R> {
    Block(R),
    File(NodeId),
}

/// Content of a composite object.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub enum ObjectBody<R> {
    Struct {
        ty: Option<TypeRef>,
        fields: Vec<ValueOf<R>>,
    },
    Array {
        elems: Vec<ValueOf<R>>,
    },
    /// Backing store of slices.
    List {
        elems: Vec<ValueOf<R>>,
    },
    /// `value_ty` gives reads of missing keys their zero value.
    Map {
        value_ty: Type,
        entries: BTreeMap<MapKey, ValueOf<R>>,
    },
    Closure {
        pkg_path: String,
        decl: NodeId,
        parent: BlockParent<R>,
        captures: Vec<ValueOf<R>>,
    },
    Block {
        pkg_path: String,
        source: NodeId,
        parent: BlockParent<R>,
        slots: Vec<ValueOf<R>>,
    },
    Package {
        pkg_path: String,
        slots: Vec<ValueOf<R>>,
    },
    HeapItem {
        value: ValueOf<R>,
    },
}

pub type StoredBody = ObjectBody<RefValue>;

impl<R> ObjectBody<R> {
    pub fn kind(&self) -> &'static str {
        match self {
            ObjectBody::Struct { .. } => "struct",
            ObjectBody::Array { .. } => "array",
            ObjectBody::List { .. } => "list",
            ObjectBody::Map { .. } => "map",
            ObjectBody::Closure { .. } => "closure",
            ObjectBody::Block { .. } => "block",
            ObjectBody::Package { .. } => "package",
            ObjectBody::HeapItem { .. } => "heap item",
        }
    }

    pub fn is_package(&self) -> bool {
        matches!(self, ObjectBody::Package { .. })
    }

    /// Number of value slots, for allocation gas.
    pub fn num_slots(&self) -> usize {
        match self {
            ObjectBody::Struct { fields, .. } => fields.len(),
            ObjectBody::Array { elems } | ObjectBody::List { elems } => elems.len(),
            ObjectBody::Map { entries, .. } => entries.len(),
            ObjectBody::Closure { captures, .. } => captures.len() + 1,
            ObjectBody::Block { slots, .. } | ObjectBody::Package { slots, .. } => slots.len(),
            ObjectBody::HeapItem { .. } => 1,
        }
    }

    /// Indexed element: field, array or list element, slot, or the
    /// content of a heap item (index 0).
    pub fn elem(&self, index: u32) -> Option<&ValueOf<R>> {
        let i = index as usize;
        match self {
            ObjectBody::Struct { fields: v, .. }
            | ObjectBody::Array { elems: v }
            | ObjectBody::List { elems: v }
            | ObjectBody::Block { slots: v, .. }
            | ObjectBody::Package { slots: v, .. } => v.get(i),
            ObjectBody::HeapItem { value } if i == 0 => Some(value),
            ObjectBody::HeapItem { .. } | ObjectBody::Map { .. } | ObjectBody::Closure { .. } => None,
        }
    }

    pub fn elem_mut(&mut self, index: u32) -> Option<&mut ValueOf<R>> {
        let i = index as usize;
        match self {
            ObjectBody::Struct { fields: v, .. }
            | ObjectBody::Array { elems: v }
            | ObjectBody::List { elems: v }
            | ObjectBody::Block { slots: v, .. }
            | ObjectBody::Package { slots: v, .. } => v.get_mut(i),
            ObjectBody::HeapItem { value } if i == 0 => Some(value),
            ObjectBody::HeapItem { .. } | ObjectBody::Map { .. } | ObjectBody::Closure { .. } => None,
        }
    }
}

impl<R: Clone> ObjectBody<R> {
    /// Every object this body references, in encoding order.
    pub fn children(&self) -> Vec<R> {
        let mut out = Vec::new();
        let mut values = |vs: &[ValueOf<R>]| {
            for v in vs {
                v.collect_refs(&mut out);
            }
        };
        match self {
            ObjectBody::Struct { fields, .. } => values(fields),
            ObjectBody::Array { elems } | ObjectBody::List { elems } => values(elems),
            ObjectBody::Map { entries, .. } => {
                for v in entries.values() {
                    v.collect_refs(&mut out);
                }
            }
            ObjectBody::Closure { parent, captures, .. } => {
                values(captures);
                if let BlockParent::Block(r) = parent {
                    out.push(r.clone());
                }
            }
            ObjectBody::Block { parent, slots, .. } => {
                values(slots);
                if let BlockParent::Block(r) = parent {
                    out.push(r.clone());
                }
            }
            ObjectBody::Package { slots, .. } => values(slots),
            ObjectBody::HeapItem { value } => value.collect_refs(&mut out),
        }
        out
    }

    /// Rebuilds the body with every reference converted by `f`.
    pub fn try_map_refs<S, E>(&self, f: &mut impl FnMut(&R) -> Result<S, E>) -> Result<ObjectBody<S>, E> {
        Ok(match self {
            ObjectBody::Struct { ty, fields } => ObjectBody::Struct {
                ty: ty.clone(),
                fields: map_values(fields, f)?,
            },
            ObjectBody::Array { elems } => ObjectBody::Array {
                elems: map_values(elems, f)?,
            },
            ObjectBody::List { elems } => ObjectBody::List {
                elems: map_values(elems, f)?,
            },
            ObjectBody::Map { value_ty, entries } => {
                let mut out = BTreeMap::new();
                for (k, v) in entries {
                    out.insert(k.clone(), v.try_map_refs(&mut *f)?);
                }
                ObjectBody::Map {
                    value_ty: value_ty.clone(),
                    entries: out,
                }
            }
            ObjectBody::Closure {
                pkg_path,
                decl,
                parent,
                captures,
            } => ObjectBody::Closure {
                pkg_path: pkg_path.clone(),
                decl: *decl,
                captures: map_values(captures, f)?,
                parent: map_parent(parent, f)?,
            },
            ObjectBody::Block {
                pkg_path,
                source,
                parent,
                slots,
            } => ObjectBody::Block {
                pkg_path: pkg_path.clone(),
                source: *source,
                slots: map_values(slots, f)?,
                parent: map_parent(parent, f)?,
            },
            ObjectBody::Package { pkg_path, slots } => ObjectBody::Package {
                pkg_path: pkg_path.clone(),
                slots: map_values(slots, f)?,
            },
            ObjectBody::HeapItem { value } => ObjectBody::HeapItem {
                value: value.try_map_refs(&mut *f)?,
            },
        })
    }
}

fn map_values<R: Clone, S, E>(
    vs: &[ValueOf<R>],
    f: &mut impl FnMut(&R) -> Result<S, E>,
) -> Result<Vec<ValueOf<S>>, E> {
    vs.iter().map(|v| v.try_map_refs(&mut *f)).collect()
}

fn map_parent<R, S, E>(p: &BlockParent<R>, f: &mut impl FnMut(&R) -> Result<S, E>) -> Result<BlockParent<S>, E> {
    Ok(match p {
        BlockParent::Block(r) => BlockParent::Block(f(r)?),
        BlockParent::File(n) => BlockParent::File(*n),
    })
}
