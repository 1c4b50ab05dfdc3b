//! Identifiers, names and per-node attributes.

use realmvm_derive::BinaryCodec;
use std::collections::BTreeMap;
use std::fmt;

/// Index of a node in its [`ProgramTree`](super::ProgramTree) arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BinaryCodec)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index of a scope in a [`ScopeTable`](crate::preprocess::ScopeTable).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BinaryCodec)]
pub struct ScopeId(pub u32);

impl ScopeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An identifier as written in the program.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BinaryCodec)]
pub struct Name(pub String);

impl Name {
    pub const BLANK: &'static str = "_";

    pub fn new(s: impl Into<String>) -> Self {
        Name(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0 == Self::BLANK
    }

    /// Exported names start with an uppercase letter.
    pub fn is_exported(&self) -> bool {
        self.0.chars().next().is_some_and(char::is_uppercase)
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name(s.to_string())
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source position used in error messages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Location {
    pub pkg_path: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}:{}", self.pkg_path, self.file, self.line, self.column)
    }
}

/// Keys of the preprocessing-only attribute map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttrKey {
    /// Node has been through the resolver.
    Preprocessed,
    /// Top-level name was reserved before its declaration was processed.
    Predefined,
    /// Statement defines names that were boxed into heap items.
    HeapDefines,
    /// Closure reads or writes boxed names from an enclosing loop.
    HeapUses,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttrValue {
    Flag,
    Names(Vec<Name>),
}

/// Per-node metadata.
///
/// Position and label are part of the persisted node. `data` holds
/// annotations that only matter while preprocessing and is never encoded.
#[derive(Clone, Debug, Default, PartialEq, Eq, BinaryCodec)]
pub struct Attributes {
    pub line: u32,
    pub column: u32,
    pub label: Option<Name>,
    #[binary_codec(skip)]
    data: BTreeMap<AttrKey, AttrValue>,
}

impl Attributes {
    pub fn at(line: u32, column: u32) -> Self {
        Self {
            line,
            column,
            ..Self::default()
        }
    }

    pub fn get(&self, key: AttrKey) -> Option<&AttrValue> {
        self.data.get(&key)
    }

    pub fn has(&self, key: AttrKey) -> bool {
        self.data.contains_key(&key)
    }

    pub fn set(&mut self, key: AttrKey, value: AttrValue) {
        self.data.insert(key, value);
    }

    pub fn delete(&mut self, key: AttrKey) {
        self.data.remove(&key);
    }

    /// Appends `name` to a name-list attribute, keeping it duplicate free.
    pub fn add_name(&mut self, key: AttrKey, name: &Name) {
        match self.data.entry(key).or_insert_with(|| AttrValue::Names(Vec::new())) {
            AttrValue::Names(names) => {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            slot @ AttrValue::Flag => *slot = AttrValue::Names(vec![name.clone()]),
        }
    }

    pub fn names(&self, key: AttrKey) -> &[Name] {
        match self.data.get(&key) {
            Some(AttrValue::Names(names)) => names,
            _ => &[],
        }
    }

    pub fn is_ephemeral_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::encoding::{Decode, Encode};

    #[test]
    fn ephemeral_data_is_not_persisted() {
        let mut attrs = Attributes::at(12, 4);
        attrs.label = Some(Name::from("outer"));
        attrs.set(AttrKey::Preprocessed, AttrValue::Flag);
        attrs.add_name(AttrKey::HeapDefines, &Name::from("z"));

        let decoded = Attributes::from_bytes(&attrs.to_bytes()).unwrap();
        assert_eq!(decoded.line, 12);
        assert_eq!(decoded.column, 4);
        assert_eq!(decoded.label, Some(Name::from("outer")));
        assert!(decoded.is_ephemeral_empty());
        assert!(!attrs.is_ephemeral_empty());
    }

    #[test]
    fn add_name_deduplicates() {
        let mut attrs = Attributes::default();
        attrs.add_name(AttrKey::HeapUses, &Name::from("z"));
        attrs.add_name(AttrKey::HeapUses, &Name::from("z"));
        attrs.add_name(AttrKey::HeapUses, &Name::from("f"));
        assert_eq!(attrs.names(AttrKey::HeapUses), &[Name::from("z"), Name::from("f")]);
    }

    #[test]
    fn name_predicates() {
        assert!(Name::from("_").is_blank());
        assert!(Name::from("Inc").is_exported());
        assert!(!Name::from("inc").is_exported());
    }
}
