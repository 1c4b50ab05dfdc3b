//! Declarations, files and packages.

use super::node::{Name, NodeId};
use realmvm_derive::{BinaryCodec, Error};

#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub enum Decl {
    /// `is_crossing` is set by the resolver when the body starts with `crossing()`.
    Func {
        name: Name,
        recv: Option<NodeId>,
        ty: NodeId,
        body: Vec<NodeId>,
        is_crossing: bool,
    },
    Import {
        name: Name,
        pkg_path: String,
    },
    /// `names` are name-expression nodes so that defines can be annotated.
    Value {
        names: Vec<NodeId>,
        ty: Option<NodeId>,
        values: Vec<NodeId>,
        is_const: bool,
    },
    Type {
        name: Name,
        ty: NodeId,
        is_alias: bool,
    },
}

impl Decl {
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            Decl::Func { recv, ty, body, .. } => {
                recv.iter().chain(std::iter::once(ty)).chain(body).copied().collect()
            }
            Decl::Import { .. } => Vec::new(),
            Decl::Value { names, ty, values, .. } => {
                names.iter().chain(ty.iter()).chain(values).copied().collect()
            }
            Decl::Type { ty, .. } => vec![*ty],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct FileNode {
    pub name: String,
    pub pkg_name: Name,
    pub decls: Vec<NodeId>,
}

#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct PackageNode {
    pub pkg_path: String,
    pub pkg_name: Name,
    pub files: Vec<NodeId>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PackageNameError {
    #[error("invalid package name {0:?}: must match ^[a-z][a-z0-9_]+$")]
    InvalidName(String),
    #[error("invalid package path {0:?}")]
    InvalidPath(String),
}

/// Checks a package name against `^[a-z][a-z0-9_]+$`.
pub fn validate_pkg_name(name: &str) -> Result<(), PackageNameError> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && name.len() >= 2
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PackageNameError::InvalidName(name.to_string()))
    }
}

/// Checks a package path: slash separated, non-empty segments of
/// lowercase letters, digits, `_`, `-` and `.`.
pub fn validate_pkg_path(path: &str) -> Result<(), PackageNameError> {
    let valid = !path.is_empty()
        && path.split('/').all(|seg| {
            !seg.is_empty()
                && seg
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_-.".contains(c))
        });
    if valid {
        Ok(())
    } else {
        Err(PackageNameError::InvalidPath(path.to_string()))
    }
}

/// Realm packages live under `<domain>/r/...`; their state is owned by the
/// realm derived from the path.
pub fn is_realm_path(path: &str) -> bool {
    let mut segments = path.split('/');
    segments.next().is_some_and(|d| !d.is_empty())
        && segments.next() == Some("r")
        && segments.next().is_some_and(|s| !s.is_empty())
}
