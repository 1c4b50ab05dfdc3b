//! Program tree: the closed set of node kinds the VM preprocesses and runs.
//!
//! Nodes live in a per-package arena ([`ProgramTree`]) and refer to each
//! other by [`NodeId`]. Every node kind is a variant of [`Expr`], [`Stmt`],
//! [`Decl`], or the file/package wrappers, so matches stay exhaustive.
//!
//! - [`node`]: ids, names and per-node attributes
//! - [`path`]: resolved addresses memoized on name nodes
//! - [`expr`], [`stmt`], [`decl`]: the node variants
//! - [`tree`]: the arena
//! - [`builder`]: programmatic construction

pub mod builder;
pub mod decl;
pub mod expr;
pub mod node;
pub mod path;
pub mod stmt;
pub mod tree;

pub use builder::TreeBuilder;
pub use decl::{Decl, FileNode, PackageNode, is_realm_path, validate_pkg_name, validate_pkg_path};
pub use expr::{BinaryOp, Capture, Expr, KeyValue, Keying, LitKind, NameExpr, NameKind, UnaryOp};
pub use node::{AttrKey, AttrValue, Attributes, Location, Name, NodeId, ScopeId};
pub use path::{Address, AddressCategory, AddressError, MAX_VALUE_PATH_DEPTH};
pub use stmt::{AssignOp, BranchOp, IncDecOp, Stmt};
pub use tree::{Node, NodeKind, ProgramTree};
