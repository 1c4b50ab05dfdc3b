use crate::ast::{AddressError, Name, NodeId};
use crate::ast::decl::PackageNameError;
use realmvm_derive::Error;

/// Static errors found while preprocessing a package.
///
/// Any of these rejects the whole package; nothing from it is stored.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProgramError {
    #[error("line {line}: undeclared name {name}")]
    UndeclaredName { name: Name, line: u32 },
    #[error("line {line}: {name} used before it is defined")]
    UsedBeforeDefined { name: Name, line: u32 },
    #[error("line {line}: {name} redeclared in this block")]
    Redeclared { name: Name, line: u32 },
    #[error("{name} redefined with a different type: {old} vs {new}")]
    ConflictingRedefinition { name: Name, old: String, new: String },
    #[error("{name} cannot change between const and var")]
    ConstStatusChanged { name: Name },
    #[error("too many names in one scope (limit {limit})")]
    TooManyNames { limit: usize },
    #[error("{name} is not a function and cannot be upgraded")]
    NotAFunction { name: Name },
    #[error("function {name} upgrade changes its signature: {old} vs {new}")]
    SignatureChanged { name: Name, old: String, new: String },
    #[error("method {method}: invalid receiver: {reason}")]
    InvalidMethodReceiver { method: Name, reason: String },
    #[error("line {line}: mixed keyed and unkeyed elements in composite literal")]
    MixedCompositeKeys { line: u32 },
    #[error("line {line}: crossing() must be the first statement of a function body")]
    MisplacedCrossing { line: u32 },
    #[error("line {line}: invalid cross call: {reason}")]
    InvalidCrossCall { line: u32, reason: String },
    #[error("line {line}: unknown field {field} in {ty}")]
    UnknownField { ty: String, field: Name, line: u32 },
    #[error("line {line}: {ty} has no field or method {sel}")]
    InvalidSelector { ty: String, sel: Name, line: u32 },
    #[error("line {line}: {name} is not exported by {pkg_path}")]
    Unexported { name: Name, pkg_path: String, line: u32 },
    #[error("line {line}: {reason}")]
    TypeError { line: u32, reason: String },
    #[error("line {line}: assignment mismatch: {lhs} names, {rhs} values")]
    AssignmentMismatch { line: u32, lhs: usize, rhs: usize },
    #[error("line {line}: {op} outside of a loop or switch")]
    BranchOutsideLoop { op: &'static str, line: u32 },
    #[error("line {line}: unknown label {label}")]
    UnknownLabel { label: Name, line: u32 },
    #[error("unknown import {0}")]
    UnknownImport(String),
    #[error("file {file} declares package {found}, expected {expected}")]
    PackageNameMismatch { file: String, found: Name, expected: Name },
    #[error("line {line}: {what} is not supported")]
    Unsupported { what: &'static str, line: u32 },
    #[error("malformed tree at node {node}: {reason}")]
    MalformedTree { node: NodeId, reason: &'static str },
    #[error("invalid address: {0}")]
    Address(#[from] AddressError),
    #[error("{0}")]
    Package(#[from] PackageNameError),
}
