use crate::object::StoreError;
use crate::preprocess::ProgramError;
use crate::realm::RealmError;
use realmvm_derive::Error;

/// Which failure class an error belongs to. Every class aborts the
/// transaction and discards its writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// The program is invalid; rejected before execution.
    ProgramValidity,
    /// A realm boundary rule was violated.
    RealmBoundary,
    /// The backing store returned data that fails verification.
    StorageIntegrity,
    /// Gas or call depth ran out.
    ResourceExhaustion,
    /// The program failed at run time (panic, bad operation).
    Runtime,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("{0}")]
    Program(#[from] ProgramError),
    #[error("{0}")]
    Realm(#[from] RealmError),
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("out of gas: used {used}, limit {limit}")]
    OutOfGas { used: u64, limit: u64 },
    #[error("call depth exceeded (limit {limit})")]
    CallDepthExceeded { limit: usize },
    #[error("panic: {0}")]
    Panic(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("index {index} out of range [0:{len}]")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("nil dereference")]
    NilDereference,
    #[error("integer overflow")]
    Overflow,
    #[error("invalid operation: {reason}")]
    InvalidOperation { reason: String },
    #[error("package {0} already exists")]
    PackageExists(String),
    #[error("unknown package {0}")]
    UnknownPackage(String),
    #[error("invalid call: {reason}")]
    InvalidCall { reason: String },
}

impl VmError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        VmError::InvalidOperation { reason: reason.into() }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            VmError::Program(_) | VmError::PackageExists(_) | VmError::UnknownPackage(_) | VmError::InvalidCall { .. } => {
                ErrorClass::ProgramValidity
            }
            VmError::Realm(_) => ErrorClass::RealmBoundary,
            VmError::Store(_) => ErrorClass::StorageIntegrity,
            VmError::OutOfGas { .. } | VmError::CallDepthExceeded { .. } => ErrorClass::ResourceExhaustion,
            VmError::Panic(_)
            | VmError::DivisionByZero
            | VmError::IndexOutOfRange { .. }
            | VmError::NilDereference
            | VmError::Overflow
            | VmError::InvalidOperation { .. } => ErrorClass::Runtime,
        }
    }
}
