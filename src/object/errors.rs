use super::id::ObjectId;
use super::value::Handle;
use crate::types::encoding::DecodeError;
use crate::types::hash::Hash;
use realmvm_derive::Error;

/// Failures of the persistent object layer.
///
/// `Integrity` means the bytes in the backing store do not hash to what the
/// referring object recorded. It is never recovered from.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("object {0} not found in store")]
    Missing(ObjectId),
    #[error("integrity check failed for object {id}: expected hash {expected}, got {actual}")]
    Integrity { id: ObjectId, expected: Hash, actual: Hash },
    #[error("corrupt record: {0}")]
    Decode(#[from] DecodeError),
    #[error("invalid object handle {0}")]
    InvalidHandle(Handle),
    #[error("object {0} is referenced by a persisted object but was never attached")]
    Unattached(Handle),
    #[error("package {0} has no persisted state")]
    UnknownPackage(String),
    #[error("{kind} object has no element {index}")]
    NoSuchElement { kind: &'static str, index: u32 },
    #[error("expected a {expected} object, found {found}")]
    WrongKind { expected: &'static str, found: &'static str },
}
