//! Persistent object model.
//!
//! Composite values live as objects in a per-transaction heap. Objects
//! reachable from a package become "real": they get an [`ObjectId`], an
//! [`ObjectInfo`] header and are written to the backing store when the
//! transaction finalizes. Persisted objects are materialized lazily and
//! verified against the hash their referrer recorded.
//!
//! - [`id`]: object identities and store keys
//! - [`info`]: the header and its retain/release rules
//! - [`value`]: runtime and persisted value representations
//! - [`store`]: the heap, lazy loading, ownership tracking and finalization

pub mod errors;
pub mod id;
pub mod info;
pub mod store;
pub mod value;

pub use errors::StoreError;
pub use id::{ObjectId, keys};
pub use info::ObjectInfo;
pub use store::{FinalizeStats, ObjectRecord, ObjectStore, PackageRoot};
pub use value::{BlockParent, Handle, MapKey, ObjectBody, RefValue, StoredBody, StoredValue, Value, ValueOf};
