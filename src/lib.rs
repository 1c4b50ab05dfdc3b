//! Deterministic smart-contract VM core.
//!
//! Resolves program trees into position-independent addresses, rewrites
//! loop captures onto the heap, persists program state as content-hashed
//! objects and polices realm boundaries while a tree-walking machine runs
//! transactions under gas.

pub mod ast;
pub mod config;
pub mod keeper;
pub mod machine;
pub mod object;
pub mod preprocess;
pub mod realm;
pub mod storage;
pub mod types;
pub mod utils;
