//! Primitive types shared by every layer of the VM.
//!
//! - `encoding`: canonical binary encoding for persisted records
//! - `hash`: SHA3-256 content hashes
//! - `address`: realm/account addresses and package ids

pub mod address;
pub mod encoding;
pub mod hash;
