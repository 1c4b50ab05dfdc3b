//! Derive macros for the realmvm crate.
//!
//! Provides:
//! - `#[derive(BinaryCodec)]` - tagged binary encoding for persisted records
//! - `#[derive(Error)]` - `Display`/`Error` boilerplate with optional `#[from]` conversions

mod binary_codec;
mod error;

use proc_macro::TokenStream;

/// Implements `Encode` and `Decode` for structs and enums.
///
/// Fields marked `#[binary_codec(skip)]` are not written and decode to `Default::default()`.
#[proc_macro_derive(BinaryCodec, attributes(binary_codec))]
pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    binary_codec::derive_binary_codec(input)
}

/// Implements `Display` and `Error` for error types.
#[proc_macro_derive(Error, attributes(error, from))]
pub fn derive_error(input: TokenStream) -> TokenStream {
    error::derive_error(input)
}
