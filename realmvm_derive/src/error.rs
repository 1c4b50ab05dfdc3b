//! `#[derive(Error)]`: `Display` and `std::error::Error` for error enums and structs.
//!
//! ```ignore
//! use realmvm_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum LoadError {
//!     #[error("object {0} not found")]
//!     Missing(String),
//!
//!     #[error("hash mismatch: expected {expected}, got {actual}")]
//!     Mismatch { expected: u32, actual: u32 },
//!
//!     #[error("decode failed: {0}")]
//!     Decode(#[from] DecodeError),
//! }
//! ```
//!
//! A single-field tuple variant whose field is marked `#[from]` also gets a
//! `From<FieldType>` impl, so `?` lifts lower-layer errors automatically.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{ToTokens, format_ident, quote};
use syn::{Data, DeriveInput, Fields, Ident, Lit, Meta, parse_macro_input};

pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_error_derive(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_error_derive(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let display_body = match &input.data {
        Data::Enum(data_enum) => {
            let arms = data_enum
                .variants
                .iter()
                .map(|variant| {
                    let variant_name = &variant.ident;
                    let message = message_from_attrs(
                        &variant.attrs,
                        &variant.ident,
                        &format!("variant `{}`", variant.ident),
                    )?;
                    Ok(match &variant.fields {
                        Fields::Unit => quote! {
                            Self::#variant_name => write!(f, #message),
                        },
                        Fields::Unnamed(fields) => {
                            let bindings: Vec<_> = (0..fields.unnamed.len())
                                .map(|i| format_ident!("f{}", i))
                                .collect();
                            let format_str = positional_to_named(&message, fields.unnamed.len());
                            let used = mentioned(&format_str, &bindings);
                            quote! {
                                #[allow(unused_variables)]
                                Self::#variant_name(#(#bindings),*) => write!(f, #format_str, #(#used = #used),*),
                            }
                        }
                        Fields::Named(fields) => {
                            let names: Vec<_> = fields.named.iter().filter_map(|f| f.ident.clone()).collect();
                            let used = mentioned(&message, &names);
                            quote! {
                                #[allow(unused_variables)]
                                Self::#variant_name { #(#names),* } => write!(f, #message, #(#used = #used),*),
                            }
                        }
                    })
                })
                .collect::<syn::Result<Vec<_>>>()?;
            quote! {
                match self {
                    #(#arms)*
                }
            }
        }
        Data::Struct(data_struct) => {
            let message = message_from_attrs(
                &input.attrs,
                &input.ident,
                &format!("type `{}`", input.ident),
            )?;
            match &data_struct.fields {
                Fields::Unit => quote!(write!(f, #message)),
                Fields::Named(fields) => {
                    let names: Vec<_> = fields.named.iter().filter_map(|f| f.ident.clone()).collect();
                    let used = mentioned(&message, &names);
                    quote!(write!(f, #message, #(#used = self.#used),*))
                }
                Fields::Unnamed(fields) => {
                    let bindings: Vec<_> = (0..fields.unnamed.len())
                        .map(|i| format_ident!("f{}", i))
                        .collect();
                    let format_str = positional_to_named(&message, fields.unnamed.len());
                    let (used, indices): (Vec<_>, Vec<_>) = bindings
                        .iter()
                        .enumerate()
                        .filter(|(_, b)| mentions(&format_str, b))
                        .map(|(i, b)| (b.clone(), syn::Index::from(i)))
                        .unzip();
                    quote!(write!(f, #format_str, #(#used = self.#indices),*))
                }
            }
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "Error derive does not support unions",
            ));
        }
    };

    let from_impls = from_impls(input)?;

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                #display_body
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {}

        #(#from_impls)*
    })
}

/// `From` impls for every `Variant(#[from] Inner)`.
fn from_impls(input: &DeriveInput) -> syn::Result<Vec<TokenStream2>> {
    let Data::Enum(data_enum) = &input.data else {
        return Ok(Vec::new());
    };
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let mut impls = Vec::new();
    for variant in &data_enum.variants {
        let Fields::Unnamed(fields) = &variant.fields else {
            continue;
        };
        let marked: Vec<_> = fields
            .unnamed
            .iter()
            .filter(|f| f.attrs.iter().any(|a| a.path().is_ident("from")))
            .collect();
        if marked.is_empty() {
            continue;
        }
        if fields.unnamed.len() != 1 {
            return Err(syn::Error::new_spanned(
                variant,
                "#[from] is only supported on single-field tuple variants",
            ));
        }
        let variant_name = &variant.ident;
        let inner = &marked[0].ty;
        impls.push(quote! {
            impl #impl_generics ::std::convert::From<#inner> for #name #ty_generics #where_clause {
                fn from(source: #inner) -> Self {
                    Self::#variant_name(source)
                }
            }
        });
    }
    Ok(impls)
}

fn message_from_attrs<T: ToTokens>(
    attrs: &[syn::Attribute],
    target: &T,
    target_desc: &str,
) -> syn::Result<String> {
    for attr in attrs {
        if !attr.path().is_ident("error") {
            continue;
        }
        let Meta::List(meta_list) = &attr.meta else {
            return Err(syn::Error::new_spanned(
                &attr.meta,
                "invalid #[error] attribute; use #[error(\"message\")]",
            ));
        };
        return match syn::parse2::<Lit>(meta_list.tokens.clone()) {
            Ok(Lit::Str(lit)) => Ok(lit.value()),
            _ => Err(syn::Error::new_spanned(
                &attr.meta,
                "#[error] expects a string literal, e.g. #[error(\"name {0} not declared\")]",
            )),
        };
    }
    Err(syn::Error::new_spanned(
        target,
        format!("missing #[error(\"...\")] attribute on {target_desc}"),
    ))
}

/// Whether the format string interpolates `ident`.
fn mentions(format_str: &str, ident: &Ident) -> bool {
    let ident = ident.to_string();
    format_str.contains(&format!("{{{ident}}}")) || format_str.contains(&format!("{{{ident}:"))
}

fn mentioned(format_str: &str, idents: &[Ident]) -> Vec<Ident> {
    idents
        .iter()
        .filter(|ident| mentions(format_str, ident))
        .cloned()
        .collect()
}

/// Rewrites `{0}`, `{1}` into the `{f0}`, `{f1}` bindings used by the match arms.
fn positional_to_named(format_str: &str, field_count: usize) -> String {
    let mut result = format_str.to_string();
    for i in (0..field_count).rev() {
        result = result.replace(&format!("{{{i}}}"), &format!("{{f{i}}}"));
        result = result.replace(&format!("{{{i}:"), &format!("{{f{i}:"));
    }
    result
}
