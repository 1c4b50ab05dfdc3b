//! `#[derive(BinaryCodec)]`: tagged binary encoding for persisted records.
//!
//! Structs encode their fields in declaration order. Enums write a `u8`
//! tag (explicit discriminant or position) followed by the variant fields,
//! so every record kind in the store is self-describing.
//!
//! A field annotated with `#[binary_codec(skip)]` is ephemeral: it is never
//! written and decodes to `Default::default()`.
//!
//! Type parameters automatically receive `Encode` / `Decode` bounds.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    Data, DataEnum, DeriveInput, Fields, Generics, Ident, parse_macro_input, parse_quote,
};

pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let encode_generics = bounded(&input.generics, quote!(crate::types::encoding::Encode));
    let decode_generics = bounded(&input.generics, quote!(crate::types::encoding::Decode));

    let (encode_body, decode_body) = match &input.data {
        Data::Struct(data) => struct_bodies(&data.fields)?,
        Data::Enum(data) => enum_bodies(data)?,
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "BinaryCodec derive does not support unions",
            ));
        }
    };

    let (enc_impl, enc_ty, enc_where) = encode_generics.split_for_impl();
    let (dec_impl, dec_ty, dec_where) = decode_generics.split_for_impl();

    Ok(quote! {
        impl #enc_impl crate::types::encoding::Encode for #name #enc_ty #enc_where {
            fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                #encode_body
            }
        }

        impl #dec_impl crate::types::encoding::Decode for #name #dec_ty #dec_where {
            fn decode(input: &mut &[u8]) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                #decode_body
            }
        }
    })
}

/// Adds `param: bound` for every type parameter of the item.
fn bounded(generics: &Generics, bound: TokenStream2) -> Generics {
    let mut generics = generics.clone();
    let params: Vec<Ident> = generics.type_params().map(|p| p.ident.clone()).collect();
    let where_clause = generics.make_where_clause();
    for param in params {
        where_clause.predicates.push(parse_quote!(#param: #bound));
    }
    generics
}

/// Returns true when the field carries `#[binary_codec(skip)]`.
fn is_skipped(field: &syn::Field) -> syn::Result<bool> {
    let mut skip = false;
    for attr in &field.attrs {
        if !attr.path().is_ident("binary_codec") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                skip = true;
                Ok(())
            } else {
                Err(meta.error("unsupported binary_codec attribute; expected `skip`"))
            }
        })?;
    }
    Ok(skip)
}

/// Builds the encode statements and the constructor for a set of fields.
///
/// `access` maps a field position to the expression holding its value.
fn field_codec(
    fields: &Fields,
    access: impl Fn(usize, &syn::Field) -> TokenStream2,
) -> syn::Result<(Vec<TokenStream2>, TokenStream2)> {
    let mut encodes = Vec::new();
    let ctor = match fields {
        Fields::Unit => quote!(),
        Fields::Named(named) => {
            let mut inits = Vec::new();
            for (i, field) in named.named.iter().enumerate() {
                let ident = &field.ident;
                if is_skipped(field)? {
                    inits.push(quote! { #ident: ::std::default::Default::default(), });
                } else {
                    let value = access(i, field);
                    encodes.push(quote! { crate::types::encoding::Encode::encode(#value, out); });
                    inits.push(quote! { #ident: crate::types::encoding::Decode::decode(input)?, });
                }
            }
            quote!({ #(#inits)* })
        }
        Fields::Unnamed(unnamed) => {
            let mut inits = Vec::new();
            for (i, field) in unnamed.unnamed.iter().enumerate() {
                if is_skipped(field)? {
                    inits.push(quote! { ::std::default::Default::default(), });
                } else {
                    let value = access(i, field);
                    encodes.push(quote! { crate::types::encoding::Encode::encode(#value, out); });
                    inits.push(quote! { crate::types::encoding::Decode::decode(input)?, });
                }
            }
            quote!(( #(#inits)* ))
        }
    };
    Ok((encodes, ctor))
}

fn struct_bodies(fields: &Fields) -> syn::Result<(TokenStream2, TokenStream2)> {
    let (encodes, ctor) = field_codec(fields, |i, field| match &field.ident {
        Some(ident) => quote!(&self.#ident),
        None => {
            let index = syn::Index::from(i);
            quote!(&self.#index)
        }
    })?;
    let encode = if encodes.is_empty() {
        quote!(let _ = out;)
    } else {
        quote!(#(#encodes)*)
    };
    let decode = if matches!(fields, Fields::Unit) {
        quote!(let _ = input; Ok(Self))
    } else {
        quote!(Ok(Self #ctor))
    };
    Ok((encode, decode))
}

fn enum_bodies(data: &DataEnum) -> syn::Result<(TokenStream2, TokenStream2)> {
    let tags = discriminants(data)?;
    let mut encode_arms = Vec::new();
    let mut decode_arms = Vec::new();

    for (variant, tag) in data.variants.iter().zip(tags) {
        let ident = &variant.ident;
        let (encodes, ctor) = field_codec(&variant.fields, |i, field| match &field.ident {
            Some(name) => quote!(#name),
            None => {
                let binding = format_ident!("f{}", i);
                quote!(#binding)
            }
        })?;

        let pattern = match &variant.fields {
            Fields::Unit => quote!(Self::#ident),
            Fields::Named(named) => {
                let names = named.named.iter().map(|f| &f.ident);
                quote!(Self::#ident { #(#names),* })
            }
            Fields::Unnamed(unnamed) => {
                let bindings = (0..unnamed.unnamed.len()).map(|i| format_ident!("f{}", i));
                quote!(Self::#ident( #(#bindings),* ))
            }
        };

        encode_arms.push(quote! {
            #[allow(unused_variables)]
            #pattern => {
                crate::types::encoding::Encode::encode(&#tag, out);
                #(#encodes)*
            }
        });
        decode_arms.push(quote! {
            #tag => Ok(Self::#ident #ctor),
        });
    }

    let encode = quote! {
        match self {
            #(#encode_arms)*
        }
    };
    let decode = quote! {
        let tag: u8 = crate::types::encoding::Decode::decode(input)?;
        match tag {
            #(#decode_arms)*
            _ => Err(crate::types::encoding::DecodeError::InvalidValue),
        }
    };
    Ok((encode, decode))
}

/// Tag values follow Rust's discriminant rules and must fit in a `u8`.
fn discriminants(data: &DataEnum) -> syn::Result<Vec<u8>> {
    let mut tags = Vec::with_capacity(data.variants.len());
    let mut next: u16 = 0;
    for variant in &data.variants {
        let tag = match &variant.discriminant {
            Some((_, expr)) => explicit_tag(expr)?,
            None => u8::try_from(next).map_err(|_| {
                syn::Error::new_spanned(variant, "BinaryCodec enums support at most 256 variants")
            })?,
        };
        tags.push(tag);
        next = u16::from(tag) + 1;
    }
    Ok(tags)
}

fn explicit_tag(expr: &syn::Expr) -> syn::Result<u8> {
    if let syn::Expr::Lit(syn::ExprLit {
        lit: syn::Lit::Int(lit),
        ..
    }) = expr
    {
        return lit.base10_parse::<u8>();
    }
    Err(syn::Error::new_spanned(
        expr,
        "BinaryCodec discriminants must be integer literals in 0..=255",
    ))
}
