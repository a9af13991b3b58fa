//! Derive macros mapping a fieldless enum's variants to their BASIC keyword
//! spelling, replacing the teacher's `InteropGetName`/`EnumFromStr` derives
//! (same concern: deriving a static name table from enum variant idents
//! instead of writing it out by hand).

use proc_macro::TokenStream;
use quote::quote;

fn get_enum_variants(
    input: &syn::DeriveInput,
) -> &syn::punctuated::Punctuated<syn::Variant, syn::token::Comma> {
    let variants = match &input.data {
        syn::Data::Enum(enum_item) => &enum_item.variants,
        _ => panic!("KeywordName/KeywordFromStr can only be derived for enums"),
    };

    assert!(
        variants.iter().all(|v| v.fields.is_empty()),
        "all variants must be fieldless"
    );

    variants
}

/// Derives `b1util::KeywordName` using the upper-cased variant identifier as
/// the keyword spelling (`GoSub` -> `"GOSUB"`).
#[proc_macro_derive(KeywordName)]
pub fn keyword_name_derive(input: TokenStream) -> TokenStream {
    let syn_item: syn::DeriveInput = syn::parse(input).unwrap();
    let name = &syn_item.ident;
    let variants = get_enum_variants(&syn_item);

    let idents: Vec<_> = variants.iter().map(|v| &v.ident).collect();
    let spellings: Vec<_> = variants
        .iter()
        .map(|v| v.ident.to_string().to_uppercase())
        .collect();

    let expanded = quote! {
        impl ::b1util::KeywordName for #name {
            fn keyword_name(&self) -> &'static str {
                match self {
                    #( #name::#idents => #spellings, )*
                }
            }
        }
    };
    expanded.into()
}

/// Derives `b1util::KeywordFromStr`, matching case-insensitively against the
/// upper-cased variant identifier.
#[proc_macro_derive(KeywordFromStr)]
pub fn keyword_from_str_derive(input: TokenStream) -> TokenStream {
    let syn_item: syn::DeriveInput = syn::parse(input).unwrap();
    let name = &syn_item.ident;
    let name_str = name.to_string();
    let variants = get_enum_variants(&syn_item);

    let idents: Vec<_> = variants.iter().map(|v| &v.ident).collect();
    let spellings: Vec<_> = variants
        .iter()
        .map(|v| v.ident.to_string().to_uppercase())
        .collect();

    let expanded = quote! {
        impl ::b1util::KeywordFromStr for #name {
            fn from_keyword(s: &str) -> ::std::result::Result<#name, ::b1util::ParseKeywordError> {
                let upper = s.to_ascii_uppercase();
                match upper.as_str() {
                    #( #spellings => Ok(#name::#idents), )*
                    _ => Err(::b1util::ParseKeywordError {
                        value: s.to_string(),
                        enum_name: #name_str,
                    }),
                }
            }
        }
    };
    expanded.into()
}
