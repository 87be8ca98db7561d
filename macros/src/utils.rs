use proc_macro::TokenStream;
use quote::ToTokens;
use std::fmt::Display;
use syn::{Attribute, Ident, LitStr};

pub fn error(tokens: impl ToTokens, message: impl Display) -> TokenStream {
    syn::Error::new_spanned(tokens, message)
        .to_compile_error()
        .into()
}

pub fn has_name(attribute: &Attribute, name: &str) -> bool {
    let path = attribute.path();
    path.segments.len() == 1 && path.segments[0].ident == name
}

/// Event names on the wire are the type names themselves (`PollOpened`).
pub fn create_str_literal_from_ident(type_name: &Ident) -> LitStr {
    LitStr::new(&type_name.to_string(), type_name.span())
}
