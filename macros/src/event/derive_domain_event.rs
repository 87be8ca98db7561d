use proc_macro::TokenStream;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{parse_macro_input, Attribute, DeriveInput, Ident, LitStr, Token};

use crate::utils::{create_str_literal_from_ident, error, has_name};

pub fn derive_domain_event(event: TokenStream) -> TokenStream {
    let input = parse_macro_input!(event as DeriveInput);

    if let syn::Data::Union(_) = input.data {
        return error(
            &input.ident,
            "DomainEvent can only be derived for a struct or an enum",
        );
    }

    let arguments = match DomainEventArguments::try_from(input.attrs.as_slice()) {
        Ok(arguments) => arguments,
        Err(error) => return error.into_compile_error().into(),
    };

    let type_name = &input.ident;
    let event_name = arguments
        .event_name
        .unwrap_or_else(|| create_str_literal_from_ident(type_name));

    if event_name.value().trim().is_empty() {
        return error(event_name, "an event name must not be empty");
    }

    let (impl_generics, type_generics, where_clause) = input.generics.split_for_impl();

    TokenStream::from(quote! {
        impl #impl_generics ballotbox::DomainEvent for #type_name #type_generics #where_clause {
            const NAME: &'static str = #event_name;
        }
    })
}

#[derive(Default)]
struct DomainEventArguments {
    event_name: Option<LitStr>,
}

impl Parse for DomainEventArguments {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        if input.is_empty() {
            return Ok(DomainEventArguments::default());
        }
        let argument = input.parse::<Ident>()?;
        if argument != "name" {
            return Err(syn::Error::new_spanned(argument, "unexpected argument"));
        }
        input.parse::<Token![=]>()?;
        Ok(DomainEventArguments {
            event_name: Some(input.parse()?),
        })
    }
}

impl TryFrom<&[Attribute]> for DomainEventArguments {
    type Error = syn::Error;

    fn try_from(attributes: &[Attribute]) -> Result<Self, Self::Error> {
        attributes
            .iter()
            .find(|attribute| has_name(attribute, "event"))
            .map(Attribute::parse_args)
            .unwrap_or_else(|| Ok(DomainEventArguments::default()))
    }
}
