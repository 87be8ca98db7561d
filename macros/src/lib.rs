use proc_macro::TokenStream;

mod event;
pub(crate) mod utils;

#[proc_macro_derive(DomainEvent, attributes(event))]
pub fn derive_domain_event(event: TokenStream) -> TokenStream {
    event::derive_domain_event::derive_domain_event(event)
}
