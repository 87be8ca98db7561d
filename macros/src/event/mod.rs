pub mod derive_domain_event;
