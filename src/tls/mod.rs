//! TLS for `wss://` targets, backed by rustls.
//!
//! Honors [`TlsOptions`](crate::config::TlsOptions): certificate
//! verification can be switched off for self-signed test servers, and a
//! client certificate can be presented from PEM bytes.

mod rustls_impl;

pub use rustls_impl::{
    TlsConnector, TlsError, TlsStream, client_config, parse_certs, parse_private_key,
};
