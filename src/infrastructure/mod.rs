//! Infrastructure layer - external concerns

pub mod crypto;

pub use crypto::{HmacSignatureVerifier, SignatureVerifier};
