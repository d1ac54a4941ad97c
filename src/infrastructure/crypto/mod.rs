pub mod signature;

pub use signature::{HmacSignatureVerifier, SignatureError, SignatureVerifier, SignedFields};
