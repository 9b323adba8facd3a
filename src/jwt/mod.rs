//! Access-token JWT verification: per-issuer algorithm selection, JWKS
//! fetch+cache, and DID-document key extraction.

pub mod claims;
pub mod did_resolver;
pub mod errors;
pub mod key_resolver;
pub mod verifier;

pub use did_resolver::HttpDidResolver;
pub use errors::JwtError;
pub use key_resolver::{CombinedResolver, DidKeyResolver, DidResolver, JwksKeyResolver, KeyResolver};
pub use verifier::JwtVerifier;
