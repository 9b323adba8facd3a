//! DPoP Proof Engine (RFC 9449): parsing, algorithm/curve binding, signature
//! verification, claim validation, access-token-hash binding, and replay
//! protection via [`nonce_cache::NonceCache`].

pub mod engine;
pub mod errors;
pub mod nonce_cache;
pub mod types;

pub use engine::ProofEngine;
pub use errors::DpopError;
pub use types::{DpopPolicy, ProofEngineConfig, VerifiedDpopProof};
