//! Aggregator API-Key Service: hashed-key issuance paired with an embedded,
//! DPoP-driven OAuth session, and the handlers exposing it over XRPC.

pub mod dpop_client;
pub mod handlers;
pub mod key_service;
pub mod models;
pub mod repository;
pub mod session_store;

pub use handlers::AggregatorState;
pub use key_service::{ApiKeyService, KeyValidationError};
pub use models::{Aggregator, AggregatorCredentials, KeyInfo, KeyStatus, OAuthSession};
pub use repository::{CredentialsRepository, PgCredentialsRepository};
pub use session_store::{PgSessionStore, SessionStore};
