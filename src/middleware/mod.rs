pub mod authenticator;
pub mod logging;
pub mod rate_limit;

pub use authenticator::{AuthState, OptionalAuth, RequireAuth};
