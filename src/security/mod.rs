//! Collaborators consulted by the HTTP-family transports and the router.
//!
//! - [`CorsPolicy`]: decides cross-origin requests before any body is read
//! - [`Authenticator`]: accepts or rejects a request from its headers

pub mod auth;
pub mod cors;

pub use auth::{AuthOutcome, Authenticator, Identity, StaticTokenAuthenticator};
pub use cors::{CorsDecision, CorsPolicy, OriginAllowList};
