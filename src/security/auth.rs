//! Request authentication.
//!
//! The router consults an [`Authenticator`] for requests that arrived over an
//! HTTP-family transport; stdio requests are trusted.

use std::fmt;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

use crate::config::AuthConfig;

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Who the caller is.
    pub subject: String,
}

/// Result of authenticating a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The caller is who they claim to be.
    Accepted(Identity),
    /// The request must be refused.
    Rejected(String),
}

/// Authenticates a request from its headers.
pub trait Authenticator: Send + Sync {
    /// Inspects the request headers.
    fn authenticate(&self, headers: &HeaderMap) -> AuthOutcome;
}

/// Accepts `Authorization: Bearer <token>` for one shared secret.
#[derive(Clone)]
pub struct StaticTokenAuthenticator {
    token: String,
}

impl fmt::Debug for StaticTokenAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenAuthenticator")
            .field("token", &"<redacted>")
            .finish()
    }
}

impl StaticTokenAuthenticator {
    /// Creates an authenticator for `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Builds the authenticator described by the configuration, if auth is
    /// enabled and a token is set.
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        config
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(Self::new)
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn authenticate(&self, headers: &HeaderMap) -> AuthOutcome {
        let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
            return AuthOutcome::Rejected("missing Authorization header".to_string());
        };

        let Some(token) = bearer_token(value) else {
            return AuthOutcome::Rejected("expected a Bearer token".to_string());
        };

        if constant_time_eq(token.as_bytes(), self.token.as_bytes()) {
            AuthOutcome::Accepted(Identity {
                subject: "token".to_string(),
            })
        } else {
            AuthOutcome::Rejected("invalid token".to_string())
        }
    }
}

fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
