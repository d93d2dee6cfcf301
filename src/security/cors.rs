//! Cross-origin policy.

use axum::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, VARY,
};
use axum::http::{HeaderName, HeaderValue, Method};

use crate::config::CorsConfig;

const DEFAULT_METHODS: &str = "POST, OPTIONS";
const DEFAULT_HEADERS: &str = "Content-Type, Authorization";
const PREFLIGHT_MAX_AGE: &str = "86400";

/// Outcome of a cross-origin check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsDecision {
    /// Proceed, setting these response headers.
    Allow(Vec<(HeaderName, HeaderValue)>),
    /// Reject with 403.
    Deny,
}

impl CorsDecision {
    /// Returns `true` if the request may proceed.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }
}

/// Decides whether a request from `origin` using `method` may proceed.
pub trait CorsPolicy: Send + Sync + std::fmt::Debug {
    /// `origin` is the request's `Origin` header, if any.
    fn decide(&self, origin: Option<&str>, method: &Method) -> CorsDecision;
}

/// Allow-list of origins.
///
/// Entries are matched exactly, `"*"` matches any origin and `"*.example.com"`
/// matches by suffix. Requests without an `Origin` header are same-origin or
/// non-browser and always allowed. A disabled list allows everything.
#[derive(Debug, Clone)]
pub struct OriginAllowList {
    enabled: bool,
    origins: Vec<String>,
    methods: HeaderValue,
    headers: HeaderValue,
}

impl OriginAllowList {
    /// A policy that allows every request.
    #[must_use]
    pub fn allow_all() -> Self {
        Self {
            enabled: false,
            origins: Vec::new(),
            methods: HeaderValue::from_static(DEFAULT_METHODS),
            headers: HeaderValue::from_static(DEFAULT_HEADERS),
        }
    }

    /// An enabled policy allowing only `origins`.
    #[must_use]
    pub fn new(origins: Vec<String>) -> Self {
        Self {
            enabled: true,
            origins,
            ..Self::allow_all()
        }
    }

    fn is_allowed(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return true;
        };
        self.origins.iter().any(|allowed| {
            allowed == "*"
                || allowed == origin
                || allowed
                    .strip_prefix('*')
                    .is_some_and(|suffix| suffix.starts_with('.') && origin.ends_with(suffix))
        })
    }
}

impl From<&CorsConfig> for OriginAllowList {
    fn from(config: &CorsConfig) -> Self {
        Self {
            enabled: config.enabled,
            origins: config.origins.clone(),
            methods: joined_or(&config.methods, DEFAULT_METHODS),
            headers: joined_or(&config.headers, DEFAULT_HEADERS),
        }
    }
}

fn joined_or(values: &[String], default: &'static str) -> HeaderValue {
    if values.is_empty() {
        return HeaderValue::from_static(default);
    }
    HeaderValue::from_str(&values.join(", ")).unwrap_or_else(|_| HeaderValue::from_static(default))
}

impl CorsPolicy for OriginAllowList {
    fn decide(&self, origin: Option<&str>, method: &Method) -> CorsDecision {
        if !self.enabled {
            return CorsDecision::Allow(Vec::new());
        }
        if !self.is_allowed(origin) {
            return CorsDecision::Deny;
        }

        let mut headers = Vec::new();
        if let Some(origin) = origin {
            let Ok(value) = HeaderValue::from_str(origin) else {
                return CorsDecision::Deny;
            };
            headers.push((ACCESS_CONTROL_ALLOW_ORIGIN, value));
        }
        headers.push((
            ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        ));

        if *method == Method::OPTIONS {
            headers.push((ACCESS_CONTROL_ALLOW_METHODS, self.methods.clone()));
            headers.push((ACCESS_CONTROL_ALLOW_HEADERS, self.headers.clone()));
            headers.push((
                ACCESS_CONTROL_MAX_AGE,
                HeaderValue::from_static(PREFLIGHT_MAX_AGE),
            ));
            headers.push((
                VARY,
                HeaderValue::from_static(
                    "Origin, Access-Control-Request-Method, Access-Control-Request-Headers",
                ),
            ));
        } else {
            headers.push((VARY, HeaderValue::from_static("Origin")));
        }

        CorsDecision::Allow(headers)
    }
}
