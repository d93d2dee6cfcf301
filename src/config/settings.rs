//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::mcp::session::SessionSettings;
use crate::mcp::transport::stdio::StdioSettings;
use crate::mcp::transport::TransportKind;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Which transport to serve and where.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Push-session tunables for the SSE and streamable transports.
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// stdio transport tunables.
    #[serde(default)]
    pub stdio: StdioConfig,

    /// CORS and authentication.
    #[serde(default)]
    pub security: SecurityConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport.kind.is_http_family() && self.transport.port == 0 {
            return Err(invalid("transport.port must be non-zero"));
        }
        if self.transport.host.trim().is_empty() {
            return Err(invalid("transport.host must not be empty"));
        }

        for (name, value) in [
            ("sessions.queue_capacity", self.sessions.queue_capacity as u64),
            ("sessions.keepalive_secs", self.sessions.keepalive_secs),
            ("sessions.idle_timeout_secs", self.sessions.idle_timeout_secs),
            ("sessions.reap_interval_secs", self.sessions.reap_interval_secs),
            ("stdio.inbound_queue", self.stdio.inbound_queue as u64),
            ("stdio.eof_retry_ms", self.stdio.eof_retry_ms),
        ] {
            if value == 0 {
                return Err(invalid(&format!("{name} must be greater than zero")));
            }
        }

        if self.security.auth.enabled
            && self.security.auth.token.as_deref().map_or(true, str::is_empty)
        {
            return Err(invalid(
                "security.auth.enabled requires security.auth.token (or MCP_AUTH_TOKEN)",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(invalid(&format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError {
        message: message.to_string(),
    }
}

/// Transport selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// `stdio`, `http`, `sse` or `streamable` (alias `streamable-http`).
    #[serde(rename = "type", default)]
    pub kind: TransportKind,

    /// Listen address for the HTTP-family transports.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port for the HTTP-family transports.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl TransportConfig {
    /// The `host:port` to bind.
    #[must_use]
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    3000
}

/// Push-session configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionsConfig {
    /// Outbound queue capacity per session.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Seconds between keepalive comments.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// Streamable sessions idle this long are reaped.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Seconds between reaper runs.
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
}

impl SessionsConfig {
    /// Converts to the runtime settings.
    #[must_use]
    pub const fn settings(&self) -> SessionSettings {
        SessionSettings {
            queue_capacity: self.queue_capacity,
            keepalive: Duration::from_secs(self.keepalive_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            reap_interval: Duration::from_secs(self.reap_interval_secs),
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            keepalive_secs: default_keepalive_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            reap_interval_secs: default_reap_interval_secs(),
        }
    }
}

const fn default_queue_capacity() -> usize {
    100
}

const fn default_keepalive_secs() -> u64 {
    30
}

const fn default_idle_timeout_secs() -> u64 {
    600
}

const fn default_reap_interval_secs() -> u64 {
    300
}

/// stdio configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StdioConfig {
    /// Frames buffered between the reader and the processing loop.
    #[serde(default = "default_inbound_queue")]
    pub inbound_queue: usize,

    /// Milliseconds to wait after end of input before reading again.
    #[serde(default = "default_eof_retry_ms")]
    pub eof_retry_ms: u64,
}

impl StdioConfig {
    /// Converts to the runtime settings.
    #[must_use]
    pub const fn settings(&self) -> StdioSettings {
        StdioSettings {
            inbound_queue: self.inbound_queue,
            eof_retry: Duration::from_millis(self.eof_retry_ms),
        }
    }
}

impl Default for StdioConfig {
    fn default() -> Self {
        Self {
            inbound_queue: default_inbound_queue(),
            eof_retry_ms: default_eof_retry_ms(),
        }
    }
}

const fn default_inbound_queue() -> usize {
    10
}

const fn default_eof_retry_ms() -> u64 {
    100
}

/// Security configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
    /// Cross-origin policy for the HTTP-family transports.
    #[serde(default)]
    pub cors: CorsConfig,

    /// Bearer-token authentication.
    #[serde(default)]
    pub auth: AuthConfig,
}

/// CORS configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorsConfig {
    /// When disabled, every origin is allowed.
    #[serde(default)]
    pub enabled: bool,

    /// Allowed origins: exact, `*`, or `*.suffix`.
    #[serde(default)]
    pub origins: Vec<String>,

    /// Methods advertised on preflight. Default: `POST, OPTIONS`.
    #[serde(default)]
    pub methods: Vec<String>,

    /// Headers advertised on preflight. Default: `Content-Type, Authorization`.
    #[serde(default)]
    pub headers: Vec<String>,
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Require a bearer token on HTTP-family requests.
    #[serde(default)]
    pub enabled: bool,

    /// The expected token.
    #[serde(default)]
    pub token: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    /// Default: "warn"
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.transport.kind, TransportKind::Stdio);
        assert_eq!(config.transport.port, 3000);
        assert_eq!(config.sessions.queue_capacity, 100);
        assert_eq!(config.stdio.inbound_queue, 10);
        assert_eq!(config.logging.level, "warn");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "$schema": "./config.schema.json",
            "_comment": "local dev",
            "transport": { "type": "streamable-http", "host": "0.0.0.0", "port": 8080 },
            "sessions": { "queue_capacity": 16, "keepalive_secs": 15, "idle_timeout_secs": 60, "reap_interval_secs": 10 },
            "stdio": { "inbound_queue": 4, "eof_retry_ms": 50 },
            "security": {
                "cors": { "enabled": true, "origins": ["*.example.com"] },
                "auth": { "enabled": true, "token": "abc" }
            },
            "logging": { "level": "debug" }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.transport.kind, TransportKind::Streamable);
        assert_eq!(config.transport.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.sessions.settings().idle_timeout, Duration::from_secs(60));
        assert_eq!(config.stdio.settings().eof_retry, Duration::from_millis(50));
        assert!(config.security.cors.enabled);
        assert_eq!(config.security.auth.token.as_deref(), Some("abc"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn reject_unknown_fields() {
        let json = r#"{ "transport": { "type": "http", "listen": "x" } }"#;
        assert!(serde_json::from_str::<Config>(json).is_err());
    }

    #[test]
    fn reject_unknown_transport() {
        let json = r#"{ "transport": { "type": "websocket" } }"#;
        assert!(serde_json::from_str::<Config>(json).is_err());
    }

    #[test]
    fn validate_zero_values() {
        let mut config = Config::default();
        config.sessions.queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transport.kind = TransportKind::Http;
        config.transport.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_auth_requires_token() {
        let mut config = Config::default();
        config.security.auth.enabled = true;
        assert!(config.validate().is_err());

        config.security.auth.token = Some("t".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("loud"));
    }

    #[test]
    fn ipv6_bind_address() {
        let transport = TransportConfig {
            kind: TransportKind::Http,
            host: "::1".into(),
            port: 9000,
        };
        assert_eq!(transport.bind_address(), "[::1]:9000");
    }
}
