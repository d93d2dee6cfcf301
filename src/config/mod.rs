//! Configuration file loading and parsing.
//!
//! This module handles loading the configuration file from disk and parsing
//! it into validated, type-safe structures.
//!
//! # Configuration File Locations
//!
//! 1. Path given on the command line (must exist)
//! 2. Default location, used only if present:
//!    - **Linux/macOS:** `~/.mcp-context-server/config.json`
//!    - **Windows:** `%USERPROFILE%\.mcp-context-server\config.json`
//!
//! Without either, built-in defaults apply: stdio transport, port 3000 for
//! the HTTP-family transports, CORS and auth disabled.
//!
//! # Environment
//!
//! `MCP_AUTH_TOKEN`, when set and non-empty, enables bearer-token auth with
//! that token, overriding the file.

mod settings;

pub use settings::{
    AuthConfig, Config, CorsConfig, LoggingConfig, SecurityConfig, SessionsConfig, StdioConfig,
    TransportConfig,
};

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Environment variable holding the bearer token.
pub const AUTH_TOKEN_ENV: &str = "MCP_AUTH_TOKEN";

/// Returns the default configuration directory.
///
/// - **Linux/macOS:** `~/.mcp-context-server/`
/// - **Windows:** `%USERPROFILE%\.mcp-context-server\`
#[must_use]
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|p| p.join(".mcp-context-server"))
}

/// Returns the platform-specific default configuration file path.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join("config.json"))
}

/// Loads and parses the configuration file.
///
/// If `path` is `None`, uses the platform-specific default location, falling
/// back to built-in defaults when no file exists there. The result is not
/// validated; call [`Config::validate`] once command-line overrides are applied.
///
/// # Errors
///
/// Returns an error if:
/// - An explicit `path` does not exist
/// - The file cannot be read
/// - The JSON is malformed
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ConfigError::NotFound {
                    path: p.to_path_buf(),
                });
            }
            read_config(p)?
        }
        None => match default_config_path().filter(|p| p.exists()) {
            Some(p) => read_config(&p)?,
            None => Config::default(),
        },
    };

    apply_auth_token(&mut config, std::env::var(AUTH_TOKEN_ENV).ok());

    Ok(config)
}

fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })
}

fn apply_auth_token(config: &mut Config, token: Option<String>) {
    if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
        config.security.auth.enabled = true;
        config.security.auth.token = Some(token);
    }
}
