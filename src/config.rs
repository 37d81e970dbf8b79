//! Configuration management
//!
//! Loads configuration from config.toml with support for:
//! - Server binding settings
//! - JWT session secret (JWT_SECRET env var takes precedence)
//! - Feed paging defaults

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub feed: FeedConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Session token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Fallback secret; JWT_SECRET overrides this at runtime.
    pub jwt_secret: String,
}

/// Database configuration (uses DATABASE_URL env var in practice)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    // Connection string is read from the DATABASE_URL environment variable.
    // This section exists for documentation and future extensibility.
}

/// Feed paging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub page_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { page_size: 50 }
    }
}

impl Config {
    /// Load from config.toml or use defaults
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    /// Load from specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            // Use embedded default config
            toml::from_str(DEFAULT_CONFIG).context("Failed to parse default config")
        }
    }

    /// JWT secret (env var takes precedence over config value)
    pub fn jwt_secret(&self) -> String {
        match std::env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ => self.auth.jwt_secret.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        // The embedded default config is validated at compile time,
        // so this should never fail. Using a fallback for robustness.
        toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|_| Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            auth: AuthConfig {
                jwt_secret: "change-me-in-production".to_string(),
            },
            database: DatabaseConfig::default(),
            feed: FeedConfig::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_default_parses() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.feed.page_size, 50);
        assert!(!config.auth.jwt_secret.is_empty());
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let config = Config::load_from("/nonexistent/config.toml").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
    }
}
