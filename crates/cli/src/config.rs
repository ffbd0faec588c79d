//! Configuration loading from mcpx.toml.

use std::path::Path;

use mcp::ServerConfig;
use runtime::{RemoteToolConfig, SessionConfig};
use serde::Deserialize;

/// Environment variable consulted when `model.api_key` is unset.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Top-level configuration.
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Model provider configuration.
    #[serde(default)]
    pub model: ModelConfig,

    /// Chat loop tunables.
    #[serde(default)]
    pub session: SessionConfig,

    /// Tools served over HTTP.
    #[serde(default)]
    pub remote_tools: Vec<RemoteToolConfig>,

    /// MCP server processes to spawn.
    #[serde(default)]
    pub mcp_servers: Vec<ServerConfig>,

    /// `tracing` filter directives, e.g. `"info,mcp=debug"`.
    pub log_filter: Option<String>,
}

/// Model provider configuration.
#[derive(Debug, Deserialize)]
pub struct ModelConfig {
    /// Provider name (currently only "gemini" supported).
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model to use.
    #[serde(default = "default_model")]
    pub model: String,

    /// Gemini API key. Falls back to `GEMINI_API_KEY`.
    pub api_key: Option<String>,

    /// Override the API base URL.
    pub base_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}

fn default_model() -> String {
    runtime::model::DEFAULT_GEMINI_MODEL.to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.model.provider != "gemini" {
            return Err(ConfigError::UnsupportedProvider(self.model.provider.clone()));
        }
        self.session.validate()?;
        Ok(())
    }

    /// Resolve the API key from config or the environment.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        self.model
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid [session]: {0}")]
    Session(#[from] runtime::Error),

    #[error("unsupported model provider '{0}' (expected \"gemini\")")]
    UnsupportedProvider(String),

    #[error("API key not configured: set model.api_key or {API_KEY_ENV}")]
    MissingApiKey,
}
