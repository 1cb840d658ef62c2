//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the server,
//! loaded via the `config` crate from environment variables. Nested keys use
//! `__` as the separator, so `LLM__API_KEY` sets `llm.api_key`.
//!
//! See [`LlmBackendConfig`](waypoint_ai::LlmBackendConfig) for the
//! text-generation backend settings.

use serde::Deserialize;
use std::time::Duration;
use waypoint_ai::LlmBackendConfig;
use waypoint_conversation::{DEFAULT_RETENTION_DAYS, RegistryConfig};
use waypoint_workflow::EngineConfig;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// SQLite database URL.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Text-generation backend.
    #[serde(default)]
    pub llm: LlmBackendConfig,

    /// Remote tool server.
    pub tools: ToolsConfig,

    /// Per-call deadlines.
    #[serde(default)]
    pub engine: EngineSettings,

    /// Session residency and retention.
    #[serde(default)]
    pub sessions: SessionSettings,
}

/// Remote tool server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    /// MCP streamable-HTTP endpoint URL.
    pub endpoint: String,
}

/// Deadlines for outbound calls.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Deadline for each text-generation call, in seconds.
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,

    /// Deadline for each tool call, in seconds.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

/// Session-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    /// Soft cap on sessions held in the registry.
    #[serde(default = "default_max_resident")]
    pub max_resident: usize,

    /// How long an idle session stays in the registry, in seconds.
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,

    /// Age in days after which snapshots are expired.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// Interval between expiry runs, in seconds.
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_database_url() -> String {
    "sqlite://waypoint.db?mode=rwc".to_string()
}

fn default_generation_timeout_secs() -> u64 {
    60
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_max_resident() -> usize {
    1024
}

fn default_idle_ttl_secs() -> u64 {
    30 * 60
}

fn default_retention_days() -> i64 {
    DEFAULT_RETENTION_DAYS
}

fn default_cleanup_interval_seconds() -> u64 {
    3600
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            generation_timeout_secs: default_generation_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_resident: default_max_resident(),
            idle_ttl_secs: default_idle_ttl_secs(),
            retention_days: default_retention_days(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_environment(config::Environment::default())
    }

    fn from_environment(environment: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(environment.separator("__").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Engine tuning derived from the deadline and session settings.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            generation_timeout: Duration::from_secs(self.engine.generation_timeout_secs),
            tool_timeout: Duration::from_secs(self.engine.tool_timeout_secs),
            sessions: RegistryConfig {
                max_resident: self.sessions.max_resident,
                idle_ttl: Duration::from_secs(self.sessions.idle_ttl_secs),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use waypoint_ai::LlmProvider;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, config::ConfigError> {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_environment(config::Environment::default().source(Some(source)))
    }

    #[test]
    fn session_settings_have_correct_defaults() {
        let settings = SessionSettings::default();
        assert_eq!(settings.retention_days, 7);
        assert_eq!(settings.cleanup_interval_seconds, 3600);
        assert_eq!(settings.max_resident, 1024);
    }

    #[test]
    fn minimal_environment_uses_defaults() {
        let config = load(&[("TOOLS__ENDPOINT", "http://localhost:8000/mcp")]).unwrap();

        assert_eq!(config.tools.endpoint, "http://localhost:8000/mcp");
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.llm.provider, LlmProvider::Gemini);
        assert_eq!(config.engine_config(), EngineConfig::default());
    }

    #[test]
    fn nested_overrides() {
        let config = load(&[
            ("TOOLS__ENDPOINT", "http://tools/mcp"),
            ("LLM__PROVIDER", "open_ai_compatible"),
            ("LLM__BASE_URL", "http://localhost:11434/v1"),
            ("LLM__MODEL", "llama3"),
            ("ENGINE__TOOL_TIMEOUT_SECS", "5"),
            ("SESSIONS__MAX_RESIDENT", "16"),
        ])
        .unwrap();

        assert_eq!(config.llm.provider, LlmProvider::OpenAiCompatible);
        assert_eq!(config.llm.model, "llama3");
        let engine = config.engine_config();
        assert_eq!(engine.tool_timeout, Duration::from_secs(5));
        assert_eq!(engine.sessions.max_resident, 16);
    }

    #[test]
    fn tool_endpoint_is_required() {
        assert!(load(&[]).is_err());
    }
}
