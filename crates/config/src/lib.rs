//! Configuration loading and validation for Kindred.
//!
//! Loads configuration from `kindred.toml` (path given at startup, or the
//! working directory) with environment variable overrides for secrets.
//! Validates all settings before the gateway starts.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `kindred.toml`.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Model backend configuration
    #[serde(default)]
    pub model: ModelConfig,

    /// Gateway bind configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Context assembly configuration
    #[serde(default)]
    pub context: ContextConfig,

    /// Streaming engine configuration
    #[serde(default)]
    pub stream: StreamConfig,

    /// Agentic task configuration
    #[serde(default)]
    pub agent: AgentConfig,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("model", &self.model)
            .field("gateway", &self.gateway)
            .field("context", &self.context)
            .field("stream", &self.stream)
            .field("agent", &self.agent)
            .finish()
    }
}

/// Model backend settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key; `KINDRED_API_KEY` overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model for the main conversation
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Smaller model for classification, guidance, and summaries
    #[serde(default = "default_utility_model")]
    pub utility_model: String,

    /// Temperature for the main conversation
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_chat_model() -> String {
    "gpt-4o".into()
}
fn default_utility_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.8
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            chat_model: default_chat_model(),
            utility_model: default_utility_model(),
            temperature: default_temperature(),
        }
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("chat_model", &self.chat_model)
            .field("utility_model", &self.utility_model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8720
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// How many recent messages the rolling window holds
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Token budget for the assembled context
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// How many memories to retrieve per turn
    #[serde(default = "default_memory_top_k")]
    pub memory_top_k: usize,
}

fn default_history_window() -> usize {
    20
}
fn default_token_budget() -> usize {
    8192
}
fn default_memory_top_k() -> usize {
    5
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            token_budget: default_token_budget(),
            memory_top_k: default_memory_top_k(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Flush after this many buffered tokens
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Flush after this many milliseconds since the first unflushed token
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Window in which identical outbound sends are dropped
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
}

fn default_batch_size() -> usize {
    10
}
fn default_debounce_ms() -> u64 {
    16
}
fn default_dedup_window_ms() -> u64 {
    1000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            debounce_ms: default_debounce_ms(),
            dedup_window_ms: default_dedup_window_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Iteration cap for any agentic loop
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Consecutive failed iterations before the goal is declared blocked
    #[serde(default = "default_blocked_threshold")]
    pub blocked_threshold: u32,

    /// Seconds between heartbeat events during long operations
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Default page cap for browsing sessions
    #[serde(default = "default_max_pages")]
    pub default_max_pages: u32,

    /// Default wall-clock cap for agentic sessions, in milliseconds
    #[serde(default = "default_max_duration_ms")]
    pub default_max_duration_ms: u64,

    /// Whether editing tasks run the planning pre-phase
    #[serde(default = "default_true")]
    pub edit_planning: bool,
}

fn default_max_iterations() -> u32 {
    12
}
fn default_blocked_threshold() -> u32 {
    3
}
fn default_heartbeat_interval_secs() -> u64 {
    5
}
fn default_max_pages() -> u32 {
    5
}
fn default_max_duration_ms() -> u64 {
    120_000
}
fn default_true() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            blocked_threshold: default_blocked_threshold(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            default_max_pages: default_max_pages(),
            default_max_duration_ms: default_max_duration_ms(),
            edit_planning: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from `kindred.toml` in the working directory,
    /// falling back to defaults when the file is absent.
    ///
    /// `KINDRED_API_KEY` overrides the configured API key.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new("kindred.toml"))
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
        } else {
            tracing::info!("no config file at {}, using defaults", path.display());
            Self::default()
        };

        if let Ok(key) = std::env::var("KINDRED_API_KEY") {
            config.model.api_key = Some(key);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.context.history_window == 0 {
            return Err(ConfigError::ValidationError(
                "context.history_window must be at least 1".into(),
            ));
        }
        if self.stream.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "stream.batch_size must be at least 1".into(),
            ));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }
        if self.agent.blocked_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "agent.blocked_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.model.api_key.is_some()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway.port, 8720);
        assert_eq!(config.context.history_window, 20);
        assert_eq!(config.stream.batch_size, 10);
        assert_eq!(config.agent.blocked_threshold, 3);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model.chat_model, config.model.chat_model);
        assert_eq!(parsed.stream.debounce_ms, config.stream.debounce_ms);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[gateway]\nport = 9000").unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.context.token_budget, 8192);
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/kindred.toml")).unwrap();
        assert_eq!(config.gateway.port, 8720);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            model: ModelConfig {
                temperature: 5.0,
                ..ModelConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_batch_size_rejected() {
        let config = AppConfig {
            stream: StreamConfig {
                batch_size: 0,
                ..StreamConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            model: ModelConfig {
                api_key: Some("sk-secret".into()),
                ..ModelConfig::default()
            },
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
