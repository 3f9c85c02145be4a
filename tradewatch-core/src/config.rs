//! Configuration for the research engine.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides.
//!
//! Every option the engine consumes is recognized here; a missing required
//! option is a startup-time configuration error, never a per-session failure.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for a Tradewatch deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM provider settings.
    pub llm: LlmConfig,
    /// Web search provider settings.
    pub search: SearchConfig,
    /// Research-loop settings.
    pub research: ResearchConfig,
    /// Durable storage settings.
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Validate that every required option is present and sane.
    ///
    /// Called once at startup by the binary; the engine assumes a validated
    /// config thereafter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.model.is_empty() {
            return Err(ConfigError::MissingField {
                field: "llm.model".into(),
            });
        }
        if std::env::var(&self.llm.api_key_env).is_err() {
            return Err(ConfigError::EnvVarMissing {
                var: self.llm.api_key_env.clone(),
            });
        }
        if std::env::var(&self.search.api_key_env).is_err() {
            return Err(ConfigError::EnvVarMissing {
                var: self.search.api_key_env.clone(),
            });
        }
        if self.search.engine_id.is_empty() {
            return Err(ConfigError::MissingField {
                field: "search.engine_id".into(),
            });
        }
        if self.research.max_tool_rounds == 0 {
            return Err(ConfigError::Invalid {
                message: "research.max_tool_rounds must be at least 1".into(),
            });
        }
        if self.search.page_size == 0 || self.search.page_size > 10 {
            return Err(ConfigError::Invalid {
                message: format!(
                    "search.page_size ({}) must be between 1 and 10",
                    self.search.page_size
                ),
            });
        }
        Ok(())
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: currently only "anthropic" is implemented.
    pub provider: String,
    /// Model identifier (e.g., "claude-sonnet-4-20250514").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum tokens to generate per model turn.
    pub max_tokens: usize,
    /// Sampling temperature. Kept low: the protocol wants a verifier,
    /// not a storyteller.
    pub temperature: f32,
    /// Per-model-turn timeout in seconds. A timed-out turn fails the session.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: None,
            max_tokens: 8192,
            temperature: 0.2,
            request_timeout_secs: 180,
        }
    }
}

/// Web search provider configuration (Google Programmable Search).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Environment variable name containing the search API key.
    pub api_key_env: String,
    /// Programmable Search Engine identifier (the `cx` parameter).
    pub engine_id: String,
    /// Results per query. The API caps this at 10.
    pub page_size: usize,
    /// Per-search-call timeout in seconds. A timed-out call degrades to an
    /// empty result set; it never fails the session.
    pub request_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: "GOOGLE_SEARCH_API_KEY".to_string(),
            engine_id: String::new(),
            page_size: 10,
            request_timeout_secs: 15,
        }
    }
}

/// Research-loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Hard ceiling on tool-call rounds per session. The protocol text bounds
    /// the model's query budget, but only this ceiling guarantees termination.
    pub max_tool_rounds: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 40,
        }
    }
}

/// Durable storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(".tradewatch/research.db"),
        }
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `TRADEWATCH_`)
/// 3. Workspace-local config (`.tradewatch/config.toml`)
/// 4. User config (`~/.config/tradewatch/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&AppConfig>,
) -> Result<AppConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("io", "tradewatch", "tradewatch") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".tradewatch").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // TRADEWATCH_LLM__MODEL, TRADEWATCH_RESEARCH__MAX_TOOL_ROUNDS, etc.
    figment = figment.merge(Env::prefixed("TRADEWATCH_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}
