//! Error types for the Tradewatch core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the LLM provider, search provider, report validation, storage,
//! configuration, and research-session domains.

/// Top-level error type for the Tradewatch core library.
#[derive(Debug, thiserror::Error)]
pub enum TradewatchError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Research error: {0}")]
    Research(#[from] ResearchError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from LLM provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Model turn timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Provider not supported: {provider}")]
    UnsupportedProvider { provider: String },
}

/// Errors from the search provider.
///
/// Note that [`crate::search::SearchProvider::search`] never surfaces these
/// to the caller; a failed query degrades to an empty result set with a
/// soft-error note. The type exists for adapter internals and logging.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Search request failed: {message}")]
    Request { message: String },

    #[error("Search response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Search call timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

/// Errors from terminal-report extraction and validation.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("no JSON object found in model output")]
    NoJsonObject,

    #[error("report JSON is unbalanced or truncated")]
    UnbalancedJson,

    #[error("report JSON failed to parse: {message}")]
    Parse { message: String },

    #[error("finding {index} is invalid: {reason}")]
    InvalidFinding { index: usize, reason: String },

    #[error("report is missing required field: {field}")]
    MissingField { field: String },
}

/// Errors from the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: uuid::Uuid },

    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database {
            message: e.to_string(),
        }
    }
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from the research-session lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("tool-loop budget exhausted after {max_rounds} rounds")]
    BudgetExhausted { max_rounds: usize },

    #[error("research cancelled by request")]
    Cancelled,

    #[error("report validation failed: {reason}")]
    ReportValidation { reason: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
}

/// A type alias for results using the top-level `TradewatchError`.
pub type Result<T> = std::result::Result<T, TradewatchError>;
