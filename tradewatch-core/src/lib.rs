//! Tradewatch core: a bounded LLM-driven research engine that hunts for
//! leaked trade data about a target company on public platforms.
//!
//! The flow is a single tool-using conversation: the engine hands the model
//! an investigation protocol and one `search` tool, executes searches
//! sequentially while keeping an append-only query ledger, then validates
//! the model's terminal JSON report before persisting findings to SQLite.
//!
//! Entry point is [`engine::ResearchEngine`]; everything it depends on
//! (LLM provider, search provider, store) is injected through traits, so
//! the whole loop runs against mocks in tests.

pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod models;
pub mod protocol;
pub mod providers;
pub mod report;
pub mod search;
pub mod store;
pub mod types;

pub use config::{AppConfig, LlmConfig, ResearchConfig, SearchConfig, StorageConfig, load_config};
pub use engine::{ResearchEngine, ResearchOutcome};
pub use error::{Result, TradewatchError};
pub use ledger::QueryLedger;
pub use models::{
    LeakCategory, LeakStatus, PlatformCategory, ResearchQuery, ResearchSession, RiskLevel,
    SessionStatus, TradeDataLeak,
};
pub use protocol::{ResearchPhase, SEARCH_TOOL_NAME};
pub use providers::{AnthropicProvider, LlmProvider, MockLlmProvider, create_provider};
pub use report::{ResearchSummary, ValidatedReport};
pub use search::{GoogleSearchProvider, MockSearchProvider, SearchOutcome, SearchProvider, SearchResult};
pub use store::{MemoryStore, ResearchStore, SqliteStore};
