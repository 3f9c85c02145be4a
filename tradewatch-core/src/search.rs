//! Web search adapter.
//!
//! The adapter is deliberately soft-failing: network errors, non-2xx
//! statuses, timeouts, and malformed payloads all degrade to an empty result
//! set with an error note. The research loop keeps going either way, and the
//! note is surfaced to the model so it can account for the gap.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::error::{ConfigError, SearchError};

/// One search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Display host of the result, when the backend reports one.
    pub source: Option<String>,
}

/// The outcome of one search call.
///
/// `error` is set when the call degraded; `results` is empty in that case
/// but the shape is the same, so the caller never branches on failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchOutcome {
    pub fn degraded(note: impl Into<String>) -> Self {
        Self {
            results: Vec::new(),
            error: Some(note.into()),
        }
    }
}

/// Abstraction over the search backend.
///
/// Implementations must not return `Err`: the contract is that every call
/// yields a usable `SearchOutcome`, degraded or not.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> SearchOutcome;
}

/// Google Programmable Search JSON API backend.
pub struct GoogleSearchProvider {
    client: reqwest::Client,
    api_key: String,
    engine_id: String,
    timeout_secs: u64,
}

impl GoogleSearchProvider {
    const ENDPOINT: &'static str = "https://www.googleapis.com/customsearch/v1";

    /// Build the provider from config, reading the API key from the
    /// configured environment variable.
    pub fn from_config(config: &SearchConfig) -> Result<Self, ConfigError> {
        let api_key =
            std::env::var(&config.api_key_env).map_err(|_| ConfigError::EnvVarMissing {
                var: config.api_key_env.clone(),
            })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ConfigError::Invalid {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            api_key,
            engine_id: config.engine_id.clone(),
            timeout_secs: config.request_timeout_secs,
        })
    }

    async fn execute(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, SearchError> {
        let url = format!(
            "{}?key={}&cx={}&q={}&num={}",
            Self::ENDPOINT,
            self.api_key,
            self.engine_id,
            urlencoding::encode(query),
            max_results.min(10)
        );

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                SearchError::Timeout {
                    timeout_secs: self.timeout_secs,
                }
            } else {
                SearchError::Request {
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Request {
                message: format!("search backend returned HTTP {}", status.as_u16()),
            });
        }

        let body: serde_json::Value =
            response.json().await.map_err(|e| SearchError::ResponseParse {
                message: e.to_string(),
            })?;

        let mut results = Vec::new();
        if let Some(items) = body.get("items").and_then(|v| v.as_array()) {
            for item in items {
                let title = item
                    .get("title")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let link = item
                    .get("link")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                if link.is_empty() {
                    continue;
                }
                let snippet = item
                    .get("snippet")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let source = item
                    .get("displayLink")
                    .and_then(|v| v.as_str())
                    .map(String::from);
                results.push(SearchResult {
                    title,
                    url: link,
                    snippet,
                    source,
                });
            }
        }
        Ok(results)
    }
}

#[async_trait]
impl SearchProvider for GoogleSearchProvider {
    async fn search(&self, query: &str, max_results: usize) -> SearchOutcome {
        match self.execute(query, max_results).await {
            Ok(results) => {
                debug!(query, count = results.len(), "search completed");
                SearchOutcome {
                    results,
                    error: None,
                }
            }
            Err(e) => {
                warn!(query, error = %e, "search degraded to empty result set");
                SearchOutcome::degraded(e.to_string())
            }
        }
    }
}

/// Scripted search provider for tests.
///
/// Outcomes are served in the order they were queued; once the queue is
/// empty, every call returns an empty (non-degraded) outcome.
pub struct MockSearchProvider {
    outcomes: std::sync::Mutex<std::collections::VecDeque<SearchOutcome>>,
    calls: std::sync::Mutex<Vec<String>>,
}

impl MockSearchProvider {
    pub fn new() -> Self {
        Self {
            outcomes: std::sync::Mutex::new(std::collections::VecDeque::new()),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn queue_outcome(&self, outcome: SearchOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    /// Queue a successful outcome with the given (title, url, snippet) hits.
    pub fn queue_results(&self, hits: &[(&str, &str, &str)]) {
        let results = hits
            .iter()
            .map(|(title, url, snippet)| SearchResult {
                title: title.to_string(),
                url: url.to_string(),
                snippet: snippet.to_string(),
                source: None,
            })
            .collect();
        self.queue_outcome(SearchOutcome {
            results,
            error: None,
        });
    }

    /// Queries received so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockSearchProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(&self, query: &str, _max_results: usize) -> SearchOutcome {
        self.calls.lock().unwrap().push(query.to_string());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default()
    }
}
