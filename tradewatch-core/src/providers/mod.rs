//! LLM provider implementations.
//!
//! The engine talks to the model through the `LlmProvider` trait; the only
//! production implementation is the Anthropic Messages API. Provider errors
//! are not absorbed here: a failed model turn is a failed session, and the
//! engine decides how to record it.

pub mod anthropic;

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, Content, Message, Role, TokenUsage};
use async_trait::async_trait;
use std::sync::Arc;

pub use anthropic::AnthropicProvider;

/// Abstraction over an LLM backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform one full completion turn.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// The model identifier this provider speaks for.
    fn model_name(&self) -> &str;
}

/// Create an LLM provider from configuration.
///
/// Only `"anthropic"` is implemented; anything else is rejected up front
/// rather than guessed at.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(config)?)),
        other => Err(LlmError::UnsupportedProvider {
            provider: other.to_string(),
        }),
    }
}

/// Scripted LLM provider for tests.
///
/// Responses are served in queue order. When the queue runs dry the behavior
/// depends on the exhausted-queue mode: by default the mock returns a plain
/// "done" text turn; with [`MockLlmProvider::repeat_tool_calls`] it emits an
/// endless stream of search calls, which is how loop-ceiling behavior gets
/// exercised without scripting forty rounds by hand.
pub struct MockLlmProvider {
    responses: std::sync::Mutex<std::collections::VecDeque<CompletionResponse>>,
    repeat_tool_calls: bool,
    call_count: std::sync::atomic::AtomicUsize,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            responses: std::sync::Mutex::new(std::collections::VecDeque::new()),
            repeat_tool_calls: false,
            call_count: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// When the queue is empty, keep answering with a fresh `search` tool
    /// call instead of terminating.
    pub fn repeat_tool_calls() -> Self {
        Self {
            repeat_tool_calls: true,
            ..Self::new()
        }
    }

    pub fn queue_response(&self, response: CompletionResponse) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Queue a plain text turn.
    pub fn queue_text(&self, text: impl Into<String>) {
        self.queue_response(Self::make_response(Content::text(text)));
    }

    /// Queue a single-tool-call turn.
    pub fn queue_tool_call(&self, id: &str, name: &str, arguments: serde_json::Value) {
        self.queue_response(Self::make_response(Content::tool_call(id, name, arguments)));
    }

    /// Queue a turn that pairs narration text with a tool call.
    pub fn queue_text_and_tool_call(
        &self,
        text: &str,
        id: &str,
        name: &str,
        arguments: serde_json::Value,
    ) {
        self.queue_response(Self::make_response(Content::MultiPart {
            parts: vec![Content::text(text), Content::tool_call(id, name, arguments)],
        }));
    }

    /// Number of completion calls served so far.
    pub fn call_count(&self) -> usize {
        self.call_count.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn make_response(content: Content) -> CompletionResponse {
        CompletionResponse {
            message: Message::new(Role::Assistant, content),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: None,
        }
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let n = self
            .call_count
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Some(response) = self.responses.lock().unwrap().pop_front() {
            return Ok(response);
        }
        if self.repeat_tool_calls {
            return Ok(Self::make_response(Content::tool_call(
                format!("call-{n}"),
                crate::protocol::SEARCH_TOOL_NAME,
                serde_json::json!({"query": format!("query {n}"), "phase": "broad_sweep"}),
            )));
        }
        Ok(Self::make_response(Content::text("done")))
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(provider: &str, api_key_env: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            api_key_env: api_key_env.to_string(),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn test_create_provider_anthropic() {
        unsafe {
            std::env::set_var("TRADEWATCH_PROVIDER_TEST_KEY", "test-key-456");
        }
        let config = test_config("anthropic", "TRADEWATCH_PROVIDER_TEST_KEY");
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "claude-sonnet-4-20250514");
        unsafe {
            std::env::remove_var("TRADEWATCH_PROVIDER_TEST_KEY");
        }
    }

    #[test]
    fn test_create_provider_unknown_rejected() {
        let config = test_config("gemini", "TRADEWATCH_PROVIDER_TEST_KEY_2");
        match create_provider(&config) {
            Err(LlmError::UnsupportedProvider { provider }) => {
                assert_eq!(provider, "gemini");
            }
            other => panic!("Expected UnsupportedProvider, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_mock_serves_queue_then_text() {
        let mock = MockLlmProvider::new();
        mock.queue_tool_call("c1", "search", serde_json::json!({"query": "x", "phase": "broad_sweep"}));

        let first = mock.complete(CompletionRequest::default()).await.unwrap();
        assert!(first.message.content.has_tool_call());

        let second = mock.complete(CompletionRequest::default()).await.unwrap();
        assert_eq!(second.message.content.as_text(), Some("done"));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_repeat_tool_calls_never_terminates() {
        let mock = MockLlmProvider::repeat_tool_calls();
        for _ in 0..5 {
            let response = mock.complete(CompletionRequest::default()).await.unwrap();
            assert!(response.message.content.has_tool_call());
        }
    }
}
