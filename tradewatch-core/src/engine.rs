//! The research engine: a bounded, sequential tool-use loop.
//!
//! One investigation is one conversation. The engine sends the protocol and
//! a kickoff message, then alternates model turns with tool execution until
//! the model answers with plain text, the round ceiling trips, the provider
//! fails, or cancellation is observed at the top of a round. Every exit path
//! lands the session in exactly one terminal state, persisted.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{ResearchError, TradewatchError};
use crate::ledger::QueryLedger;
use crate::models::{LeakStatus, ResearchSession, TradeDataLeak};
use crate::protocol::{
    self, ResearchPhase, SEARCH_TOOL_NAME, build_kickoff, build_protocol, search_tool_definition,
};
use crate::providers::LlmProvider;
use crate::report::{self, ResearchSummary};
use crate::search::SearchProvider;
use crate::store::ResearchStore;
use crate::types::{CompletionRequest, Content, Message, Role, TokenUsage};

/// The result of one investigation run.
///
/// A failed or cancelled investigation is still an `Ok` outcome; the session
/// status says what happened. `Err` is reserved for infrastructure faults
/// the engine could not record (for example the initial session insert).
#[derive(Debug)]
pub struct ResearchOutcome {
    pub session: ResearchSession,
    pub leaks: Vec<TradeDataLeak>,
    pub summary: ResearchSummary,
}

/// Orchestrates research sessions. All collaborators are injected.
pub struct ResearchEngine {
    provider: Arc<dyn LlmProvider>,
    search: Arc<dyn SearchProvider>,
    store: Arc<dyn ResearchStore>,
    config: AppConfig,
}

impl ResearchEngine {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        search: Arc<dyn SearchProvider>,
        store: Arc<dyn ResearchStore>,
        config: AppConfig,
    ) -> Self {
        Self {
            provider,
            search,
            store,
            config,
        }
    }

    /// Run an investigation to a terminal state.
    pub async fn run(
        &self,
        requester_id: &str,
        target_company: &str,
    ) -> Result<ResearchOutcome, TradewatchError> {
        self.run_with_cancellation(requester_id, target_company, CancellationToken::new())
            .await
    }

    /// Run an investigation, checking `cancel` at the top of every round.
    ///
    /// Cancellation is cooperative: a round already in flight finishes, and
    /// its ledger rows are kept.
    pub async fn run_with_cancellation(
        &self,
        requester_id: &str,
        target_company: &str,
        cancel: CancellationToken,
    ) -> Result<ResearchOutcome, TradewatchError> {
        let mut session = ResearchSession::new(requester_id, target_company);
        session.metadata.insert(
            "model".to_string(),
            serde_json::json!(self.provider.model_name()),
        );
        session.metadata.insert(
            "protocol_version".to_string(),
            serde_json::json!(protocol::PROTOCOL_VERSION),
        );
        self.store.insert_session(&session)?;

        info!(
            session_id = %session.id,
            target = target_company,
            "starting research session"
        );

        session.begin().map_err(TradewatchError::Research)?;
        self.checkpoint(&session);

        let mut ledger = QueryLedger::new();
        let mut usage = TokenUsage::default();
        let mut rounds_used = 0usize;

        let mut messages = vec![
            Message::system(build_protocol(target_company)),
            Message::user(build_kickoff(target_company)),
        ];
        let tools = vec![search_tool_definition()];

        let final_text = loop {
            if rounds_used >= self.config.research.max_tool_rounds {
                let reason = ResearchError::BudgetExhausted {
                    max_rounds: self.config.research.max_tool_rounds,
                }
                .to_string();
                warn!(session_id = %session.id, "{}", reason);
                return self.finalize_failed(session, &ledger, &usage, rounds_used, reason, false);
            }
            if cancel.is_cancelled() {
                info!(session_id = %session.id, "cancellation observed at round boundary");
                let reason = ResearchError::Cancelled.to_string();
                return self.finalize_failed(session, &ledger, &usage, rounds_used, reason, true);
            }
            rounds_used += 1;

            let request = CompletionRequest {
                messages: messages.clone(),
                tools: Some(tools.clone()),
                temperature: self.config.llm.temperature,
                max_tokens: Some(self.config.llm.max_tokens),
                model: None,
            };

            let response = match self.provider.complete(request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "model turn failed");
                    return self.finalize_failed(
                        session,
                        &ledger,
                        &usage,
                        rounds_used,
                        e.to_string(),
                        false,
                    );
                }
            };
            usage.accumulate(&response.usage);

            let tool_calls = Self::collect_tool_calls(&response.message.content);
            messages.push(response.message.clone());

            if tool_calls.is_empty() {
                // Plain-text turn ends the loop; this is the report.
                break Self::collect_text(&response.message.content);
            }

            debug!(
                session_id = %session.id,
                round = rounds_used,
                calls = tool_calls.len(),
                "executing tool calls"
            );
            let mut result_parts = Vec::with_capacity(tool_calls.len());
            for (call_id, name, arguments) in tool_calls {
                let result = self
                    .dispatch_tool(&session, &mut ledger, &name, &arguments)
                    .await;
                result_parts.push(Content::tool_result(call_id, result.output, result.is_error));
            }
            // All results of a round go back as one reply turn.
            let reply = match result_parts.len() {
                1 => result_parts.remove(0),
                _ => Content::MultiPart {
                    parts: result_parts,
                },
            };
            messages.push(Message::new(Role::Tool, reply));

            session.total_queries = ledger.total_queries();
            session.total_results_examined = ledger.total_results_examined();
            self.checkpoint(&session);
        };

        self.finalize_report(session, &ledger, &usage, rounds_used, &final_text)
    }

    /// Run one tool call. Dispatch is a closed match: the only declared tool
    /// is `search`, and an undeclared name comes back to the model as an
    /// error result rather than failing the session.
    async fn dispatch_tool(
        &self,
        session: &ResearchSession,
        ledger: &mut QueryLedger,
        name: &str,
        arguments: &serde_json::Value,
    ) -> ToolOutput {
        match name {
            SEARCH_TOOL_NAME => self.execute_search(session, ledger, arguments).await,
            other => {
                warn!(session_id = %session.id, tool = other, "model called undeclared tool");
                ToolOutput {
                    output: format!("unknown tool '{}'", other),
                    is_error: true,
                }
            }
        }
    }

    async fn execute_search(
        &self,
        session: &ResearchSession,
        ledger: &mut QueryLedger,
        arguments: &serde_json::Value,
    ) -> ToolOutput {
        let query = match arguments.get("query").and_then(|v| v.as_str()) {
            Some(q) if !q.is_empty() => q,
            _ => {
                return ToolOutput {
                    output: "search call missing 'query' argument".to_string(),
                    is_error: true,
                };
            }
        };
        let phase = arguments
            .get("phase")
            .and_then(|v| v.as_str())
            .and_then(ResearchPhase::parse)
            .unwrap_or_else(|| {
                warn!(session_id = %session.id, "search call with missing or unknown phase");
                ResearchPhase::BroadSweep
            });

        let outcome = self
            .search
            .search(query, self.config.search.page_size)
            .await;

        let entry = ledger.record(session.id, query, phase, outcome.results.len());
        // The in-memory ledger is authoritative; a lost row is an audit gap,
        // not a reason to abort the investigation.
        if let Err(e) = self.store.insert_query(entry) {
            warn!(session_id = %session.id, error = %e, "failed to persist ledger row");
        }

        debug!(
            session_id = %session.id,
            query,
            phase = %phase,
            results = outcome.results.len(),
            degraded = outcome.error.is_some(),
            "search executed"
        );

        let output = serde_json::to_string(&outcome)
            .unwrap_or_else(|e| format!("{{\"results\":[],\"error\":\"{}\"}}", e));
        ToolOutput {
            output,
            is_error: false,
        }
    }

    fn finalize_report(
        &self,
        mut session: ResearchSession,
        ledger: &QueryLedger,
        usage: &TokenUsage,
        rounds_used: usize,
        final_text: &str,
    ) -> Result<ResearchOutcome, TradewatchError> {
        let report =
            match report::parse_report(final_text, session.id, &session.requester_id, ledger) {
                Ok(report) => report,
                Err(e) => {
                    let reason = ResearchError::ReportValidation {
                        reason: e.to_string(),
                    }
                    .to_string();
                    warn!(session_id = %session.id, "{}", reason);
                    // Keep the rejected text around so the failure can be
                    // diagnosed from the session row alone.
                    session.metadata.insert(
                        "raw_model_output".to_string(),
                        serde_json::json!(truncate_for_metadata(final_text)),
                    );
                    return self.finalize_failed(session, ledger, usage, rounds_used, reason, false);
                }
            };

        // The report survived validation, so the session completes even if
        // individual rows fail to land.
        let mut persisted = Vec::new();
        for leak in &report.leaks {
            match self.store.upsert_leak(leak) {
                Ok(true) => persisted.push(leak.clone()),
                Ok(false) => {
                    debug!(session_id = %session.id, url = %leak.source_url, "duplicate leak skipped");
                }
                Err(e) => {
                    warn!(session_id = %session.id, url = %leak.source_url, error = %e, "failed to persist leak");
                }
            }
        }

        // Counters are frozen from the rows that actually landed, so a
        // report repeating a source URL cannot skew them past the store.
        let verified = persisted
            .iter()
            .filter(|l| l.status == LeakStatus::Verified)
            .count();
        let potential = persisted
            .iter()
            .filter(|l| l.status == LeakStatus::Potential)
            .count();

        session.total_queries = ledger.total_queries();
        session.total_results_examined = ledger.total_results_examined();
        session
            .complete(verified, potential)
            .map_err(TradewatchError::Research)?;
        Self::record_run_metadata(&mut session, usage, rounds_used);
        if report.summary_synthesized {
            session
                .metadata
                .insert("summary_synthesized".to_string(), serde_json::json!(true));
        }
        self.checkpoint(&session);

        info!(
            session_id = %session.id,
            verified = session.verified_leaks_found,
            potential = session.potential_leaks_found,
            filtered = report.false_positives_filtered,
            queries = session.total_queries,
            rounds = rounds_used,
            "research session completed"
        );

        Ok(ResearchOutcome {
            session,
            leaks: persisted,
            summary: report.summary,
        })
    }

    fn finalize_failed(
        &self,
        mut session: ResearchSession,
        ledger: &QueryLedger,
        usage: &TokenUsage,
        rounds_used: usize,
        reason: String,
        cancelled: bool,
    ) -> Result<ResearchOutcome, TradewatchError> {
        session.total_queries = ledger.total_queries();
        session.total_results_examined = ledger.total_results_examined();
        if cancelled {
            session.cancel().map_err(TradewatchError::Research)?;
        } else {
            session.fail(reason).map_err(TradewatchError::Research)?;
        }
        Self::record_run_metadata(&mut session, usage, rounds_used);
        self.checkpoint(&session);

        info!(
            session_id = %session.id,
            status = %session.status,
            reason = session.error_message.as_deref().unwrap_or(""),
            "research session ended without a report"
        );

        Ok(ResearchOutcome {
            session,
            leaks: Vec::new(),
            summary: ResearchSummary::from_ledger(ledger),
        })
    }

    fn record_run_metadata(session: &mut ResearchSession, usage: &TokenUsage, rounds_used: usize) {
        session
            .metadata
            .insert("rounds_used".to_string(), serde_json::json!(rounds_used));
        session.metadata.insert(
            "input_tokens".to_string(),
            serde_json::json!(usage.input_tokens),
        );
        session.metadata.insert(
            "output_tokens".to_string(),
            serde_json::json!(usage.output_tokens),
        );
    }

    /// Best-effort persistence of current session state between rounds.
    fn checkpoint(&self, session: &ResearchSession) {
        if let Err(e) = self.store.update_session(session) {
            warn!(session_id = %session.id, error = %e, "failed to checkpoint session");
        }
    }

    fn collect_tool_calls(content: &Content) -> Vec<(String, String, serde_json::Value)> {
        match content {
            Content::ToolCall {
                id,
                name,
                arguments,
            } => vec![(id.clone(), name.clone(), arguments.clone())],
            Content::MultiPart { parts } => {
                parts.iter().flat_map(Self::collect_tool_calls).collect()
            }
            _ => Vec::new(),
        }
    }

    fn collect_text(content: &Content) -> String {
        match content {
            Content::Text { text } => text.clone(),
            Content::MultiPart { parts } => parts
                .iter()
                .map(Self::collect_text)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        }
    }
}

struct ToolOutput {
    output: String,
    is_error: bool,
}

/// Cap on rejected model output kept in session metadata.
const RAW_OUTPUT_METADATA_LIMIT: usize = 4096;

fn truncate_for_metadata(text: &str) -> &str {
    if text.len() <= RAW_OUTPUT_METADATA_LIMIT {
        return text;
    }
    let mut end = RAW_OUTPUT_METADATA_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Content;

    #[test]
    fn test_collect_tool_calls_from_multipart() {
        let content = Content::MultiPart {
            parts: vec![
                Content::text("searching"),
                Content::tool_call("c1", "search", serde_json::json!({"query": "a"})),
                Content::tool_call("c2", "search", serde_json::json!({"query": "b"})),
            ],
        };
        let calls = ResearchEngine::collect_tool_calls(&content);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "c1");
        assert_eq!(calls[1].2["query"], "b");
    }

    #[test]
    fn test_collect_text_skips_tool_parts() {
        let content = Content::MultiPart {
            parts: vec![
                Content::text("first"),
                Content::tool_result("c1", "out", false),
                Content::text("second"),
            ],
        };
        assert_eq!(ResearchEngine::collect_text(&content), "first\nsecond");
    }

    #[test]
    fn test_collect_tool_calls_plain_text() {
        assert!(ResearchEngine::collect_tool_calls(&Content::text("done")).is_empty());
    }

    #[test]
    fn test_truncate_for_metadata_respects_char_boundaries() {
        let text = "é".repeat(3000);
        let truncated = truncate_for_metadata(&text);
        assert!(truncated.len() <= RAW_OUTPUT_METADATA_LIMIT);
        assert!(text.starts_with(truncated));
        assert_eq!(truncate_for_metadata("short"), "short");
    }
}
