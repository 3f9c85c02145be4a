//! End-to-end tests for the research engine against scripted providers.

use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use tradewatch_core::error::LlmError;
use tradewatch_core::types::{CompletionRequest, CompletionResponse};
use tradewatch_core::{
    AppConfig, LeakStatus, MockLlmProvider, MockSearchProvider, ResearchEngine, ResearchStore,
    SessionStatus, SqliteStore,
};

fn test_config(max_rounds: usize) -> AppConfig {
    let mut config = AppConfig::default();
    config.research.max_tool_rounds = max_rounds;
    config
}

fn engine_with(
    provider: Arc<dyn tradewatch_core::LlmProvider>,
    search: Arc<MockSearchProvider>,
    store: Arc<SqliteStore>,
    max_rounds: usize,
) -> ResearchEngine {
    ResearchEngine::new(provider, search, store, test_config(max_rounds))
}

fn search_args(query: &str, phase: &str) -> serde_json::Value {
    serde_json::json!({"query": query, "phase": phase})
}

fn empty_report() -> String {
    serde_json::json!({
        "verified_leaks": [],
        "research_summary": {
            "queries_performed": [],
            "total_searches": 0,
            "urls_analyzed": 0
        }
    })
    .to_string()
}

fn finding(url: &str, status: &str) -> serde_json::Value {
    serde_json::json!({
        "source_url": url,
        "platform_type": "data_broker",
        "leak_type": "supplier_relationship",
        "status": status,
        "risk_assessment": "high",
        "partners_mentioned": ["Shenzhen Widget Co"],
        "evidence_snippet": "42 shipments from Shenzhen Widget Co",
        "analysis_notes": "Supplier relationship exposed with volumes."
    })
}

/// Provider that fails every turn, for error-propagation tests.
struct FailingProvider;

#[async_trait]
impl tradewatch_core::LlmProvider for FailingProvider {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        Err(LlmError::ApiRequest {
            message: "connection refused".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "failing-model"
    }
}

#[tokio::test]
async fn immediate_text_turn_completes_with_no_queries() {
    let provider = Arc::new(MockLlmProvider::new());
    provider.queue_text(format!("Nothing found.\n\n{}", empty_report()));
    let search = Arc::new(MockSearchProvider::new());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());

    let engine = engine_with(provider, search.clone(), store.clone(), 40);
    let outcome = engine.run("analyst-1", "Acme Trading Corp").await.unwrap();

    assert_eq!(outcome.session.status, SessionStatus::Completed);
    assert_eq!(outcome.session.total_queries, 0);
    assert_eq!(outcome.session.verified_leaks_found, 0);
    assert!(outcome.leaks.is_empty());
    assert!(outcome.session.completed_at.is_some());
    assert!(search.calls().is_empty());

    let stored = store.get_session(outcome.session.id).unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
}

#[tokio::test]
async fn endless_tool_calls_hit_the_round_ceiling() {
    let provider = Arc::new(MockLlmProvider::repeat_tool_calls());
    let search = Arc::new(MockSearchProvider::new());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());

    let engine = engine_with(provider, search, store.clone(), 5);
    let outcome = engine.run("analyst-1", "Acme Trading Corp").await.unwrap();

    assert_eq!(outcome.session.status, SessionStatus::Failed);
    assert_eq!(
        outcome.session.error_message.as_deref(),
        Some("tool-loop budget exhausted after 5 rounds")
    );
    assert_eq!(outcome.session.total_queries, 5);
    assert!(outcome.leaks.is_empty());

    let stored = store.get_session(outcome.session.id).unwrap();
    assert_eq!(stored.status, SessionStatus::Failed);
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn full_investigation_persists_findings_and_ledger() {
    let provider = Arc::new(MockLlmProvider::new());
    // Round 1: two broad-sweep searches in one turn.
    provider.queue_response({
        use tradewatch_core::types::{Content, Message, Role, TokenUsage};
        CompletionResponse {
            message: Message::new(
                Role::Assistant,
                Content::MultiPart {
                    parts: vec![
                        Content::text("Starting the broad sweep."),
                        Content::tool_call("c1", "search", search_args("Acme Trading Corp suppliers", "broad_sweep")),
                        Content::tool_call("c2", "search", search_args("Acme Trading Corp bill of lading", "broad_sweep")),
                    ],
                },
            ),
            usage: TokenUsage { input_tokens: 200, output_tokens: 80 },
            model: "mock-model".to_string(),
            finish_reason: None,
        }
    });
    // Round 2: deep dive.
    provider.queue_tool_call("c3", "search", search_args("panjiva.com Acme Trading Corp shipments", "deep_dive"));
    // Round 3: two vector-search variants.
    provider.queue_response({
        use tradewatch_core::types::{Content, Message, Role, TokenUsage};
        CompletionResponse {
            message: Message::new(
                Role::Assistant,
                Content::MultiPart {
                    parts: vec![
                        Content::tool_call("c4", "search", search_args("\"Acme Trading\" GmbH import records", "vector_search")),
                        Content::tool_call("c5", "search", search_args("Shenzhen Widget Co Acme customer", "vector_search")),
                    ],
                },
            ),
            usage: TokenUsage { input_tokens: 300, output_tokens: 90 },
            model: "mock-model".to_string(),
            finish_reason: None,
        }
    });
    // Final turn: the report.
    let report = serde_json::json!({
        "verified_leaks": [
            finding("https://panjiva.com/acme-trading-corp", "verified"),
            finding("https://volza.com/acme-trading", "potential"),
        ],
        "research_summary": {
            "queries_performed": [
                "Acme Trading Corp suppliers",
                "Acme Trading Corp bill of lading",
                "panjiva.com Acme Trading Corp shipments",
                "\"Acme Trading\" GmbH import records",
                "Shenzhen Widget Co Acme customer"
            ],
            "total_searches": 5,
            "urls_analyzed": 13
        }
    });
    provider.queue_text(format!("Investigation complete.\n\n{}", report));

    let search = Arc::new(MockSearchProvider::new());
    search.queue_results(&[
        ("Acme on Panjiva", "https://panjiva.com/acme-trading-corp", "42 shipments"),
        ("Acme on Volza", "https://volza.com/acme-trading", "import records"),
    ]);
    for _ in 0..4 {
        search.queue_results(&[("hit", "https://example.com", "snippet")]);
    }

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let engine = engine_with(provider, search.clone(), store.clone(), 40);
    let outcome = engine.run("analyst-1", "Acme Trading Corp").await.unwrap();

    assert_eq!(outcome.session.status, SessionStatus::Completed);
    assert_eq!(outcome.session.total_queries, 5);
    assert_eq!(outcome.session.total_results_examined, 6);
    assert_eq!(outcome.session.verified_leaks_found, 1);
    assert_eq!(outcome.session.potential_leaks_found, 1);
    assert_eq!(outcome.leaks.len(), 2);
    assert_eq!(outcome.summary.total_searches, 5);

    // Ledger rows landed in issuance order.
    let queries = store.queries_for_session(outcome.session.id).unwrap();
    assert_eq!(queries.len(), 5);
    assert_eq!(queries[0].query_text, "Acme Trading Corp suppliers");
    assert_eq!(
        search.calls(),
        vec![
            "Acme Trading Corp suppliers",
            "Acme Trading Corp bill of lading",
            "panjiva.com Acme Trading Corp shipments",
            "\"Acme Trading\" GmbH import records",
            "Shenzhen Widget Co Acme customer",
        ]
    );

    // Both findings persisted.
    let leaks = store.leaks_for_session(outcome.session.id).unwrap();
    assert_eq!(leaks.len(), 2);
    assert!(leaks.iter().any(|l| l.status == LeakStatus::Verified));
    assert!(leaks.iter().any(|l| l.status == LeakStatus::Potential));
    assert!(leaks.iter().all(|l| l.requester_id == "analyst-1"));
}

#[tokio::test]
async fn missing_summary_is_rebuilt_from_ledger() {
    let provider = Arc::new(MockLlmProvider::new());
    provider.queue_tool_call("c1", "search", search_args("Acme suppliers", "broad_sweep"));
    provider.queue_tool_call("c2", "search", search_args("Acme customs", "deep_dive"));
    let report = serde_json::json!({
        "verified_leaks": [finding("https://panjiva.com/acme", "verified")]
    });
    provider.queue_text(report.to_string());

    let search = Arc::new(MockSearchProvider::new());
    search.queue_results(&[("a", "https://a.example", "s1"), ("b", "https://b.example", "s2")]);
    search.queue_results(&[("c", "https://c.example", "s3")]);

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let engine = engine_with(provider, search, store, 40);
    let outcome = engine.run("analyst-1", "Acme").await.unwrap();

    assert_eq!(outcome.session.status, SessionStatus::Completed);
    assert_eq!(outcome.summary.total_searches, 2);
    assert_eq!(outcome.summary.urls_analyzed, 3);
    assert_eq!(
        outcome.summary.queries_performed,
        vec!["Acme suppliers", "Acme customs"]
    );
    assert_eq!(
        outcome.session.metadata.get("summary_synthesized"),
        Some(&serde_json::json!(true))
    );
}

#[tokio::test]
async fn invalid_report_fails_session_and_persists_nothing() {
    let provider = Arc::new(MockLlmProvider::new());
    // Finding with an unknown platform label.
    let mut bad = finding("https://panjiva.com/acme", "verified");
    bad["platform_type"] = serde_json::json!("dark_web");
    provider.queue_text(serde_json::json!({"verified_leaks": [bad]}).to_string());

    let search = Arc::new(MockSearchProvider::new());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let engine = engine_with(provider, search, store.clone(), 40);
    let outcome = engine.run("analyst-1", "Acme").await.unwrap();

    assert_eq!(outcome.session.status, SessionStatus::Failed);
    let message = outcome.session.error_message.unwrap();
    assert!(message.starts_with("report validation failed"), "{message}");
    assert!(
        store
            .leaks_for_session(outcome.session.id)
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn non_json_final_turn_fails_validation() {
    let provider = Arc::new(MockLlmProvider::new());
    provider.queue_text("I could not find anything noteworthy, sorry.");

    let search = Arc::new(MockSearchProvider::new());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let engine = engine_with(provider, search, store, 40);
    let outcome = engine.run("analyst-1", "Acme").await.unwrap();

    assert_eq!(outcome.session.status, SessionStatus::Failed);
    assert!(
        outcome
            .session
            .error_message
            .unwrap()
            .starts_with("report validation failed")
    );
    // The rejected text is kept for diagnosis.
    assert_eq!(
        outcome.session.metadata.get("raw_model_output"),
        Some(&serde_json::json!(
            "I could not find anything noteworthy, sorry."
        ))
    );
}

#[tokio::test]
async fn false_positives_are_filtered_before_persistence() {
    let provider = Arc::new(MockLlmProvider::new());
    let report = serde_json::json!({
        "verified_leaks": [
            finding("https://panjiva.com/acme", "verified"),
            finding("https://unrelated.example/other-acme", "false_positive"),
        ]
    });
    provider.queue_text(report.to_string());

    let search = Arc::new(MockSearchProvider::new());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let engine = engine_with(provider, search, store.clone(), 40);
    let outcome = engine.run("analyst-1", "Acme").await.unwrap();

    assert_eq!(outcome.session.status, SessionStatus::Completed);
    assert_eq!(outcome.session.verified_leaks_found, 1);
    assert_eq!(outcome.session.potential_leaks_found, 0);

    let leaks = store.leaks_for_session(outcome.session.id).unwrap();
    assert_eq!(leaks.len(), 1);
    assert_eq!(leaks[0].source_url, "https://panjiva.com/acme");
}

#[tokio::test]
async fn duplicate_url_findings_do_not_skew_counters() {
    let provider = Arc::new(MockLlmProvider::new());
    // The model repeats a source URL; the store keeps one row per URL and
    // the frozen counters must agree with what landed.
    let report = serde_json::json!({
        "verified_leaks": [
            finding("https://panjiva.com/acme", "verified"),
            finding("https://panjiva.com/acme", "verified"),
            finding("https://volza.com/acme", "potential"),
        ]
    });
    provider.queue_text(report.to_string());

    let search = Arc::new(MockSearchProvider::new());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let engine = engine_with(provider, search, store.clone(), 40);
    let outcome = engine.run("analyst-1", "Acme").await.unwrap();

    assert_eq!(outcome.session.status, SessionStatus::Completed);
    let leaks = store.leaks_for_session(outcome.session.id).unwrap();
    assert_eq!(leaks.len(), 2);
    assert_eq!(
        outcome.session.verified_leaks_found + outcome.session.potential_leaks_found,
        leaks.len()
    );
    assert_eq!(outcome.session.verified_leaks_found, 1);
    assert_eq!(outcome.session.potential_leaks_found, 1);
    assert_eq!(outcome.leaks.len(), 2);
}

#[tokio::test]
async fn provider_error_fails_the_session() {
    let search = Arc::new(MockSearchProvider::new());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let engine = engine_with(Arc::new(FailingProvider), search, store.clone(), 40);
    let outcome = engine.run("analyst-1", "Acme").await.unwrap();

    assert_eq!(outcome.session.status, SessionStatus::Failed);
    assert!(
        outcome
            .session
            .error_message
            .unwrap()
            .contains("connection refused")
    );
}

#[tokio::test]
async fn pre_cancelled_token_cancels_before_any_model_turn() {
    let provider = Arc::new(MockLlmProvider::repeat_tool_calls());
    let search = Arc::new(MockSearchProvider::new());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let engine = engine_with(provider.clone(), search, store.clone(), 40);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = engine
        .run_with_cancellation("analyst-1", "Acme", cancel)
        .await
        .unwrap();

    assert_eq!(outcome.session.status, SessionStatus::Cancelled);
    assert_eq!(
        outcome.session.error_message.as_deref(),
        Some("research cancelled by request")
    );
    assert_eq!(provider.call_count(), 0);

    let stored = store.get_session(outcome.session.id).unwrap();
    assert_eq!(stored.status, SessionStatus::Cancelled);
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn degraded_search_does_not_fail_the_session() {
    let provider = Arc::new(MockLlmProvider::new());
    provider.queue_tool_call("c1", "search", search_args("Acme suppliers", "broad_sweep"));
    provider.queue_text(empty_report());

    let search = Arc::new(MockSearchProvider::new());
    search.queue_outcome(tradewatch_core::SearchOutcome::degraded(
        "search backend returned HTTP 503",
    ));

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let engine = engine_with(provider, search, store.clone(), 40);
    let outcome = engine.run("analyst-1", "Acme").await.unwrap();

    assert_eq!(outcome.session.status, SessionStatus::Completed);
    assert_eq!(outcome.session.total_queries, 1);

    // The degraded query still landed in the ledger with zero results.
    let queries = store.queries_for_session(outcome.session.id).unwrap();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].result_count, 0);
}

#[tokio::test]
async fn session_metadata_records_model_and_usage() {
    let provider = Arc::new(MockLlmProvider::new());
    provider.queue_text(empty_report());

    let search = Arc::new(MockSearchProvider::new());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let engine = engine_with(provider, search, store, 40);
    let outcome = engine.run("analyst-1", "Acme").await.unwrap();

    let metadata = &outcome.session.metadata;
    assert_eq!(metadata["model"], serde_json::json!("mock-model"));
    assert_eq!(metadata["rounds_used"], serde_json::json!(1));
    assert!(metadata["input_tokens"].as_u64().unwrap() > 0);
    assert!(metadata.contains_key("protocol_version"));
}
