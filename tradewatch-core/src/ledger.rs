//! In-memory query ledger for a single research session.
//!
//! Append-only: entries are recorded in issuance order and never mutated or
//! removed. The ledger is the authoritative record of what was actually
//! searched; the model's self-reported summary is checked against it, and
//! a missing summary is rebuilt from it.

use uuid::Uuid;

use crate::models::ResearchQuery;
use crate::protocol::ResearchPhase;

/// Append-only record of executed queries, in issuance order.
#[derive(Debug, Default)]
pub struct QueryLedger {
    entries: Vec<ResearchQuery>,
}

impl QueryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an executed query. Returns a reference to the stored entry so
    /// the caller can persist the same row it just appended.
    pub fn record(
        &mut self,
        session_id: Uuid,
        query_text: impl Into<String>,
        phase: ResearchPhase,
        result_count: usize,
    ) -> &ResearchQuery {
        let entry = ResearchQuery::new(session_id, query_text, phase, result_count);
        self.entries.push(entry);
        // push succeeded, so last() is present
        self.entries.last().unwrap()
    }

    /// Number of queries executed so far.
    pub fn total_queries(&self) -> usize {
        self.entries.len()
    }

    /// Sum of result counts across all queries.
    pub fn total_results_examined(&self) -> usize {
        self.entries.iter().map(|e| e.result_count).sum()
    }

    /// Query texts in issuance order.
    pub fn queries_performed(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.query_text.clone()).collect()
    }

    pub fn entries(&self) -> &[ResearchQuery] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
