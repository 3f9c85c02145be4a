//! Domain records: research sessions, ledger queries, and trade-data leaks.
//!
//! `ResearchSession` is a small state machine. Transitions go through the
//! methods here so that illegal moves (resurrecting a terminal session,
//! completing one that never started) surface as errors instead of silent
//! state corruption.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::ResearchError;
use crate::protocol::ResearchPhase;

/// Lifecycle state of a research session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created and persisted, loop not yet entered.
    Initiated,
    /// The tool loop is running.
    InProgress,
    /// Terminal: a validated report was produced.
    Completed,
    /// Terminal: the loop or the report failed.
    Failed,
    /// Terminal: cancellation was observed at a loop boundary.
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initiated => "initiated",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initiated" => Some(SessionStatus::Initiated),
            "in_progress" => Some(SessionStatus::InProgress),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            "cancelled" => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One research investigation against a single target company.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchSession {
    pub id: Uuid,
    /// Who asked for this investigation.
    pub requester_id: String,
    /// The company under investigation.
    pub target_company: String,
    pub status: SessionStatus,
    pub total_queries: usize,
    pub total_results_examined: usize,
    pub verified_leaks_found: usize,
    pub potential_leaks_found: usize,
    /// Human-readable reason when status is `Failed` or `Cancelled`.
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Set exactly once, on entering a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Audit breadcrumbs: model id, protocol version, rounds used, token
    /// totals. Free-form so the schema does not churn with every new fact.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ResearchSession {
    pub fn new(requester_id: impl Into<String>, target_company: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            requester_id: requester_id.into(),
            target_company: target_company.into(),
            status: SessionStatus::Initiated,
            total_queries: 0,
            total_results_examined: 0,
            verified_leaks_found: 0,
            potential_leaks_found: 0,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
            metadata: HashMap::new(),
        }
    }

    fn transition(&mut self, to: SessionStatus) -> Result<(), ResearchError> {
        let allowed = match (self.status, to) {
            (SessionStatus::Initiated, SessionStatus::InProgress) => true,
            (SessionStatus::Initiated, SessionStatus::Failed) => true,
            (SessionStatus::Initiated, SessionStatus::Cancelled) => true,
            (SessionStatus::InProgress, SessionStatus::Completed) => true,
            (SessionStatus::InProgress, SessionStatus::Failed) => true,
            (SessionStatus::InProgress, SessionStatus::Cancelled) => true,
            _ => false,
        };
        if !allowed {
            return Err(ResearchError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        if to.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Enter the tool loop.
    pub fn begin(&mut self) -> Result<(), ResearchError> {
        self.transition(SessionStatus::InProgress)
    }

    /// Terminal success. Counters are frozen with the values passed here.
    pub fn complete(
        &mut self,
        verified_leaks_found: usize,
        potential_leaks_found: usize,
    ) -> Result<(), ResearchError> {
        self.transition(SessionStatus::Completed)?;
        self.verified_leaks_found = verified_leaks_found;
        self.potential_leaks_found = potential_leaks_found;
        Ok(())
    }

    /// Terminal failure with a reason.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), ResearchError> {
        self.transition(SessionStatus::Failed)?;
        self.error_message = Some(reason.into());
        Ok(())
    }

    /// Terminal cancellation.
    pub fn cancel(&mut self) -> Result<(), ResearchError> {
        self.transition(SessionStatus::Cancelled)?;
        self.error_message = Some(ResearchError::Cancelled.to_string());
        Ok(())
    }
}

/// One ledger entry: a query the engine actually executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchQuery {
    pub id: Uuid,
    pub session_id: Uuid,
    pub query_text: String,
    pub phase: ResearchPhase,
    /// Number of results the search returned for this query.
    pub result_count: usize,
    pub created_at: DateTime<Utc>,
}

impl ResearchQuery {
    pub fn new(
        session_id: Uuid,
        query_text: impl Into<String>,
        phase: ResearchPhase,
        result_count: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            query_text: query_text.into(),
            phase,
            result_count,
            created_at: Utc::now(),
        }
    }
}

/// Category of platform a leak was found on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformCategory {
    DataBroker,
    B2bMarketplace,
    MaritimeTracker,
    GovernmentPortal,
    Other,
}

impl PlatformCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformCategory::DataBroker => "data_broker",
            PlatformCategory::B2bMarketplace => "b2b_marketplace",
            PlatformCategory::MaritimeTracker => "maritime_tracker",
            PlatformCategory::GovernmentPortal => "government_portal",
            PlatformCategory::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "data_broker" => Some(PlatformCategory::DataBroker),
            "b2b_marketplace" => Some(PlatformCategory::B2bMarketplace),
            "maritime_tracker" => Some(PlatformCategory::MaritimeTracker),
            "government_portal" => Some(PlatformCategory::GovernmentPortal),
            "other" => Some(PlatformCategory::Other),
            _ => None,
        }
    }
}

/// What kind of confidential trade data the page exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeakCategory {
    SupplierRelationship,
    CustomerRelationship,
    ShipmentDetail,
    TradeVolume,
    ProductDetail,
}

impl LeakCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeakCategory::SupplierRelationship => "supplier_relationship",
            LeakCategory::CustomerRelationship => "customer_relationship",
            LeakCategory::ShipmentDetail => "shipment_detail",
            LeakCategory::TradeVolume => "trade_volume",
            LeakCategory::ProductDetail => "product_detail",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "supplier_relationship" => Some(LeakCategory::SupplierRelationship),
            "customer_relationship" => Some(LeakCategory::CustomerRelationship),
            "shipment_detail" => Some(LeakCategory::ShipmentDetail),
            "trade_volume" => Some(LeakCategory::TradeVolume),
            "product_detail" => Some(LeakCategory::ProductDetail),
            _ => None,
        }
    }
}

/// Confidence classification of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeakStatus {
    Verified,
    Potential,
    FalsePositive,
}

impl LeakStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeakStatus::Verified => "verified",
            LeakStatus::Potential => "potential",
            LeakStatus::FalsePositive => "false_positive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "verified" => Some(LeakStatus::Verified),
            "potential" => Some(LeakStatus::Potential),
            "false_positive" => Some(LeakStatus::FalsePositive),
            _ => None,
        }
    }
}

/// Assessed severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::High => "high",
            RiskLevel::Medium => "medium",
            RiskLevel::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(RiskLevel::High),
            "medium" => Some(RiskLevel::Medium),
            "low" => Some(RiskLevel::Low),
            _ => None,
        }
    }
}

/// A validated trade-data leak finding, ready for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeDataLeak {
    pub id: Uuid,
    pub session_id: Uuid,
    pub requester_id: String,
    pub source_url: String,
    pub platform_type: PlatformCategory,
    pub leak_type: LeakCategory,
    pub status: LeakStatus,
    pub risk_assessment: RiskLevel,
    pub partners_mentioned: Vec<String>,
    pub evidence_snippet: String,
    pub analysis_notes: String,
    pub discovered_at: DateTime<Utc>,
}
