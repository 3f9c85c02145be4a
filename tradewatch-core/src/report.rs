//! Terminal-report extraction and validation.
//!
//! The model's final turn is prose that should contain one JSON object. The
//! parser extracts the first balanced object (string- and escape-aware, so
//! braces inside snippets do not confuse it), then validates it strictly:
//! enum fields must carry known labels, URLs and evidence must be present.
//!
//! One deliberate exception to strictness: a missing `research_summary` is
//! rebuilt from the query ledger, which is the more trustworthy record
//! anyway. Everything else fails validation rather than being repaired.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ReportError;
use crate::ledger::QueryLedger;
use crate::models::{LeakCategory, LeakStatus, PlatformCategory, RiskLevel, TradeDataLeak};

/// The model's accounting of its own investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchSummary {
    pub queries_performed: Vec<String>,
    pub total_searches: usize,
    pub urls_analyzed: usize,
}

impl ResearchSummary {
    /// Rebuild a summary from the ledger when the model omitted one.
    pub fn from_ledger(ledger: &QueryLedger) -> Self {
        Self {
            queries_performed: ledger.queries_performed(),
            total_searches: ledger.total_queries(),
            urls_analyzed: ledger.total_results_examined(),
        }
    }
}

/// A fully validated report, ready for persistence.
///
/// `leaks` contains verified and potential findings only; false positives
/// are counted but never persisted.
#[derive(Debug, Clone)]
pub struct ValidatedReport {
    pub leaks: Vec<TradeDataLeak>,
    pub false_positives_filtered: usize,
    pub summary: ResearchSummary,
    /// True when `summary` was rebuilt from the ledger.
    pub summary_synthesized: bool,
}

impl ValidatedReport {
    pub fn verified_count(&self) -> usize {
        self.leaks
            .iter()
            .filter(|l| l.status == LeakStatus::Verified)
            .count()
    }

    pub fn potential_count(&self) -> usize {
        self.leaks
            .iter()
            .filter(|l| l.status == LeakStatus::Potential)
            .count()
    }
}

/// Extract the first balanced `{...}` object from free-form text.
///
/// Tracks string and escape state so braces inside JSON strings are not
/// counted. Text before and after the object is ignored.
pub fn extract_json_object(text: &str) -> Result<&str, ReportError> {
    let start = text.find('{').ok_or(ReportError::NoJsonObject)?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    Err(ReportError::UnbalancedJson)
}

/// Parse and validate the model's terminal report text.
///
/// On success every finding has passed strict validation and false positives
/// have been filtered out. Any structural defect other than a missing
/// summary is an error; the caller fails the session with it.
pub fn parse_report(
    text: &str,
    session_id: Uuid,
    requester_id: &str,
    ledger: &QueryLedger,
) -> Result<ValidatedReport, ReportError> {
    let json_str = extract_json_object(text)?;
    let root: Value = serde_json::from_str(json_str).map_err(|e| ReportError::Parse {
        message: e.to_string(),
    })?;

    let raw_findings = root
        .get("verified_leaks")
        .ok_or_else(|| ReportError::MissingField {
            field: "verified_leaks".to_string(),
        })?
        .as_array()
        .ok_or_else(|| ReportError::Parse {
            message: "verified_leaks is not an array".to_string(),
        })?;

    let mut leaks = Vec::new();
    let mut false_positives_filtered = 0usize;

    for (index, raw) in raw_findings.iter().enumerate() {
        let finding = validate_finding(index, raw, session_id, requester_id)?;
        if finding.status == LeakStatus::FalsePositive {
            debug!(index, url = %finding.source_url, "filtering false-positive finding");
            false_positives_filtered += 1;
            continue;
        }
        leaks.push(finding);
    }

    let (summary, summary_synthesized) = match root.get("research_summary") {
        Some(raw_summary) if !raw_summary.is_null() => {
            let summary: ResearchSummary = serde_json::from_value(raw_summary.clone())
                .map_err(|e| ReportError::Parse {
                    message: format!("research_summary: {}", e),
                })?;
            (summary, false)
        }
        _ => {
            warn!("report missing research_summary, rebuilding from query ledger");
            (ResearchSummary::from_ledger(ledger), true)
        }
    };

    Ok(ValidatedReport {
        leaks,
        false_positives_filtered,
        summary,
        summary_synthesized,
    })
}

fn require_str<'a>(raw: &'a Value, field: &str, index: usize) -> Result<&'a str, ReportError> {
    raw.get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ReportError::InvalidFinding {
            index,
            reason: format!("missing or non-string field '{}'", field),
        })
}

fn validate_finding(
    index: usize,
    raw: &Value,
    session_id: Uuid,
    requester_id: &str,
) -> Result<TradeDataLeak, ReportError> {
    let source_url = require_str(raw, "source_url", index)?;
    if source_url.is_empty() {
        return Err(ReportError::InvalidFinding {
            index,
            reason: "empty source_url".to_string(),
        });
    }

    let platform_raw = require_str(raw, "platform_type", index)?;
    let platform_type =
        PlatformCategory::parse(platform_raw).ok_or_else(|| ReportError::InvalidFinding {
            index,
            reason: format!("unknown platform_type '{}'", platform_raw),
        })?;

    let leak_raw = require_str(raw, "leak_type", index)?;
    let leak_type = LeakCategory::parse(leak_raw).ok_or_else(|| ReportError::InvalidFinding {
        index,
        reason: format!("unknown leak_type '{}'", leak_raw),
    })?;

    let status_raw = require_str(raw, "status", index)?;
    let status = LeakStatus::parse(status_raw).ok_or_else(|| ReportError::InvalidFinding {
        index,
        reason: format!("unknown status '{}'", status_raw),
    })?;

    let risk_raw = require_str(raw, "risk_assessment", index)?;
    let risk_assessment = RiskLevel::parse(risk_raw).ok_or_else(|| ReportError::InvalidFinding {
        index,
        reason: format!("unknown risk_assessment '{}'", risk_raw),
    })?;

    let partners_mentioned: Vec<String> = match raw.get("partners_mentioned") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => {
            let mut partners = Vec::with_capacity(items.len());
            for item in items {
                match item.as_str() {
                    Some(name) => partners.push(name.to_string()),
                    None => {
                        return Err(ReportError::InvalidFinding {
                            index,
                            reason: "non-string entry in partners_mentioned".to_string(),
                        });
                    }
                }
            }
            partners
        }
        Some(_) => {
            return Err(ReportError::InvalidFinding {
                index,
                reason: "partners_mentioned is not an array".to_string(),
            });
        }
    };

    let evidence_snippet = raw
        .get("evidence_snippet")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    // False positives are discarded anyway, so they may omit evidence.
    if evidence_snippet.is_empty() && status != LeakStatus::FalsePositive {
        return Err(ReportError::InvalidFinding {
            index,
            reason: "empty evidence_snippet".to_string(),
        });
    }

    let analysis_notes = raw
        .get("analysis_notes")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    Ok(TradeDataLeak {
        id: Uuid::new_v4(),
        session_id,
        requester_id: requester_id.to_string(),
        source_url: source_url.to_string(),
        platform_type,
        leak_type,
        status,
        risk_assessment,
        partners_mentioned,
        evidence_snippet,
        analysis_notes,
        discovered_at: chrono::Utc::now(),
    })
}
