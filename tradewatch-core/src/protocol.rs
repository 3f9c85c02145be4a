//! The investigation protocol: phase taxonomy, the search tool contract, and
//! the policy text handed to the model as its system prompt.
//!
//! The protocol is data, not code. It steers the model through four phases
//! and states the output contract, but the engine never branches on which
//! phase the model claims to be in; the phase label exists for audit.

use serde::{Deserialize, Serialize};

use crate::types::ToolDefinition;

/// Version tag recorded in session metadata so stored sessions can be tied
/// back to the protocol text that produced them.
pub const PROTOCOL_VERSION: &str = "2026-07";

/// The single tool name the model is allowed to call.
pub const SEARCH_TOOL_NAME: &str = "search";

/// Investigation phase, as self-reported by the model on each search call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchPhase {
    /// Phase 1: wide net across exposure platform categories.
    BroadSweep,
    /// Phase 2: follow-up queries against specific hits.
    DeepDive,
    /// Phase 3: semantic variants and partner-name pivots.
    VectorSearch,
    /// Phase 4: report assembly. No searches expected here, but a stray
    /// synthesis-tagged query is recorded rather than rejected.
    Synthesis,
}

impl ResearchPhase {
    /// Wire label used in tool arguments and ledger rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchPhase::BroadSweep => "broad_sweep",
            ResearchPhase::DeepDive => "deep_dive",
            ResearchPhase::VectorSearch => "vector_search",
            ResearchPhase::Synthesis => "synthesis",
        }
    }

    /// Parse a wire label. Unknown labels map to `None`; the caller decides
    /// whether to fall back rather than fail the round.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "broad_sweep" => Some(ResearchPhase::BroadSweep),
            "deep_dive" => Some(ResearchPhase::DeepDive),
            "vector_search" => Some(ResearchPhase::VectorSearch),
            "synthesis" => Some(ResearchPhase::Synthesis),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResearchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The schema for the one tool the model may call.
///
/// The dispatch in the engine is a closed match on [`SEARCH_TOOL_NAME`];
/// declaring anything else here without extending that match would make the
/// new tool silently unreachable.
pub fn search_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: SEARCH_TOOL_NAME.to_string(),
        description: "Run a web search and return result titles, URLs, and snippets. \
                      Tag each call with the investigation phase it belongs to."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query text"
                },
                "phase": {
                    "type": "string",
                    "enum": ["broad_sweep", "deep_dive", "vector_search", "synthesis"],
                    "description": "Which investigation phase this query belongs to"
                }
            },
            "required": ["query", "phase"]
        }),
    }
}

/// Build the full investigation protocol for a target company.
///
/// This is the system prompt for the research conversation. It encodes the
/// four-phase methodology, the query budget, the anti-fabrication mandate,
/// and the JSON output contract the report parser expects.
pub fn build_protocol(target: &str) -> String {
    format!(
        r#"You are a trade-data exposure analyst. Your task is to investigate whether
confidential supply-chain information about the company "{target}" has leaked
onto publicly accessible platforms.

You have exactly one tool: `search`. Every query must be issued through it,
tagged with the phase it belongs to.

## Methodology

Phase 1 — broad_sweep (10-15 queries)
Cast a wide net across every category of exposure platform:
- Trade-data brokers and customs-records aggregators (e.g. ImportGenius,
  Panjiva, ImportYeti, Volza, Trademo)
- B2B marketplaces and supplier directories (e.g. Alibaba, ThomasNet,
  Kompass)
- Maritime and shipment trackers (e.g. MarineTraffic, bill-of-lading
  databases)
- Government customs portals and tender disclosures
Combine the company name with terms like "suppliers", "customers",
"shipments", "bill of lading", "import records", "export data".

Phase 2 — deep_dive
For each promising hit from phase 1, issue follow-up queries to pin down
what the page actually exposes: named partners, shipment counts, product
descriptions, volumes, dates.

Phase 3 — vector_search (5-10 queries)
Issue semantic variants: alternative company spellings, subsidiary names,
partner names discovered in earlier phases, product-line keywords. This
phase exists to catch exposures that literal name queries miss.

Phase 4 — synthesis
Stop searching. Assemble the final report from what you have already seen.

## Query budget

Aim for 15 to 25 queries total across all phases. Going slightly over to
resolve a genuine ambiguity is acceptable; padding the count is not.

## Evidence standard

Report ONLY what the search results actually show. Never invent URLs,
partner names, shipment figures, or snippets. If a claim is not backed by a
result you saw, it does not go in the report. Mark a finding "verified"
only when you are at least 95% certain the source page exposes real trade
data about {target}; otherwise mark it "potential". If a hit turned out to
concern a different company or contains no trade data, mark it
"false_positive".

If searches return errors or empty results, note that and move on; do not
retry the same query more than once.

## Output contract

When the investigation is complete, respond with a single JSON object and
no other text:

{{
  "verified_leaks": [
    {{
      "source_url": "https://...",
      "platform_type": "data_broker | b2b_marketplace | maritime_tracker | government_portal | other",
      "leak_type": "supplier_relationship | customer_relationship | shipment_detail | trade_volume | product_detail",
      "status": "verified | potential | false_positive",
      "risk_assessment": "high | medium | low",
      "partners_mentioned": ["..."],
      "evidence_snippet": "text actually seen in a search result",
      "analysis_notes": "why this matters, in one or two sentences"
    }}
  ],
  "research_summary": {{
    "queries_performed": ["each query you issued, in order"],
    "total_searches": 0,
    "urls_analyzed": 0
  }}
}}

An empty `verified_leaks` array is a valid and correct answer when nothing
was found. Do not manufacture findings to fill it."#
    )
}

/// The short user-turn message that kicks off the conversation.
pub fn build_kickoff(target: &str) -> String {
    format!(
        "Begin the investigation of \"{target}\". Start with the broad sweep."
    )
}
