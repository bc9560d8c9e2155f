//! Research types, configuration, and error taxonomy

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::{EvidenceRecord, SourceMeta, WorkerResult, WorkerTask};

/// Shape of the final report, detected from the query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Narrative,
    Catalog,
}

impl std::fmt::Display for ReportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportType::Narrative => write!(f, "narrative"),
            ReportType::Catalog => write!(f, "catalog"),
        }
    }
}

fn catalog_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"\bidentify\s+\d+\b",
            r"\bfind\s+\d+\b",
            r"\blist\s+\d+\b",
            r"\bfor each\b.*\binclude\b",
            r"\brequired\s+(details|fields)\b",
            r"\bprovider\b.*\bwebsite\b.*\burl\b",
            r"\bpricing\b.*\bcase.?stud",
            r"\bpricing\b.*\btestimonial",
            r"\bpricing\b.*\bretainer\b",
        ]
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .dot_matches_new_line(true)
                .build()
                .expect("static pattern")
        })
        .collect()
    })
}

/// Catalog when the query asks for an enumerated, field-structured list
pub fn detect_report_type(query: &str) -> ReportType {
    let q = query.trim();
    if q.is_empty() {
        return ReportType::Narrative;
    }
    for pattern in catalog_patterns() {
        if pattern.is_match(q) {
            return ReportType::Catalog;
        }
    }
    ReportType::Narrative
}

/// Requested item count for catalog prompts ("identify 5 …"), clamped to 50
pub fn detect_target_items(query: &str) -> Option<u32> {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return None;
    }
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\b(?:identify|list|find)\s+(\d{1,3})\b").expect("static pattern"));
    let n: u32 = re.captures(&q)?.get(1)?.as_str().parse().ok()?;
    if n == 0 { None } else { Some(n.min(50)) }
}

/// User-declared field labels from a "Required details:" block
pub fn detect_required_fields(query: &str) -> Vec<String> {
    let q = query.trim();
    if q.is_empty() {
        return Vec::new();
    }

    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        RegexBuilder::new(r"required details(?:\s+for[^:]+)?:\s*(.+)$")
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .build()
            .expect("static pattern")
    });
    let Some(caps) = re.captures(q) else {
        return Vec::new();
    };
    let block = caps.get(1).map(|m| m.as_str()).unwrap_or("").trim();

    // Stop at obvious section boundaries if present.
    static BOUNDARY: OnceLock<Regex> = OnceLock::new();
    let boundary = BOUNDARY.get_or_init(|| {
        RegexBuilder::new(r"\n\s*(critical|notes?|market saturation|deliverable|output)\b")
            .case_insensitive(true)
            .build()
            .expect("static pattern")
    });
    let block = match boundary.find(block) {
        Some(m) => &block[..m.start()],
        None => block,
    };

    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for line in block.lines() {
        let line = line.trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '•' | '*'));
        if line.is_empty() {
            continue;
        }
        for part in line.split(',') {
            let part = part.trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '•' | '*'));
            if part.is_empty() {
                continue;
            }
            let key = part.to_lowercase();
            if seen.insert(key) {
                out.push(part.to_string());
            }
        }
    }
    out.truncate(30);
    out
}

/// Collapse whitespace runs to single spaces
pub fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Clean a search-result snippet for rendering.
///
/// Drops relative markdown links (keeping labels), heading markers, and
/// bullet prefixes, then collapses whitespace and caps at 360 chars.
pub fn sanitize_snippet(text: &str) -> String {
    let s = text.trim();
    if s.is_empty() {
        return String::new();
    }

    static REL_LINK: OnceLock<Regex> = OnceLock::new();
    let rel_link = REL_LINK.get_or_init(|| Regex::new(r"\[([^\]]+)\]\((/[^)]+)\)").expect("static pattern"));
    static REL_PAREN: OnceLock<Regex> = OnceLock::new();
    let rel_paren = REL_PAREN.get_or_init(|| Regex::new(r"\((/[^)]+)\)").expect("static pattern"));

    let mut s = rel_link.replace_all(s, "$1").to_string();
    s = rel_paren.replace_all(&s, "").to_string();
    s = s.replace('#', " ");
    s = s.replace(" * ", " ");

    static LINE_PREFIX: OnceLock<Regex> = OnceLock::new();
    let line_prefix =
        LINE_PREFIX.get_or_init(|| Regex::new(r"^\s*([*+-]\s+|\d+\.\s+)").expect("static pattern"));

    let mut cleaned_lines = Vec::new();
    for line in s.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let line = line_prefix.replace(line, "").to_string();
        if !line.is_empty() {
            cleaned_lines.push(line);
        }
    }
    let joined = if cleaned_lines.is_empty() { s } else { cleaned_lines.join(" ") };
    let mut out = normalize_ws(&joined);
    if out.chars().count() > 360 {
        out = out.chars().take(360).collect::<String>().trim_end().to_string();
        out.push('\u{2026}');
    }
    out
}

/// Which orchestration strategy `run` uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResearchStrategy {
    /// Plan → workers → gap → verify → synthesize
    #[default]
    MultiRound,
    /// Fixed-iteration plan/fan-out/refine loop around a running draft
    DraftCentric,
}

/// Deep-research knobs. Validated at config load, passed by value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    pub model: String,
    pub strategy: ResearchStrategy,

    // Planning / fan-out
    pub max_tasks: u32,
    pub max_workers: usize,
    pub worker_max_iterations: u32,
    pub worker_timeout_s: f64,
    pub worker_max_attempts: u32,
    pub page_size: u32,
    pub max_pages: u32,
    pub target_web_search_calls: u32,
    pub max_web_search_calls: u32,

    // Worker continuation
    pub enable_worker_continuation: bool,
    pub max_worker_continuations: u32,

    // Deep read
    pub enable_deep_read: bool,
    pub max_web_extract_calls: u32,
    pub extract_max_chars: usize,

    // Synthesis
    pub require_quote_per_claim: bool,
    pub multi_pass_synthesis: bool,
    pub require_citations: bool,
    pub min_total_citations: usize,
    pub min_total_domains: usize,
    pub strict_all: bool,
    pub best_effort: bool,
    pub report_min_unique_citations_target: usize,
    pub report_min_unique_domains_target: usize,
    pub report_findings_target: usize,
    /// "warn" or "error"
    pub coverage_mode: String,

    // Extra rounds (multi-round strategy)
    pub enable_round2: bool,
    pub round2_max_tasks: u32,
    pub verify_max_tasks: u32,

    // Curated sources
    pub curated_sources_max_total: usize,
    pub curated_sources_max_per_domain: usize,
    pub curated_sources_min_per_task: usize,

    // Draft-centric strategy
    pub max_rounds: u32,
    /// 0 falls back to `max_rounds`
    pub max_iterations: u32,
    pub max_tasks_total: u32,
    pub max_tasks_per_round: u32,
    /// New-citation floor below which a round counts as saturated.
    /// Distinct from the ingestion side's novelty-based threshold.
    pub saturation_new_citations: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            strategy: ResearchStrategy::MultiRound,
            max_tasks: 5,
            max_workers: 5,
            worker_max_iterations: 6,
            worker_timeout_s: 120.0,
            worker_max_attempts: 2,
            page_size: 8,
            max_pages: 3,
            target_web_search_calls: 2,
            max_web_search_calls: 6,
            enable_worker_continuation: false,
            max_worker_continuations: 0,
            enable_deep_read: false,
            max_web_extract_calls: 3,
            extract_max_chars: 20_000,
            require_quote_per_claim: false,
            multi_pass_synthesis: false,
            require_citations: true,
            min_total_citations: 3,
            min_total_domains: 3,
            strict_all: true,
            best_effort: false,
            report_min_unique_citations_target: 0,
            report_min_unique_domains_target: 0,
            report_findings_target: 5,
            coverage_mode: "warn".to_string(),
            enable_round2: false,
            round2_max_tasks: 3,
            verify_max_tasks: 0,
            curated_sources_max_total: 0,
            curated_sources_max_per_domain: 0,
            curated_sources_min_per_task: 0,
            max_rounds: 3,
            max_iterations: 0,
            max_tasks_total: 12,
            max_tasks_per_round: 6,
            saturation_new_citations: 2,
        }
    }
}

/// A validated planner task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTask {
    pub id: String,
    pub search_query: String,
    pub instructions: String,
}

/// A validated plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanSet {
    pub tasks: Vec<PlannedTask>,
}

/// Per-worker findings payload handed to planners and synthesizers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerFinding {
    pub task_id: String,
    pub success: bool,
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub citations: Vec<String>,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceMeta>,
    #[serde(default)]
    pub evidence: Vec<EvidenceRecord>,
    #[serde(default)]
    pub web_search_calls: u32,
    #[serde(default)]
    pub web_extract_calls: u32,
}

impl From<&WorkerResult> for WorkerFinding {
    fn from(r: &WorkerResult) -> Self {
        Self {
            task_id: r.task_id.clone(),
            success: r.success,
            output: r.output.clone(),
            error: r.error.clone(),
            citations: r.citations.clone(),
            sources: r.sources.clone(),
            evidence: r.evidence.clone(),
            web_search_calls: r.web_search_calls,
            web_extract_calls: r.web_extract_calls,
        }
    }
}

/// One curated source kept for synthesis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuratedSource {
    pub url: String,
    pub domain: String,
    pub title: String,
    pub snippet: String,
    pub score: f64,
    pub task_id: String,
    pub rank_within_task: u32,
}

/// Record of one orchestration round (draft-centric strategy)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round_index: u32,
    pub stage: String,
    pub plan: PlanSet,
    pub task_ids: Vec<String>,
    pub new_citations: usize,
    pub new_domains: usize,
}

/// Everything a run produced, kept for artifact persistence
#[derive(Debug, Clone, Serialize)]
pub struct ResearchOutcome {
    pub query: String,
    pub report_type: ReportType,
    pub plan: PlanSet,
    pub planner_raw: String,
    pub planner_error: Option<String>,
    pub tasks: Vec<WorkerTask>,
    pub results: Vec<WorkerResult>,
    pub citations: Vec<String>,
    pub report_markdown: String,
    pub report_json: Option<serde_json::Value>,
    pub rounds: Vec<RoundRecord>,
    pub gap_plan: Option<PlanSet>,
    pub gap_planner_raw: String,
    pub verify_plan: Option<PlanSet>,
    pub verify_planner_raw: String,
    pub synthesis_stage: Option<String>,
    pub synthesis_error: Option<String>,
    pub curated_sources: Option<Vec<CuratedSource>>,
    pub stop_reason: Option<String>,
}

impl ResearchOutcome {
    pub fn empty(query: &str, report_type: ReportType) -> Self {
        Self {
            query: query.to_string(),
            report_type,
            plan: PlanSet::default(),
            planner_raw: String::new(),
            planner_error: None,
            tasks: Vec::new(),
            results: Vec::new(),
            citations: Vec::new(),
            report_markdown: String::new(),
            report_json: None,
            rounds: Vec::new(),
            gap_plan: None,
            gap_planner_raw: String::new(),
            verify_plan: None,
            verify_planner_raw: String::new(),
            synthesis_stage: None,
            synthesis_error: None,
            curated_sources: None,
            stop_reason: None,
        }
    }
}

/// Planner output was empty, invalid, or failed validation
#[derive(Debug, Error)]
#[error("{message}")]
pub struct PlanningError {
    pub message: String,
    pub raw: String,
}

impl PlanningError {
    pub fn new(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            raw: raw.into(),
        }
    }
}

/// Synthesis produced invalid JSON, ungrounded citations, or failed coverage
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SynthesisError {
    pub message: String,
    pub raw: String,
    pub stage: String,
}

impl SynthesisError {
    pub fn new(message: impl Into<String>, raw: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            raw: raw.into(),
            stage: stage.into(),
        }
    }
}

/// Fatal run failure with the partial outcome attached for diagnostics
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ResearchRunError {
    pub message: String,
    pub outcome: Box<ResearchOutcome>,
}

/// Error taxonomy for a research run
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Run(#[from] Box<ResearchRunError>),

    /// Strictness gate failed (worker failures, citation/domain floors)
    #[error("{0}")]
    Gate(String),

    #[error(transparent)]
    Llm(#[from] crate::llm::LlmError),

    #[error("query is required")]
    EmptyQuery,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_report_type_catalog() {
        assert_eq!(detect_report_type("Identify 5 AI service businesses"), ReportType::Catalog);
        assert_eq!(
            detect_report_type("For each provider, include pricing.\nRequired details: name, website"),
            ReportType::Catalog
        );
        assert_eq!(detect_report_type("How does QUIC differ from TCP?"), ReportType::Narrative);
        assert_eq!(detect_report_type(""), ReportType::Narrative);
    }

    #[test]
    fn test_detect_target_items() {
        assert_eq!(detect_target_items("identify 5 providers"), Some(5));
        assert_eq!(detect_target_items("list 120 things"), Some(50));
        assert_eq!(detect_target_items("find 0 things"), None);
        assert_eq!(detect_target_items("compare protocols"), None);
    }

    #[test]
    fn test_detect_required_fields() {
        let query = "Identify 3 services.\nRequired details:\n- Name\n- Pricing, Website URL\nNotes: be brief";
        let fields = detect_required_fields(query);
        assert_eq!(fields, vec!["Name", "Pricing", "Website URL"]);
    }

    #[test]
    fn test_sanitize_snippet() {
        let raw = "## Heading\n- [Docs](/docs/start) explain * things\n1. item one";
        let cleaned = sanitize_snippet(raw);
        assert!(!cleaned.contains('#'));
        assert!(!cleaned.contains("/docs/start"));
        assert!(cleaned.contains("Docs explain"));
        assert!(cleaned.contains("item one"));
    }

    #[test]
    fn test_sanitize_snippet_caps_length() {
        let raw = "word ".repeat(200);
        let cleaned = sanitize_snippet(&raw);
        assert!(cleaned.chars().count() <= 361);
        assert!(cleaned.ends_with('\u{2026}'));
    }

    #[test]
    fn test_normalize_ws() {
        assert_eq!(normalize_ws("  a\n\tb   c "), "a b c");
    }
}
