//! Deep-research orchestrator
//!
//! Turns a natural-language query into a grounded, cited Markdown report:
//! plan search tasks, fan them out to parallel workers, optionally fill
//! gaps and verify claims, then synthesize under strict citation-grounding
//! invariants.
//!
//! Two strategies share the planning/synthesis/rendering pipeline:
//! multi-round plan-and-refine, and a draft-centric loop that refines a
//! running draft between rounds.

mod artifacts;
mod draft;
mod memo;
mod orchestrator;
mod planning;
mod prompts;
mod render;
mod synthesis;
mod types;
mod workers;

pub use artifacts::persist_outcome;
pub use memo::{CatalogCandidate, CatalogMemo, FieldStatus, Gap, ResearchMemo, SourceEntry};
pub use orchestrator::DeepResearch;
pub use planning::{extract_single_code_fence, parse_planner_json};
pub use synthesis::{select_diverse_findings, select_top_findings};
pub use types::{
    CuratedSource, PlanSet, PlannedTask, PlanningError, ReportType, ResearchConfig, ResearchError, ResearchOutcome,
    ResearchRunError, ResearchStrategy, RoundRecord, SynthesisError, WorkerFinding, detect_report_type,
    detect_required_fields, detect_target_items, normalize_ws, sanitize_snippet,
};
