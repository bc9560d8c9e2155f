//! Research artifact persistence
//!
//! Layout under `<data_dir>/<session_id>/`:
//!
//! ```text
//! meta.json
//! research/
//!   plan.json
//!   workers/<task_id>.json
//!   report.md
//!   rounds/round_<NN>/{meta.json,plan.json}
//! ```

use std::path::Path;

use eyre::{Context, Result};
use serde_json::json;
use signalstore::{atomic_write_json, generate_id, utc_now};
use tracing::info;

use super::types::ResearchOutcome;

/// Persist a run's artifacts and return the session id
pub fn persist_outcome(outcome: &ResearchOutcome, data_dir: impl AsRef<Path>) -> Result<String> {
    let session_id = generate_id();
    let session_dir = data_dir.as_ref().join(&session_id);
    let research_dir = session_dir.join("research");
    std::fs::create_dir_all(research_dir.join("workers")).context("Failed to create research directory")?;

    let meta = json!({
        "session_id": session_id,
        "query": outcome.query,
        "report_type": outcome.report_type,
        "created_at": utc_now().to_rfc3339(),
        "task_count": outcome.tasks.len(),
        "citation_count": outcome.citations.len(),
        "stop_reason": outcome.stop_reason,
        "synthesis_stage": outcome.synthesis_stage,
        "synthesis_error": outcome.synthesis_error,
    });
    atomic_write_json(session_dir.join("meta.json"), &meta)?;

    atomic_write_json(
        research_dir.join("plan.json"),
        &json!({
            "plan": outcome.plan,
            "planner_raw": outcome.planner_raw,
            "planner_error": outcome.planner_error,
            "gap_plan": outcome.gap_plan,
            "gap_planner_raw": outcome.gap_planner_raw,
            "verify_plan": outcome.verify_plan,
            "verify_planner_raw": outcome.verify_planner_raw,
            "curated_sources": outcome.curated_sources,
        }),
    )?;

    for result in &outcome.results {
        let path = research_dir.join("workers").join(format!("{}.json", result.task_id));
        atomic_write_json(path, result)?;
    }

    if !outcome.report_markdown.is_empty() {
        std::fs::write(research_dir.join("report.md"), &outcome.report_markdown)
            .context("Failed to write report.md")?;
    }

    for round in &outcome.rounds {
        let round_dir = research_dir.join("rounds").join(format!("round_{:02}", round.round_index));
        std::fs::create_dir_all(&round_dir)?;
        atomic_write_json(
            round_dir.join("meta.json"),
            &json!({
                "round_index": round.round_index,
                "stage": round.stage,
                "task_ids": round.task_ids,
                "new_citations": round.new_citations,
                "new_domains": round.new_domains,
            }),
        )?;
        atomic_write_json(round_dir.join("plan.json"), &round.plan)?;
    }

    info!(session_id, dir = %session_dir.display(), "persist_outcome: artifacts written");
    Ok(session_id)
}
