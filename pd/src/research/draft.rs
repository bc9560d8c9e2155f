//! Strategy II - draft-centric research loop
//!
//! A fixed-iteration loop that alternates planning, fan-out, and draft
//! refinement. Stop reasons: task_budget_exhausted, no_novel_queries,
//! no_tasks, saturated, max_iterations.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::agent::{WorkerResult, WorkerTask};
use crate::events::{AgentEvent, PlannedTaskSummary};
use crate::llm::CompletionRequest;

use super::orchestrator::DeepResearch;
use super::prompts;
use super::synthesis::select_top_findings;
use super::types::{
    PlanSet, ResearchError, ResearchOutcome, ReportType, RoundRecord, WorkerFinding, detect_report_type,
    normalize_ws,
};
use super::workers::{collect_citations_from_traces, collect_domains, findings_from_results};

fn norm_query(s: &str) -> String {
    normalize_ws(&s.to_lowercase())
}

impl DeepResearch {
    /// Ask the LLM to fold the round's strongest findings into the draft
    async fn refine_draft(
        &self,
        query: &str,
        report_type: ReportType,
        draft: &str,
        findings: &[WorkerFinding],
    ) -> Result<String, ResearchError> {
        let findings_json = serde_json::to_value(findings).unwrap_or(serde_json::json!([]));
        let prompt = prompts::draft_refine_prompt(query, report_type, draft, &findings_json);
        let request = CompletionRequest::simple(prompt, 0.3, 2500);
        let response = self.llm.complete(request).await?;
        Ok(response.content.unwrap_or_default().trim().to_string())
    }

    /// Strategy II entry point
    pub(crate) async fn run_draft_centric(&self, query: &str) -> Result<ResearchOutcome, ResearchError> {
        let report_type = detect_report_type(query);

        let mut max_tasks_total = self.config.max_tasks_total.max(1);
        let max_tasks_per_round = self.config.max_tasks_per_round.max(1);
        if report_type == ReportType::Catalog {
            max_tasks_total = max_tasks_total.max(15);
        }

        let mut max_iterations = self.config.max_iterations;
        if max_iterations == 0 {
            max_iterations = self.config.max_rounds.max(1);
        }
        let saturation_floor = self.config.saturation_new_citations.max(1);

        let mut planner_raw = String::new();
        let mut planner_error: Option<String> = None;

        let mut draft = String::new();
        let mut seen_queries: BTreeSet<String> = BTreeSet::new();
        let mut all_results: Vec<WorkerResult> = Vec::new();
        let mut all_tasks: Vec<WorkerTask> = Vec::new();
        let mut all_citations: BTreeSet<String> = BTreeSet::new();
        let mut all_domains: BTreeSet<String> = BTreeSet::new();
        let mut rounds: Vec<RoundRecord> = Vec::new();
        let mut combined_plan = PlanSet::default();

        let mut stop_reason = "max_iterations";

        for iteration in 0..max_iterations {
            let remaining_total = max_tasks_total.saturating_sub(all_tasks.len() as u32);
            let budget = max_tasks_per_round.min(remaining_total);
            if budget == 0 {
                stop_reason = "task_budget_exhausted";
                break;
            }

            let plan = if iteration == 0 {
                self.emitter
                    .emit(AgentEvent::progress("plan", 0, None, "Planning searches"));
                let (plan, raw, err) = self.plan(query, budget, 3.min(budget as usize), report_type).await?;
                planner_raw = raw;
                planner_error = err;
                plan
            } else {
                self.emitter
                    .emit(AgentEvent::progress("gap", 0, None, "Planning follow-up searches"));
                let (plan, _raw) = self.draft_continuation_plan(query, &draft, budget).await?;
                plan
            };

            let planned_queries: Vec<String> = plan.tasks.iter().map(|t| norm_query(&t.search_query)).collect();
            let novel: Vec<&String> = planned_queries
                .iter()
                .filter(|q| !q.is_empty() && !seen_queries.contains(*q))
                .collect();
            if novel.is_empty() && iteration > 0 {
                stop_reason = "no_novel_queries";
                break;
            }
            for q in novel {
                seen_queries.insert(q.clone());
            }

            if !plan.tasks.is_empty() {
                self.emitter.emit(AgentEvent::ResearchPlan {
                    tasks: plan
                        .tasks
                        .iter()
                        .map(|t| PlannedTaskSummary {
                            id: t.id.clone(),
                            search_query: t.search_query.clone(),
                            instructions: t.instructions.clone(),
                        })
                        .collect(),
                });
            }

            let mut round_tasks = self.to_worker_tasks(query, &plan)?;
            round_tasks.truncate(budget as usize);
            if round_tasks.is_empty() {
                stop_reason = "no_tasks";
                break;
            }
            combined_plan.tasks.extend(plan.tasks.clone());
            all_tasks.extend(round_tasks.clone());

            let results = self
                .run_round_checked(
                    "workers",
                    &format!(
                        "Running {} tasks (max concurrency: {})",
                        round_tasks.len(),
                        self.config.max_workers
                    ),
                    &round_tasks,
                )
                .await;

            let findings = findings_from_results(&results);
            all_results.extend(results);

            let iter_citations: BTreeSet<String> =
                collect_citations_from_traces(&all_results).into_iter().collect();
            let new_citations: BTreeSet<String> =
                iter_citations.difference(&all_citations).cloned().collect();
            let new_citation_list: Vec<String> = new_citations.iter().cloned().collect();
            let new_domains: BTreeSet<String> = collect_domains(&new_citation_list)
                .into_iter()
                .filter(|d| !all_domains.contains(d))
                .collect();

            rounds.push(RoundRecord {
                round_index: iteration + 1,
                stage: "iteration".to_string(),
                plan: plan.clone(),
                task_ids: round_tasks.iter().map(|t| t.id.clone()).collect(),
                new_citations: new_citations.len(),
                new_domains: new_domains.len(),
            });

            self.emitter.emit(AgentEvent::progress(
                "round",
                (iteration + 1) as u64,
                Some(max_iterations as u64),
                format!(
                    "Iteration {} complete: tasks={} new_citations={} new_domains={}",
                    iteration + 1,
                    all_tasks.len(),
                    new_citations.len(),
                    new_domains.len()
                ),
            ));

            if iteration > 0 && new_domains.is_empty() && new_citations.len() < saturation_floor {
                stop_reason = "saturated";
                break;
            }

            all_citations.extend(new_citations);
            all_domains.extend(new_domains);

            let top_findings = select_top_findings(&findings, 10);
            draft = self.refine_draft(query, report_type, &draft, &top_findings).await?;
            debug!(iteration, draft_len = draft.len(), "run_draft_centric: draft refined");
        }

        info!(stop_reason, tasks = all_tasks.len(), "run_draft_centric: loop finished");

        let citations = self.collect_allowed_citations(&all_results);
        self.check_gates(&all_results, &citations)?;

        self.emitter
            .emit(AgentEvent::progress("synthesize", 0, None, "Synthesizing report"));

        let findings = findings_from_results(&all_results);
        let (curated_sources, synthesis_findings, synthesis_allowed) =
            self.curate_for_synthesis(report_type, &all_results, &findings, &citations);

        let mut outcome = ResearchOutcome {
            query: query.to_string(),
            report_type,
            plan: combined_plan,
            planner_raw,
            planner_error,
            tasks: all_tasks,
            results: all_results,
            citations: citations.clone(),
            report_markdown: String::new(),
            report_json: None,
            rounds,
            gap_plan: None,
            gap_planner_raw: String::new(),
            verify_plan: None,
            verify_planner_raw: String::new(),
            synthesis_stage: None,
            synthesis_error: None,
            curated_sources,
            stop_reason: Some(stop_reason.to_string()),
        };

        match self
            .synthesize_and_render(query, &synthesis_findings, &synthesis_allowed, report_type)
            .await
        {
            Ok((report, report_json)) => {
                outcome.report_markdown = report;
                outcome.report_json = report_json;
                self.emitter.emit(AgentEvent::progress(
                    "done",
                    1,
                    Some(1),
                    format!("Done (stop_reason={stop_reason})"),
                ));
                Ok(outcome)
            }
            Err(e) => Err(self.wrap_synthesis_error(e, outcome)),
        }
    }
}
