//! DeepResearch - the orchestrator facade and multi-round strategy

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::agent::{WorkerPool, WorkerResult};
use crate::events::{AgentEvent, EventEmitter, PlannedTaskSummary};
use crate::llm::CompletionClient;

use super::memo::ResearchMemo;
use super::types::{
    CuratedSource, PlanSet, ReportType, ResearchConfig, ResearchError, ResearchOutcome, ResearchRunError,
    ResearchStrategy, SynthesisError, WorkerFinding, detect_report_type,
};
use super::workers::{
    collect_citations_from_traces, collect_domains, collect_evidence_urls, findings_from_results,
    format_worker_diagnostics,
};

/// Deep-research orchestrator.
///
/// Holds the completion port, the worker pool, configuration by value, and
/// the event emitter. One instance runs one query at a time.
pub struct DeepResearch {
    pub(crate) llm: Arc<dyn CompletionClient>,
    pub(crate) pool: Arc<dyn WorkerPool>,
    pub(crate) config: ResearchConfig,
    pub(crate) emitter: EventEmitter,
}

impl DeepResearch {
    pub fn new(
        llm: Arc<dyn CompletionClient>,
        pool: Arc<dyn WorkerPool>,
        config: ResearchConfig,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            llm,
            pool,
            config,
            emitter,
        }
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    /// Run the configured strategy over a query
    pub async fn run(&self, query: &str) -> Result<ResearchOutcome, ResearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ResearchError::EmptyQuery);
        }
        info!(query, strategy = ?self.config.strategy, "DeepResearch::run: starting");
        match self.config.strategy {
            ResearchStrategy::MultiRound => self.run_multi_round(query).await,
            ResearchStrategy::DraftCentric => self.run_draft_centric(query).await,
        }
    }

    fn emit_plan(&self, plan: &PlanSet) {
        if plan.tasks.is_empty() {
            return;
        }
        let tasks = plan
            .tasks
            .iter()
            .map(|t| PlannedTaskSummary {
                id: t.id.clone(),
                search_query: t.search_query.clone(),
                instructions: t.instructions.clone(),
            })
            .collect();
        self.emitter.emit(AgentEvent::ResearchPlan { tasks });
    }

    pub(crate) fn collect_allowed_citations(&self, results: &[WorkerResult]) -> Vec<String> {
        if self.config.enable_deep_read {
            collect_evidence_urls(results)
        } else {
            collect_citations_from_traces(results)
        }
    }

    /// Strictness gates over the accumulated results
    pub(crate) fn check_gates(&self, results: &[WorkerResult], citations: &[String]) -> Result<(), ResearchError> {
        if self.config.best_effort {
            return Ok(());
        }
        let failures = results.iter().filter(|r| !r.success).count();
        if self.config.strict_all && failures > 0 {
            return Err(ResearchError::Gate(format!(
                "Deep research failed because one or more workers failed.\n\nDiagnostics:\n{}",
                format_worker_diagnostics(results)
            )));
        }
        if self.config.require_citations {
            if citations.len() < self.config.min_total_citations {
                return Err(ResearchError::Gate(format!(
                    "Deep research requires web citations but none (or too few) were collected.\n\
                     Fix: ensure TAVILY_API_KEY is set and the web_search tool is reachable.\n\n\
                     Diagnostics:\n{}",
                    format_worker_diagnostics(results)
                )));
            }
            let domains = collect_domains(citations);
            if domains.len() < self.config.min_total_domains {
                return Err(ResearchError::Gate(format!(
                    "Deep research requires broader source coverage but too few unique domains were collected.\n\
                     Need >= {} domains, got {}.\n\nDiagnostics:\n{}",
                    self.config.min_total_domains,
                    domains.len(),
                    format_worker_diagnostics(results)
                )));
            }
        }
        Ok(())
    }

    /// Strategy I: plan, fan out, optionally gap-fill and verify, then
    /// synthesize under the grounding invariants.
    async fn run_multi_round(&self, query: &str) -> Result<ResearchOutcome, ResearchError> {
        let report_type = detect_report_type(query);

        self.emitter
            .emit(AgentEvent::progress("plan", 0, None, "Planning searches"));
        let (plan, planner_raw, planner_error) = self
            .plan(query, self.config.max_tasks, 3, report_type)
            .await?;
        self.emit_plan(&plan);

        let round1_tasks = self.to_worker_tasks(query, &plan)?;
        let results = self
            .run_round(
                "workers",
                &format!(
                    "Running {} tasks (max concurrency: {})",
                    round1_tasks.len(),
                    self.config.max_workers
                ),
                &round1_tasks,
            )
            .await;
        let results = self
            .maybe_continue_workers(&round1_tasks, results, "workers", "Continuing round-1 tasks")
            .await;
        let mut results = self.apply_worker_invariants(results);

        let mut citations = self.collect_allowed_citations(&results);
        self.check_gates(&results, &citations)?;

        let mut findings = findings_from_results(&results);
        let mut all_tasks = round1_tasks.clone();
        let mut combined_plan = plan.clone();

        // Optional gap-fill round
        let mut gap_plan: Option<PlanSet> = None;
        let mut gap_planner_raw = String::new();
        if self.config.enable_round2 && !self.config.best_effort {
            self.emitter
                .emit(AgentEvent::progress("gap", 0, None, "Planning follow-up searches"));
            let memo = ResearchMemo::build(&self.config, query, report_type, 1, 0, &findings);
            let (gp, raw) = self.gap_fill_plan(query, &memo, self.config.round2_max_tasks).await?;
            gap_planner_raw = raw;
            let round2_tasks = self.to_worker_tasks(query, &gp)?;
            if !gp.tasks.is_empty() {
                combined_plan.tasks.extend(gp.tasks.clone());
            }
            gap_plan = Some(gp);
            if !round2_tasks.is_empty() {
                let more = self
                    .run_round(
                        "workers",
                        &format!(
                            "Running {} follow-up tasks (max concurrency: {})",
                            round2_tasks.len(),
                            self.config.max_workers
                        ),
                        &round2_tasks,
                    )
                    .await;
                let more = self
                    .maybe_continue_workers(&round2_tasks, more, "workers", "Continuing round-2 tasks")
                    .await;
                let more = self.apply_worker_invariants(more);
                results.extend(more);
                all_tasks.extend(round2_tasks);

                citations = self.collect_allowed_citations(&results);
                self.check_gates(&results, &citations)?;
                findings = findings_from_results(&results);
            }
        }

        // Optional verification round
        let mut verify_plan: Option<PlanSet> = None;
        let mut verify_planner_raw = String::new();
        if self.config.verify_max_tasks > 0 && !self.config.best_effort {
            self.emitter
                .emit(AgentEvent::progress("verify", 0, None, "Planning verification searches"));
            let memo = ResearchMemo::build(&self.config, query, report_type, 2, 0, &findings);
            let (vp, raw) = self
                .verification_plan(query, &memo, self.config.verify_max_tasks)
                .await?;
            verify_planner_raw = raw;
            let verify_tasks = self.to_worker_tasks(query, &vp)?;
            if !vp.tasks.is_empty() {
                combined_plan.tasks.extend(vp.tasks.clone());
            }
            verify_plan = Some(vp);
            if !verify_tasks.is_empty() {
                let more = self
                    .run_round(
                        "workers",
                        &format!(
                            "Running {} verification tasks (max concurrency: {})",
                            verify_tasks.len(),
                            self.config.max_workers
                        ),
                        &verify_tasks,
                    )
                    .await;
                let more = self
                    .maybe_continue_workers(&verify_tasks, more, "workers", "Continuing verification tasks")
                    .await;
                let more = self.apply_worker_invariants(more);
                results.extend(more);
                all_tasks.extend(verify_tasks);

                citations = self.collect_allowed_citations(&results);
                self.check_gates(&results, &citations)?;
                findings = findings_from_results(&results);
            }
        }

        self.emitter
            .emit(AgentEvent::progress("synthesize", 0, None, "Synthesizing report"));

        let (curated_sources, synthesis_findings, synthesis_allowed) =
            self.curate_for_synthesis(report_type, &results, &findings, &citations);

        let mut outcome = ResearchOutcome {
            query: query.to_string(),
            report_type,
            plan: combined_plan,
            planner_raw,
            planner_error,
            tasks: all_tasks,
            results,
            citations: citations.clone(),
            report_markdown: String::new(),
            report_json: None,
            rounds: Vec::new(),
            gap_plan,
            gap_planner_raw,
            verify_plan,
            verify_planner_raw,
            synthesis_stage: None,
            synthesis_error: None,
            curated_sources,
            stop_reason: None,
        };

        match self
            .synthesize_and_render(query, &synthesis_findings, &synthesis_allowed, report_type)
            .await
        {
            Ok((report, report_json)) => {
                outcome.report_markdown = report;
                outcome.report_json = report_json;
                self.emitter.emit(AgentEvent::progress("done", 1, Some(1), "Done"));
                Ok(outcome)
            }
            Err(e) => Err(self.wrap_synthesis_error(e, outcome)),
        }
    }

    /// Curated-source selection for narrative synthesis, when configured
    pub(crate) fn curate_for_synthesis(
        &self,
        report_type: ReportType,
        results: &[WorkerResult],
        findings: &[WorkerFinding],
        citations: &[String],
    ) -> (Option<Vec<CuratedSource>>, Vec<WorkerFinding>, Vec<String>) {
        let curation_applies = report_type == ReportType::Narrative
            && !self.config.require_quote_per_claim
            && self.config.curated_sources_max_total > 0;
        if !curation_applies {
            return (None, findings.to_vec(), citations.to_vec());
        }

        let selected = self.build_curated_sources(results);
        let citation_set: BTreeSet<&str> = citations.iter().map(String::as_str).collect();
        let curated_urls: BTreeSet<String> = selected
            .iter()
            .filter(|s| citation_set.contains(s.url.as_str()))
            .map(|s| s.url.clone())
            .collect();

        if curated_urls.is_empty() {
            debug!("curate_for_synthesis: curation produced no usable URLs, keeping full set");
            return (None, findings.to_vec(), citations.to_vec());
        }

        let synthesis_findings = self.build_synthesis_findings(results, &curated_urls);
        let allowed: Vec<String> = curated_urls.into_iter().collect();
        (Some(selected), synthesis_findings, allowed)
    }

    pub(crate) fn wrap_synthesis_error(&self, e: SynthesisError, mut outcome: ResearchOutcome) -> ResearchError {
        outcome.synthesis_stage = Some(e.stage.clone());
        outcome.synthesis_error = Some(e.message.clone());
        ResearchError::Run(Box::new(ResearchRunError {
            message: e.message,
            outcome: Box::new(outcome),
        }))
    }
}
