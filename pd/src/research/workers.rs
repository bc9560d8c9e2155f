//! Worker round execution, invariants, and continuation

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, warn};

use crate::agent::{SpawnOptions, WorkerResult, WorkerTask, domain_for};
use crate::events::AgentEvent;

use super::orchestrator::DeepResearch;
use super::types::WorkerFinding;

/// Unique, sorted `http…` citation URLs across all results
pub(crate) fn collect_citations_from_traces(results: &[WorkerResult]) -> Vec<String> {
    let mut urls = std::collections::BTreeSet::new();
    for r in results {
        for u in &r.citations {
            if u.starts_with("http") {
                urls.insert(u.clone());
            }
        }
    }
    urls.into_iter().collect()
}

/// Unique, sorted evidence URLs across all results
pub(crate) fn collect_evidence_urls(results: &[WorkerResult]) -> Vec<String> {
    let mut urls = std::collections::BTreeSet::new();
    for r in results {
        for ev in &r.evidence {
            if ev.url.starts_with("http") {
                urls.insert(ev.url.clone());
            }
        }
    }
    urls.into_iter().collect()
}

/// Unique, sorted domains across the given citations
pub(crate) fn collect_domains(citations: &[String]) -> Vec<String> {
    let mut domains = std::collections::BTreeSet::new();
    for u in citations {
        let d = domain_for(u);
        if !d.is_empty() {
            domains.insert(d);
        }
    }
    domains.into_iter().collect()
}

/// Per-worker success/failure lines for fatal diagnostics
pub(crate) fn format_worker_diagnostics(results: &[WorkerResult]) -> String {
    if results.is_empty() {
        return "(no workers)".to_string();
    }
    results
        .iter()
        .map(|r| {
            format!(
                "- {}: success={} web_search_calls={} citations={} error={}",
                r.task_id,
                r.success,
                r.web_search_calls,
                r.citations.len(),
                r.error.as_deref().unwrap_or(""),
            )
            .trim_end()
            .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn findings_from_results(results: &[WorkerResult]) -> Vec<WorkerFinding> {
    results.iter().map(WorkerFinding::from).collect()
}

impl DeepResearch {
    pub(crate) fn spawn_options(&self) -> SpawnOptions {
        SpawnOptions {
            max_workers: self.config.max_workers,
            timeout: Duration::from_secs_f64(self.config.worker_timeout_s),
            allow_writes: false,
            max_web_search_calls: Some(self.config.max_web_search_calls.max(1)),
            max_web_extract_calls: if self.config.enable_deep_read {
                Some(self.config.max_web_extract_calls)
            } else {
                Some(0)
            },
            extract_max_chars: self.config.extract_max_chars,
        }
    }

    pub(crate) fn emit_worker_completed(&self, result: &WorkerResult) {
        let domains = result.domains();
        self.emitter.emit(AgentEvent::WorkerCompleted {
            task_id: result.task_id.clone(),
            success: result.success,
            web_search_calls: result.web_search_calls,
            web_extract_calls: result.web_extract_calls,
            citations: result.citations.len() as u64,
            domains: domains.len() as u64,
            evidence: result.evidence.len() as u64,
            duration_ms: result.duration_ms,
            error: result.error.clone().unwrap_or_default(),
        });
    }

    /// Fan out one round of tasks and emit completion events
    pub(crate) async fn run_round(&self, stage_label: &str, message: &str, tasks: &[WorkerTask]) -> Vec<WorkerResult> {
        if tasks.is_empty() {
            return Vec::new();
        }
        self.emitter
            .emit(AgentEvent::progress(stage_label, 0, Some(tasks.len() as u64), message));

        let opts = self.spawn_options();
        let callback = |r: &WorkerResult| self.emit_worker_completed(r);
        self.pool.spawn_parallel(tasks, &opts, Some(&callback)).await
    }

    /// Fan out, apply invariants, and retry failed tasks once when allowed
    pub(crate) async fn run_round_checked(
        &self,
        stage_label: &str,
        message: &str,
        tasks: &[WorkerTask],
    ) -> Vec<WorkerResult> {
        let results = self.run_round(stage_label, message, tasks).await;
        let results = self.apply_worker_invariants(results);

        if self.config.best_effort || self.config.worker_max_attempts <= 1 {
            return results;
        }

        let failed_ids: std::collections::BTreeSet<String> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.task_id.clone())
            .collect();
        if failed_ids.is_empty() {
            return results;
        }

        self.emitter.emit(AgentEvent::progress(
            stage_label,
            0,
            Some(failed_ids.len() as u64),
            format!("Retrying {} failed task(s)", failed_ids.len()),
        ));

        let retry_tasks: Vec<WorkerTask> = tasks.iter().filter(|t| failed_ids.contains(&t.id)).cloned().collect();
        if retry_tasks.is_empty() {
            return results;
        }

        let rerun = self.run_round(stage_label, "Retrying failed tasks", &retry_tasks).await;
        let rerun = self.apply_worker_invariants(rerun);

        let mut by_id: BTreeMap<String, WorkerResult> =
            results.into_iter().map(|r| (r.task_id.clone(), r)).collect();
        for r in rerun {
            by_id.insert(r.task_id.clone(), r);
        }
        tasks
            .iter()
            .filter_map(|t| by_id.remove(&t.id))
            .collect()
    }

    /// Downgrade successful results that violate worker invariants:
    /// zero extracted evidence under deep read, or zero citations otherwise.
    pub(crate) fn apply_worker_invariants(&self, results: Vec<WorkerResult>) -> Vec<WorkerResult> {
        results
            .into_iter()
            .map(|mut r| {
                if !r.success {
                    return r;
                }
                if self.config.enable_deep_read && r.evidence.is_empty() {
                    debug!(task_id = %r.task_id, "apply_worker_invariants: no evidence under deep read");
                    r.success = false;
                    r.error = Some("Worker collected no extracted evidence (web_extract)".to_string());
                    return r;
                }
                if !self.config.enable_deep_read && r.citations.is_empty() {
                    debug!(task_id = %r.task_id, "apply_worker_invariants: no citations");
                    r.success = false;
                    r.error = Some("Worker collected no citations".to_string());
                    return r;
                }
                r
            })
            .collect()
    }

    fn continuation_prompt(
        &self,
        base_prompt: &str,
        prior_output: &str,
        prior_citations: &[String],
        prior_evidence_urls: &[String],
        additional_calls: u32,
        remaining_extracts: u32,
    ) -> String {
        let prior: String = prior_citations
            .iter()
            .take(15)
            .map(|u| format!("- {u}"))
            .collect::<Vec<_>>()
            .join("\n");

        let extract_block = if self.config.enable_deep_read && remaining_extracts > 0 {
            let already_read: String = prior_evidence_urls
                .iter()
                .take(15)
                .map(|u| format!("- {u}"))
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                "\nAfter searching, call `web_extract` on up to {} NEW URLs (pages you have not extracted yet).\n\
                 Use `max_chars={}`.\n\
                 Prefer diverse, reputable domains and avoid duplicates.\n\
                 Already extracted URLs (do not re-extract):\n{}\n",
                remaining_extracts,
                self.config.extract_max_chars.max(1),
                if already_read.is_empty() { "(none)".to_string() } else { already_read },
            )
        } else {
            String::new()
        };

        let previous_notes = if prior_output.trim().is_empty() {
            String::new()
        } else {
            format!("\n\nPrevious notes:\n{}", prior_output.trim())
        };

        format!(
            "{base}\n\n\
             Continue researching this same task.\n\
             Make ~{extra} additional `web_search` calls (if possible), focusing on NEW domains and NEW query variants.\n\
             Use pagination (page=1..{pages}) and page_size={page_size}.\n\
             Avoid reusing URLs you already collected.\n\n\
             Already collected URLs (do not reuse):\n{prior}{extract_block}\n\n\
             Append new bullet points and cite any new URLs you used.{previous_notes}",
            base = base_prompt.trim(),
            extra = additional_calls.max(1),
            pages = self.config.max_pages.max(1),
            page_size = self.config.page_size.max(1),
            prior = if prior.is_empty() { "(none)".to_string() } else { prior },
        )
    }

    /// Merge a continuation result into its predecessor (union semantics)
    pub(crate) fn merge_worker_results(&self, a: &WorkerResult, b: &WorkerResult) -> WorkerResult {
        let mut citations: std::collections::BTreeSet<String> = a.citations.iter().cloned().collect();
        citations.extend(b.citations.iter().cloned());

        let mut sources = a.sources.clone();
        sources.extend(b.sources.clone());

        let mut web_search_trace = a.web_search_trace.clone();
        web_search_trace.extend(b.web_search_trace.clone());
        let mut web_extract_trace = a.web_extract_trace.clone();
        web_extract_trace.extend(b.web_extract_trace.clone());
        let mut evidence = a.evidence.clone();
        evidence.extend(b.evidence.clone());

        let mut output_parts = Vec::new();
        if !a.output.trim().is_empty() {
            output_parts.push(a.output.trim().to_string());
        }
        if !b.output.trim().is_empty() {
            output_parts.push(b.output.trim().to_string());
        }

        let duration_ms = match (a.duration_ms, b.duration_ms) {
            (None, None) => None,
            (x, y) => Some(x.unwrap_or(0) + y.unwrap_or(0)),
        };

        WorkerResult {
            task_id: a.task_id.clone(),
            output: output_parts.join("\n\n"),
            citations: citations.into_iter().collect(),
            sources,
            web_search_calls: a.web_search_calls + b.web_search_calls,
            web_search_trace,
            web_extract_calls: a.web_extract_calls + b.web_extract_calls,
            web_extract_trace,
            evidence,
            iterations: a.iterations + b.iterations,
            duration_ms,
            success: a.success && b.success,
            error: a.error.clone().or_else(|| b.error.clone()),
        }
    }

    /// Dispatch follow-up rounds to workers that still have search budget.
    ///
    /// Each follow-up task carries the prior URL list as a do-not-reuse
    /// hint; new results merge into the existing ones by union.
    pub(crate) async fn maybe_continue_workers(
        &self,
        tasks: &[WorkerTask],
        results: Vec<WorkerResult>,
        stage_label: &str,
        message_prefix: &str,
    ) -> Vec<WorkerResult> {
        if !self.config.enable_worker_continuation || self.config.best_effort {
            return results;
        }
        let target = self.config.target_web_search_calls.max(1);
        if target <= 1 {
            return results;
        }
        let max_total = self.config.max_web_search_calls.max(1);
        let max_total_extract = if self.config.enable_deep_read {
            self.config.max_web_extract_calls
        } else {
            0
        };
        let max_rounds = self.config.max_worker_continuations;
        if max_rounds == 0 {
            return results;
        }

        let task_by_id: BTreeMap<&str, &WorkerTask> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut results_by_id: BTreeMap<String, WorkerResult> =
            results.iter().map(|r| (r.task_id.clone(), r.clone())).collect();

        for _ in 0..max_rounds {
            let mut todo: Vec<WorkerTask> = Vec::new();
            for r in results_by_id.values() {
                if !r.success {
                    continue;
                }
                let current_calls = r.web_search_calls;
                let remaining = max_total.saturating_sub(current_calls);
                let need = target.saturating_sub(current_calls);
                if need == 0 || remaining == 0 {
                    continue;
                }
                let Some(t) = task_by_id.get(r.task_id.as_str()) else { continue };
                let remaining_extract = max_total_extract.saturating_sub(r.web_extract_calls);
                let evidence_urls: Vec<String> = r.evidence.iter().map(|ev| ev.url.clone()).collect();
                let prompt = self.continuation_prompt(
                    &t.prompt,
                    &r.output,
                    &r.citations,
                    &evidence_urls,
                    need.min(remaining),
                    remaining_extract,
                );
                todo.push(WorkerTask {
                    id: r.task_id.clone(),
                    prompt,
                    agent_name: t.agent_name.clone(),
                    max_iterations: t.max_iterations,
                    max_web_search_calls: Some(remaining),
                    max_web_extract_calls: Some(remaining_extract),
                });
            }

            if todo.is_empty() {
                break;
            }

            self.emitter.emit(AgentEvent::progress(
                stage_label,
                0,
                Some(todo.len() as u64),
                format!("{message_prefix}: {} task(s)", todo.len()),
            ));

            let opts = SpawnOptions {
                max_web_search_calls: None,
                max_web_extract_calls: Some(max_total_extract),
                ..self.spawn_options()
            };
            let callback = |r: &WorkerResult| self.emit_worker_completed(r);
            let more = self.pool.spawn_parallel(&todo, &opts, Some(&callback)).await;

            for nr in more {
                let merged = match results_by_id.get(&nr.task_id) {
                    None => Some(nr),
                    Some(prev) if nr.success => Some(self.merge_worker_results(prev, &nr)),
                    Some(_) => {
                        warn!(task_id = %nr.task_id, "maybe_continue_workers: continuation failed, keeping prior result");
                        None
                    }
                };
                if let Some(result) = merged {
                    results_by_id.insert(result.task_id.clone(), result);
                }
            }
        }

        results
            .iter()
            .map(|r| results_by_id.get(&r.task_id).cloned().unwrap_or_else(|| r.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(task_id: &str, citations: &[&str]) -> WorkerResult {
        WorkerResult {
            task_id: task_id.to_string(),
            output: String::new(),
            citations: citations.iter().map(|s| s.to_string()).collect(),
            sources: Default::default(),
            web_search_calls: 1,
            web_search_trace: Vec::new(),
            web_extract_calls: 0,
            web_extract_trace: Vec::new(),
            evidence: Vec::new(),
            iterations: 1,
            duration_ms: Some(10),
            success: true,
            error: None,
        }
    }

    #[test]
    fn test_collectors() {
        let results = vec![
            result_with("a", &["https://x.com/1", "https://y.com/2"]),
            result_with("b", &["https://x.com/1", "nota-url"]),
        ];
        let citations = collect_citations_from_traces(&results);
        assert_eq!(citations.len(), 2);
        let domains = collect_domains(&citations);
        assert_eq!(domains, vec!["x.com", "y.com"]);
    }

    #[test]
    fn test_diagnostics_format() {
        let results = vec![result_with("a", &["https://x.com/1"])];
        let diag = format_worker_diagnostics(&results);
        assert!(diag.contains("- a: success=true web_search_calls=1 citations=1"));
        assert_eq!(format_worker_diagnostics(&[]), "(no workers)");
    }
}
