//! IngestionScheduler - drives a session from seeding to completion
//!
//! Each iteration picks the highest-yield tasks, dispatches them per source
//! under circuit breakers and adaptive concurrency, fetches and extracts
//! newly discovered documents, queues follow-ups, and persists the session
//! snapshot. Stop conditions: cost budget, empty queue, iteration cap,
//! document cap, or saturation.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use eyre::Result;
use serde_json::json;
use tracing::{debug, info, warn};

use signalstore::{
    DocumentRef, ExtractionResult, SearchTask, SessionEvent, SessionManager, SessionState, SessionStatus, Storage,
};

use crate::config::IngestConfig;
use crate::events::{AgentEvent, EventEmitter};
use crate::llm::CompletionClient;

use super::breaker::CircuitBreaker;
use super::complexity::{assess_complexity, iteration_budget};
use super::cost::CostTracker;
use super::extract::Extractor;
use super::filters::ContentFilter;
use super::parallel::ParallelExecutor;
use super::pipeline::ExtractionPipeline;
use super::source::Source;
use super::validation::SnippetValidator;
use super::{KNOWLEDGE_CONTEXT_SIZE, MAX_ENTITIES_FOR_FOLLOWUP, MAX_FOLLOWUP_QUERIES};

#[derive(Debug, Default, Clone, Copy)]
struct QueryYield {
    docs: u64,
    snippets: u64,
}

/// Long-running ingestion driver. Owns the session state exclusively.
pub struct IngestionScheduler {
    session: SessionState,
    sources: BTreeMap<String, Arc<dyn Source>>,
    config: IngestConfig,
    llm: Arc<dyn CompletionClient>,
    storage: Storage,
    session_manager: SessionManager,
    pipeline: ExtractionPipeline,
    executor: ParallelExecutor,
    breakers: BTreeMap<String, CircuitBreaker>,
    cost: CostTracker,
    entity_counts: BTreeMap<String, u64>,
    signal_type_counts: BTreeMap<String, u64>,
    recent_empty_extractions: VecDeque<bool>,
    query_stats: BTreeMap<String, QueryYield>,
    emitter: EventEmitter,
}

impl IngestionScheduler {
    pub fn new(
        session: SessionState,
        sources: Vec<Arc<dyn Source>>,
        config: IngestConfig,
        llm: Arc<dyn CompletionClient>,
        emitter: EventEmitter,
    ) -> Result<Self> {
        let storage = Storage::open(&session.session_id, &config.data_dir)?;
        let session_manager = SessionManager::new(&config.data_dir)?;

        let extractor = Extractor::new(
            llm.clone(),
            config.extraction_model.clone(),
            session.extraction_prompt_version.clone(),
            SnippetValidator::new(config.snippet_validation.clone()),
        );
        let pipeline = ExtractionPipeline::new(ContentFilter::new(config.filter.clone()), extractor);
        let executor = ParallelExecutor::new(config.parallel_workers);

        let breakers = sources
            .iter()
            .map(|s| {
                (
                    s.name().to_string(),
                    CircuitBreaker::new(
                        config.breaker_failure_threshold,
                        Duration::from_secs_f64(config.breaker_recovery_timeout_s),
                    ),
                )
            })
            .collect();
        let sources = sources.into_iter().map(|s| (s.name().to_string(), s)).collect();

        Ok(Self {
            session,
            sources,
            config,
            llm,
            storage,
            session_manager,
            pipeline,
            executor,
            breakers,
            cost: CostTracker::new(),
            entity_counts: BTreeMap::new(),
            signal_type_counts: BTreeMap::new(),
            recent_empty_extractions: VecDeque::new(),
            query_stats: BTreeMap::new(),
            emitter,
        })
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Run until a stop condition fires or the user interrupts.
    ///
    /// Ctrl-C pauses the session (snapshot saved) and returns cleanly.
    pub async fn run(&mut self) -> Result<()> {
        info!(session_id = %self.session.session_id, topic = %self.session.topic, "IngestionScheduler::run: starting");

        match self.run_inner().await {
            Ok(interrupted) => {
                if interrupted {
                    self.log_event(SessionEvent::new(&self.session.session_id, "interrupted")
                        .with_decision("User pressed Ctrl+C"));
                    self.session.status = SessionStatus::Paused;
                    self.save_state()?;
                    info!(session_id = %self.session.session_id, "IngestionScheduler::run: paused");
                } else {
                    self.finalize()?;
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "IngestionScheduler::run: error");
                self.log_event(SessionEvent::new(&self.session.session_id, "error").with_decision(e.to_string()));
                self.session.status = SessionStatus::Error;
                self.save_state()?;
                Err(e)
            }
        }
    }

    /// Returns true when interrupted by ctrl-c
    async fn run_inner(&mut self) -> Result<bool> {
        if self.session.complexity.is_none() {
            let complexity = assess_complexity(
                &self.llm,
                &self.session.topic.clone(),
                &self.config.complexity_model.clone(),
                &self.cost,
            )
            .await;
            self.session.complexity = Some(complexity.as_str().to_string());
            self.session.max_iterations = iteration_budget(complexity);
            info!(
                complexity = complexity.as_str(),
                max_iterations = self.session.max_iterations,
                "IngestionScheduler::run_inner: complexity assessed"
            );
        }

        if self.session.task_queue.is_empty() {
            self.seed_tasks().await?;
        }

        loop {
            if !self.should_continue()? {
                return Ok(false);
            }
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("IngestionScheduler::run_inner: interrupted by user");
                    return Ok(true);
                }
                result = self.run_iteration() => {
                    result?;
                }
            }
            self.save_state()?;
            self.emit_progress();
        }
    }

    /// Seed the queue with semantic query variants adapted by each source
    pub async fn seed_tasks(&mut self) -> Result<()> {
        info!("IngestionScheduler::seed_tasks: seeding initial tasks");
        let queries = self.generate_semantic_queries();
        debug!(query_count = queries.len(), "IngestionScheduler::seed_tasks: generated queries");

        let topic = self.session.topic.clone();
        for (source_name, source) in &self.sources {
            match source.adapt_queries(&queries, &topic).await {
                Ok(adapted) => {
                    let existing: std::collections::BTreeSet<String> =
                        self.session.task_queue.iter().map(|t| t.task_id.clone()).collect();
                    let count = adapted.len();
                    for task in adapted {
                        if !existing.contains(&task.task_id) {
                            self.session.task_queue.push(task);
                        }
                    }
                    info!(source = %source_name, count, "IngestionScheduler::seed_tasks: added adapted tasks");
                }
                Err(e) => warn!(source = %source_name, error = %e, "IngestionScheduler::seed_tasks: adapt failed"),
            }
        }

        self.log_event(
            SessionEvent::new(&self.session.session_id, "tasks_seeded")
                .with_output("task_count", json!(self.session.task_queue.len())),
        );
        info!(task_count = self.session.task_queue.len(), "IngestionScheduler::seed_tasks: seeded");
        Ok(())
    }

    fn generate_semantic_queries(&self) -> Vec<String> {
        let topic = &self.session.topic;
        let mut queries = vec![
            topic.clone(),
            format!("{topic} problems"),
            format!("{topic} frustrating"),
            format!("{topic} hate"),
            format!("{topic} alternative"),
            format!("why is {topic} so hard"),
            format!("{topic} missing features"),
            format!("{topic} pricing too expensive"),
            format!("{topic} support terrible"),
            format!("{topic} integration issues"),
        ];
        for entity in self.top_entities(MAX_ENTITIES_FOR_FOLLOWUP) {
            queries.push(format!("{entity} problems"));
            queries.push(format!("{entity} vs {topic}"));
        }

        let mut seen = std::collections::BTreeSet::new();
        let mut deduped = Vec::new();
        for q in queries {
            let key = q.trim().to_lowercase();
            if !key.is_empty() && seen.insert(key) {
                deduped.push(q.trim().to_string());
            }
        }
        deduped
    }

    fn top_entities(&self, limit: usize) -> Vec<String> {
        let mut entries: Vec<(&String, &u64)> = self.entity_counts.iter().collect();
        entries.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        entries.into_iter().take(limit).map(|(name, _)| name.clone()).collect()
    }

    /// Pick up to `count` tasks from the queue, highest historical yield
    /// first. Picked tasks leave the queue.
    fn pick_tasks(&mut self, count: usize) -> Vec<SearchTask> {
        let mut candidates: Vec<(f64, usize)> = self
            .session
            .task_queue
            .iter()
            .enumerate()
            .filter(|(_, t)| !self.session.visited_tasks.contains(&t.task_id))
            .map(|(idx, t)| (self.task_score(t), idx))
            .collect();

        if candidates.is_empty() {
            return Vec::new();
        }

        candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        let picked_indices: std::collections::BTreeSet<usize> =
            candidates.iter().take(count).map(|(_, idx)| *idx).collect();

        let mut picked = Vec::new();
        let mut remaining = Vec::new();
        for (idx, task) in self.session.task_queue.drain(..).enumerate() {
            if picked_indices.contains(&idx) {
                picked.push(task);
            } else {
                remaining.push(task);
            }
        }
        self.session.task_queue = remaining;
        picked
    }

    /// Historical snippets-per-document yield of the task's query;
    /// unseen queries score 0.2.
    fn task_score(&self, task: &SearchTask) -> f64 {
        let Some(query) = &task.query else { return 0.0 };
        let key = query.trim().to_lowercase();
        let Some(stats) = self.query_stats.get(&key) else {
            return 0.2;
        };
        if stats.docs == 0 {
            return 0.2;
        }
        stats.snippets as f64 / stats.docs as f64
    }

    /// One scheduler iteration: dispatch, collect refs, process documents
    pub async fn run_iteration(&mut self) -> Result<()> {
        self.session.stats.iterations += 1;
        let iteration = self.session.stats.iterations;
        info!(iteration, "IngestionScheduler::run_iteration: starting");

        let tasks_to_run = self.pick_tasks(self.config.parallel_workers);
        if tasks_to_run.is_empty() {
            info!("IngestionScheduler::run_iteration: no tasks to run");
            return Ok(());
        }

        self.log_event(
            SessionEvent::new(&self.session.session_id, "iteration_started")
                .with_input("iteration", json!(iteration))
                .with_input("task_count", json!(tasks_to_run.len())),
        );

        let mut tasks_by_source: BTreeMap<String, Vec<SearchTask>> = BTreeMap::new();
        for task in tasks_to_run {
            tasks_by_source.entry(task.source.clone()).or_default().push(task);
        }

        let mut all_refs: Vec<(SearchTask, DocumentRef)> = Vec::new();

        for (source_name, source_tasks) in tasks_by_source {
            let Some(source) = self.sources.get(&source_name).cloned() else {
                warn!(source = %source_name, "IngestionScheduler::run_iteration: unknown source");
                continue;
            };

            let breaker_open = {
                let breaker = self.breakers.entry(source_name.clone()).or_default();
                !breaker.can_execute()
            };
            if breaker_open {
                let task_count = source_tasks.len();
                self.session.task_queue.extend(source_tasks);
                self.log_event(
                    SessionEvent::new(&self.session.session_id, "circuit_open")
                        .with_input("source", json!(source_name))
                        .with_input("task_count", json!(task_count))
                        .with_decision("Circuit open"),
                );
                continue;
            }

            for task in &source_tasks {
                self.log_event(
                    SessionEvent::new(&self.session.session_id, "task_started")
                        .with_input("task_id", json!(task.task_id))
                        .with_input("query", json!(task.query)),
                );
            }

            let outcomes = self.executor.execute_searches(source_tasks, source).await;

            for outcome in outcomes {
                let task = outcome.task;
                let page = outcome.page;

                if outcome.success {
                    if let Some(breaker) = self.breakers.get_mut(&source_name) {
                        breaker.record_success();
                    }
                    for document_ref in page.items {
                        if !self.session.visited_docs.contains(&document_ref.ref_id) {
                            all_refs.push((task.clone(), document_ref));
                        }
                    }
                    if let Some(cursor) = page.next_cursor
                        && !page.exhausted
                    {
                        self.session.task_queue.push(task.continuation(cursor));
                    }
                    self.session.visited_tasks.push(task.task_id.clone());
                    self.session.stats.tasks_completed += 1;
                    self.log_event(
                        SessionEvent::new(&self.session.session_id, "task_completed")
                            .with_input("task_id", json!(task.task_id))
                            .with_input("source", json!(task.source))
                            .with_input("query", json!(task.query))
                            .with_output("exhausted", json!(page.exhausted))
                            .with_metric("duration_ms", json!(outcome.duration_ms)),
                    );
                } else {
                    if let Some(breaker) = self.breakers.get_mut(&source_name) {
                        breaker.record_failure();
                    }
                    let error = outcome.error.unwrap_or_else(|| "Unknown error".to_string());
                    warn!(task_id = %task.task_id, %error, "IngestionScheduler::run_iteration: task failed");
                    let error_type = if error == "Timeout" || error == "Overall timeout" {
                        "timeout"
                    } else {
                        "search_error"
                    };
                    self.log_event(
                        SessionEvent::new(&self.session.session_id, "task_failed")
                            .with_input("task_id", json!(task.task_id))
                            .with_input("source", json!(task.source))
                            .with_input("query", json!(task.query))
                            .with_decision(error)
                            .with_metric("duration_ms", json!(outcome.duration_ms))
                            .with_metric("error_type", json!(error_type))
                            .with_metric("error_stage", json!("search")),
                    );
                }
            }
        }

        info!(ref_count = all_refs.len(), "IngestionScheduler::run_iteration: refs to process");

        for (task, document_ref) in all_refs {
            if self.session.stats.docs_collected >= self.config.max_documents {
                info!("IngestionScheduler::run_iteration: max documents reached");
                break;
            }
            self.process_ref(&task, &document_ref).await?;
        }

        self.session.stats.tasks_remaining = self.session.task_queue.len() as u64;
        Ok(())
    }

    /// Fetch one ref, persist the document, run extraction, update state.
    ///
    /// Re-running over an already-visited ref is a no-op. Source failures
    /// are logged, never propagated; storage failures are fatal.
    async fn process_ref(&mut self, task: &SearchTask, document_ref: &DocumentRef) -> Result<()> {
        if self.session.visited_docs.contains(&document_ref.ref_id) {
            return Ok(());
        }
        let Some(source) = self.sources.get(&task.source).cloned() else {
            return Ok(());
        };

        let fetch_start = Instant::now();
        let doc = match source.fetch(document_ref, self.config.deep_comments).await {
            Ok(doc) => doc,
            Err(e) => {
                let fetch_duration_ms = fetch_start.elapsed().as_millis() as u64;
                warn!(ref_id = %document_ref.ref_id, error = %e, "IngestionScheduler::process_ref: fetch failed");
                self.log_event(
                    SessionEvent::new(&self.session.session_id, "fetch_failed")
                        .with_input("ref_id", json!(document_ref.ref_id))
                        .with_decision(e.to_string())
                        .with_metric("fetch_duration_ms", json!(fetch_duration_ms))
                        .with_metric("error_stage", json!("fetch")),
                );
                return Ok(());
            }
        };
        let fetch_duration_ms = fetch_start.elapsed().as_millis() as u64;

        self.storage.save_document(&doc)?;
        self.session.visited_docs.push(document_ref.ref_id.clone());
        self.session.stats.docs_collected += 1;
        self.emitter.emit(AgentEvent::Document {
            doc_id: doc.doc_id.clone(),
            title: doc.title.clone(),
            source: doc.source.clone(),
        });
        info!(doc_id = %doc.doc_id, title = %doc.title, "IngestionScheduler::process_ref: document saved");

        let extract_start = Instant::now();
        let topic = self.session.topic.clone();
        let knowledge = self.session.knowledge.clone();
        let pipeline_result = self.pipeline.process(&doc, &topic, &knowledge, &self.cost).await;
        let extract_duration_ms = extract_start.elapsed().as_millis() as u64;

        if pipeline_result.filtered {
            self.record_query_yield(task, 0);
            self.log_event(
                SessionEvent::new(&self.session.session_id, "doc_filtered")
                    .with_input("doc_id", json!(doc.doc_id))
                    .with_decision(pipeline_result.reason)
                    .with_metric("raw_text_len", json!(doc.raw_text.len()))
                    .with_metric("fetch_duration_ms", json!(fetch_duration_ms)),
            );
            return Ok(());
        }

        let result = pipeline_result.extraction.unwrap_or_default();
        self.record_query_yield(task, result.snippets.len() as u64);

        for snippet in &result.snippets {
            self.storage.save_snippet(snippet)?;
            self.session.stats.snippets_extracted += 1;
            for entity in &snippet.entities {
                *self.entity_counts.entry(entity.clone()).or_insert(0) += 1;
            }
            *self.signal_type_counts.entry(snippet.signal_type.clone()).or_insert(0) += 1;
        }

        self.session
            .knowledge
            .extend(result.snippets.iter().map(|s| s.pain_statement.clone()));
        let knowledge_cap = KNOWLEDGE_CONTEXT_SIZE * 5;
        if self.session.knowledge.len() > knowledge_cap {
            let start = self.session.knowledge.len() - knowledge_cap;
            self.session.knowledge.drain(..start);
        }

        self.add_follow_up_tasks(&result, &task.source);
        self.record_extraction_observation(result.novelty, result.snippets.is_empty());

        self.log_event(
            SessionEvent::new(&self.session.session_id, "extraction_done")
                .with_input("doc_id", json!(doc.doc_id))
                .with_output("snippets", json!(result.snippets.len()))
                .with_output("entities", json!(result.entities.len()))
                .with_output("novelty", json!(result.novelty))
                .with_output("dropped_snippets", json!(result.dropped_snippets))
                .with_output("error_kind", json!(result.error_kind))
                .with_metric("fetch_duration_ms", json!(fetch_duration_ms))
                .with_metric("extract_duration_ms", json!(extract_duration_ms)),
        );

        Ok(())
    }

    /// Track novelty and empty-extraction history for saturation checks
    fn record_extraction_observation(&mut self, novelty: f64, was_empty: bool) {
        self.session.novelty_history.push(novelty);
        if self.recent_empty_extractions.len() == self.config.saturation_empty_extractions_limit {
            self.recent_empty_extractions.pop_front();
        }
        self.recent_empty_extractions.push_back(was_empty);
    }

    fn record_query_yield(&mut self, task: &SearchTask, snippets_extracted: u64) {
        let Some(query) = &task.query else { return };
        let key = query.trim().to_lowercase();
        let stats = self.query_stats.entry(key).or_default();
        stats.docs += 1;
        stats.snippets += snippets_extracted;
    }

    fn add_follow_up_tasks(&mut self, result: &ExtractionResult, source: &str) {
        for entity in result.entities.iter().take(MAX_ENTITIES_FOR_FOLLOWUP) {
            let query = format!("{entity} problems");
            if !self.task_exists(&query) {
                self.session.task_queue.push(SearchTask::search(source, "all", query));
            }
        }
        for query in result.follow_up_queries.iter().take(MAX_FOLLOWUP_QUERIES) {
            if !self.task_exists(query) {
                self.session.task_queue.push(SearchTask::search(source, "all", query.clone()));
            }
        }
    }

    fn task_exists(&self, query: &str) -> bool {
        let query_lower = query.to_lowercase();
        self.session
            .task_queue
            .iter()
            .any(|t| t.query.as_deref().is_some_and(|q| q.to_lowercase() == query_lower))
    }

    /// Evaluate stop conditions; logs the stop decision when stopping
    pub fn should_continue(&mut self) -> Result<bool> {
        self.refresh_cost_stats();

        if let Some(max_cost) = self.config.max_cost_usd
            && self.session.stats.total_cost_usd >= max_cost
        {
            info!("IngestionScheduler::should_continue: stop, max cost reached");
            self.log_event(
                SessionEvent::new(&self.session.session_id, "stop")
                    .with_decision("Max cost reached")
                    .with_metric("total_cost_usd", json!(self.session.stats.total_cost_usd)),
            );
            return Ok(false);
        }

        if self.session.task_queue.is_empty() {
            info!("IngestionScheduler::should_continue: stop, task queue empty");
            self.log_event(SessionEvent::new(&self.session.session_id, "stop").with_decision("Task queue empty"));
            return Ok(false);
        }

        if self.session.stats.iterations >= self.session.max_iterations {
            info!("IngestionScheduler::should_continue: stop, max iterations");
            self.log_event(SessionEvent::new(&self.session.session_id, "stop").with_decision("Max iterations reached"));
            return Ok(false);
        }

        if self.session.stats.docs_collected >= self.config.max_documents {
            info!("IngestionScheduler::should_continue: stop, max documents");
            self.log_event(SessionEvent::new(&self.session.session_id, "stop").with_decision("Max documents reached"));
            return Ok(false);
        }

        if self.is_saturated() {
            info!("IngestionScheduler::should_continue: stop, saturation detected");
            self.log_event(
                SessionEvent::new(&self.session.session_id, "stop")
                    .with_decision("Saturation detected")
                    .with_metric("avg_novelty", json!(self.avg_novelty()))
                    .with_metric("entity_count", json!(self.entity_counts.len()))
                    .with_metric("signal_diversity", json!(self.signal_diversity())),
            );
            return Ok(false);
        }

        Ok(true)
    }

    /// Saturated when the novelty window is full AND either every recent
    /// extraction was empty, or novelty has flattened while entity and
    /// signal-type coverage are both broad enough.
    fn is_saturated(&self) -> bool {
        if self.session.novelty_history.len() < self.config.saturation_window {
            return false;
        }

        if self.recent_empty_extractions.len() == self.config.saturation_empty_extractions_limit
            && self.recent_empty_extractions.iter().all(|e| *e)
        {
            return true;
        }

        if self.avg_novelty() >= self.config.saturation_threshold {
            return false;
        }
        if self.entity_counts.len() < self.config.saturation_min_entities {
            return false;
        }
        self.signal_diversity() >= self.config.saturation_signal_diversity_threshold
    }

    fn signal_diversity(&self) -> f64 {
        if self.signal_type_counts.is_empty() {
            return 0.0;
        }
        let unique = self.signal_type_counts.values().filter(|v| **v > 0).count();
        unique as f64 / signalstore::VALID_SIGNAL_TYPES.len() as f64
    }

    fn avg_novelty(&self) -> f64 {
        if self.session.novelty_history.is_empty() {
            return 1.0;
        }
        let window = self.config.saturation_window;
        let start = self.session.novelty_history.len().saturating_sub(window);
        let recent = &self.session.novelty_history[start..];
        recent.iter().sum::<f64>() / recent.len() as f64
    }

    fn refresh_cost_stats(&mut self) {
        let totals = self.cost.totals();
        self.session.stats.total_tokens = totals.total_tokens;
        self.session.stats.total_cost_usd = totals.total_cost_usd;
        self.session.stats.llm_calls = totals.calls;
        self.session.stats.extraction_calls = totals.calls_by_kind.get("extraction").copied().unwrap_or(0);
        self.session.stats.complexity_calls = totals.calls_by_kind.get("complexity").copied().unwrap_or(0);
    }

    fn save_state(&mut self) -> Result<()> {
        self.refresh_cost_stats();
        self.session_manager.save_session(&mut self.session)?;
        Ok(())
    }

    fn emit_progress(&self) {
        self.emitter.emit(AgentEvent::Progress {
            stage: "ingest".to_string(),
            current: self.session.stats.iterations,
            total: Some(self.session.max_iterations),
            message: format!(
                "docs={} snippets={} tasks_remaining={} avg_novelty={:.2}",
                self.session.stats.docs_collected,
                self.session.stats.snippets_extracted,
                self.session.task_queue.len(),
                self.avg_novelty(),
            ),
        });
    }

    fn finalize(&mut self) -> Result<()> {
        self.session.status = SessionStatus::Completed;
        self.session.stats.avg_novelty = self.avg_novelty();
        self.save_state()?;
        info!(
            docs = self.session.stats.docs_collected,
            snippets = self.session.stats.snippets_extracted,
            iterations = self.session.stats.iterations,
            avg_novelty = self.session.stats.avg_novelty,
            "IngestionScheduler::finalize: session complete"
        );
        Ok(())
    }

    fn log_event(&self, event: SessionEvent) {
        if let Err(e) = self.storage.log_event(&event) {
            warn!(error = %e, kind = %event.kind, "IngestionScheduler::log_event: append failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::source::{DeepComments, SourceError};
    use crate::llm::mock::MockClient;
    use crate::llm::CompletionResponse;
    use async_trait::async_trait;
    use signalstore::{Page, RawDocument, SourceEntity, utc_now};
    use tempfile::tempdir;

    struct StubSource {
        fail_search: bool,
    }

    #[async_trait]
    impl Source for StubSource {
        fn name(&self) -> &str {
            "stub"
        }

        async fn adapt_queries(&self, queries: &[String], _topic: &str) -> Result<Vec<SearchTask>, SourceError> {
            Ok(queries.iter().map(|q| SearchTask::search("stub", "all", q.clone())).collect())
        }

        async fn discover(&self, _topic: &str, _limit: usize) -> Result<Vec<SourceEntity>, SourceError> {
            Ok(Vec::new())
        }

        async fn search(&self, task: &SearchTask) -> Result<Page<DocumentRef>, SourceError> {
            if self.fail_search {
                return Err(SourceError::Request("down".to_string()));
            }
            Ok(Page {
                items: vec![DocumentRef {
                    ref_id: format!("ref-{}", task.task_id),
                    ref_type: "post".to_string(),
                    source: "stub".to_string(),
                    source_entity: "all".to_string(),
                    discovered_from_task_id: task.task_id.clone(),
                    rank: 0,
                    preview: None,
                }],
                next_cursor: None,
                exhausted: true,
                estimated_total: Some(1),
            })
        }

        async fn fetch(&self, r: &DocumentRef, _d: DeepComments) -> Result<RawDocument, SourceError> {
            Ok(RawDocument {
                doc_id: r.ref_id.clone(),
                source: "stub".to_string(),
                source_entity: "all".to_string(),
                url: format!("https://stub.example/{}", r.ref_id),
                permalink: format!("https://stub.example/{}", r.ref_id),
                retrieved_at: utc_now(),
                published_at: None,
                title: "A post".to_string(),
                raw_text: "x".repeat(200),
                author: Some("alice".to_string()),
                score: Some(50),
                num_comments: Some(2),
                metadata: Default::default(),
            })
        }
    }

    fn extraction_response(novelty: f64, with_snippet: bool) -> CompletionResponse {
        let snippets = if with_snippet {
            serde_json::json!([{
                "excerpt": "a long enough verbatim excerpt",
                "pain_statement": "a long enough pain statement",
                "signal_type": "complaint",
                "intensity": 3,
                "confidence": 0.8,
                "entities": ["Acme"],
            }])
        } else {
            serde_json::json!([])
        };
        CompletionResponse::text(
            serde_json::json!({
                "snippets": snippets,
                "entities": ["Acme"],
                "follow_up_queries": [],
                "novelty": novelty,
            })
            .to_string(),
        )
    }

    fn scheduler_with(
        dir: &std::path::Path,
        responses: Vec<CompletionResponse>,
        fail_search: bool,
        config_tweak: impl FnOnce(&mut IngestConfig),
    ) -> IngestionScheduler {
        let mut session = SessionState::new("widget tools", 60);
        session.complexity = Some("medium".to_string());
        let mut config = IngestConfig::default();
        config.data_dir = dir.to_path_buf();
        config_tweak(&mut config);
        let llm: Arc<dyn CompletionClient> = Arc::new(MockClient::new(responses));
        IngestionScheduler::new(
            session,
            vec![Arc::new(StubSource { fail_search })],
            config,
            llm,
            EventEmitter::disabled(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_iteration_processes_refs_and_saves() {
        let dir = tempdir().unwrap();
        let mut scheduler = scheduler_with(dir.path(), vec![extraction_response(0.9, true)], false, |_| {});
        scheduler
            .session
            .task_queue
            .push(SearchTask::search("stub", "all", "widget tools problems"));

        scheduler.run_iteration().await.unwrap();

        assert_eq!(scheduler.session.stats.docs_collected, 1);
        assert_eq!(scheduler.session.stats.snippets_extracted, 1);
        assert_eq!(scheduler.session.stats.tasks_completed, 1);
        assert_eq!(scheduler.storage.document_count().unwrap(), 1);
        assert_eq!(scheduler.storage.snippet_count().unwrap(), 1);
        assert_eq!(scheduler.entity_counts["Acme"], 1);
        // Entity follow-up task queued
        assert!(scheduler.task_exists("Acme problems"));
    }

    #[tokio::test]
    async fn test_revisited_ref_is_noop() {
        let dir = tempdir().unwrap();
        let mut scheduler = scheduler_with(
            dir.path(),
            vec![extraction_response(0.9, true), extraction_response(0.9, true)],
            false,
            |_| {},
        );
        let task = SearchTask::search("stub", "all", "widget tools");
        let document_ref = DocumentRef {
            ref_id: "ref-1".to_string(),
            ref_type: "post".to_string(),
            source: "stub".to_string(),
            source_entity: "all".to_string(),
            discovered_from_task_id: task.task_id.clone(),
            rank: 0,
            preview: None,
        };

        scheduler.process_ref(&task, &document_ref).await.unwrap();
        scheduler.process_ref(&task, &document_ref).await.unwrap();
        assert_eq!(scheduler.session.stats.docs_collected, 1);
    }

    #[tokio::test]
    async fn test_failed_searches_trip_breaker_and_requeue() {
        let dir = tempdir().unwrap();
        let mut scheduler = scheduler_with(dir.path(), vec![], true, |c| {
            c.breaker_failure_threshold = 2;
        });

        // Two failing iterations open the breaker
        for i in 0..2 {
            scheduler
                .session
                .task_queue
                .push(SearchTask::search("stub", "all", format!("q{i}")));
            scheduler.run_iteration().await.unwrap();
        }
        assert_eq!(scheduler.breakers["stub"].state(), "open");

        // Next iteration requeues instead of dispatching
        scheduler
            .session
            .task_queue
            .push(SearchTask::search("stub", "all", "q3"));
        let before = scheduler.session.stats.tasks_completed;
        scheduler.run_iteration().await.unwrap();
        assert_eq!(scheduler.session.stats.tasks_completed, before);
        assert!(!scheduler.session.task_queue.is_empty());
    }

    #[tokio::test]
    async fn test_stop_on_empty_queue() {
        let dir = tempdir().unwrap();
        let mut scheduler = scheduler_with(dir.path(), vec![], false, |_| {});
        assert!(!scheduler.should_continue().unwrap());

        let events = std::fs::read_to_string(scheduler.storage.session_dir().join("events.jsonl")).unwrap();
        assert!(events.contains("Task queue empty"));
    }

    #[tokio::test]
    async fn test_saturation_stop() {
        let dir = tempdir().unwrap();
        let mut scheduler = scheduler_with(dir.path(), vec![], false, |c| {
            c.saturation_window = 5;
            c.saturation_threshold = 0.2;
            c.saturation_min_entities = 3;
            c.saturation_signal_diversity_threshold = 0.1;
        });
        scheduler.session.task_queue.push(SearchTask::search("stub", "all", "q"));

        // Below-threshold novelty with broad enough coverage
        for i in 0..5 {
            scheduler.record_extraction_observation(0.1, false);
            scheduler.entity_counts.insert(format!("entity{i}"), 1);
        }
        scheduler.signal_type_counts.insert("complaint".to_string(), 3);

        assert!(!scheduler.should_continue().unwrap());
        let events = std::fs::read_to_string(scheduler.storage.session_dir().join("events.jsonl")).unwrap();
        assert!(events.contains("Saturation detected"));
    }

    #[tokio::test]
    async fn test_saturation_requires_full_window() {
        let dir = tempdir().unwrap();
        let mut scheduler = scheduler_with(dir.path(), vec![], false, |c| {
            c.saturation_window = 5;
            c.saturation_threshold = 0.2;
            c.saturation_min_entities = 0;
            c.saturation_signal_diversity_threshold = 0.0;
        });
        scheduler.session.task_queue.push(SearchTask::search("stub", "all", "q"));

        for _ in 0..4 {
            scheduler.record_extraction_observation(0.1, false);
        }
        scheduler.signal_type_counts.insert("complaint".to_string(), 1);
        assert!(scheduler.should_continue().unwrap());
    }

    #[tokio::test]
    async fn test_all_empty_extractions_saturate() {
        let dir = tempdir().unwrap();
        let mut scheduler = scheduler_with(dir.path(), vec![], false, |c| {
            c.saturation_window = 3;
            c.saturation_empty_extractions_limit = 3;
            // High threshold would otherwise keep it running
            c.saturation_threshold = 0.0;
        });
        scheduler.session.task_queue.push(SearchTask::search("stub", "all", "q"));

        for _ in 0..3 {
            scheduler.record_extraction_observation(0.9, true);
        }
        assert!(!scheduler.should_continue().unwrap());
    }

    #[tokio::test]
    async fn test_pick_tasks_prefers_high_yield_queries() {
        let dir = tempdir().unwrap();
        let mut scheduler = scheduler_with(dir.path(), vec![], false, |_| {});

        let rich = SearchTask::search("stub", "all", "rich query");
        let poor = SearchTask::search("stub", "all", "poor query");
        scheduler.query_stats.insert(
            "rich query".to_string(),
            QueryYield { docs: 2, snippets: 6 },
        );
        scheduler.query_stats.insert("poor query".to_string(), QueryYield { docs: 5, snippets: 0 });
        scheduler.session.task_queue = vec![poor.clone(), rich.clone()];

        let picked = scheduler.pick_tasks(1);
        assert_eq!(picked[0].task_id, rich.task_id);
        assert_eq!(scheduler.session.task_queue.len(), 1);
    }

    #[tokio::test]
    async fn test_continuation_task_enqueued_from_cursor() {
        struct PagedSource;

        #[async_trait]
        impl Source for PagedSource {
            fn name(&self) -> &str {
                "paged"
            }
            async fn adapt_queries(&self, _q: &[String], _t: &str) -> Result<Vec<SearchTask>, SourceError> {
                Ok(Vec::new())
            }
            async fn discover(&self, _t: &str, _l: usize) -> Result<Vec<SourceEntity>, SourceError> {
                Ok(Vec::new())
            }
            async fn search(&self, _task: &SearchTask) -> Result<Page<DocumentRef>, SourceError> {
                Ok(Page {
                    items: Vec::new(),
                    next_cursor: Some("cursor-2".to_string()),
                    exhausted: false,
                    estimated_total: None,
                })
            }
            async fn fetch(&self, _r: &DocumentRef, _d: DeepComments) -> Result<RawDocument, SourceError> {
                Err(SourceError::Other("no docs".to_string()))
            }
        }

        let dir = tempdir().unwrap();
        let mut session = SessionState::new("topic", 60);
        session.complexity = Some("medium".to_string());
        let mut config = IngestConfig::default();
        config.data_dir = dir.path().to_path_buf();
        let mut scheduler = IngestionScheduler::new(
            session,
            vec![Arc::new(PagedSource)],
            config,
            Arc::new(MockClient::new(vec![])),
            EventEmitter::disabled(),
        )
        .unwrap();

        scheduler.session.task_queue.push(SearchTask::search("paged", "all", "q"));
        scheduler.run_iteration().await.unwrap();

        assert_eq!(scheduler.session.task_queue.len(), 1);
        assert_eq!(scheduler.session.task_queue[0].cursor.as_deref(), Some("cursor-2"));
        assert_eq!(scheduler.session.task_queue[0].query.as_deref(), Some("q"));
    }

    #[tokio::test]
    async fn test_seed_tasks_generates_and_adapts() {
        let dir = tempdir().unwrap();
        let mut scheduler = scheduler_with(dir.path(), vec![], false, |_| {});
        scheduler.seed_tasks().await.unwrap();

        assert!(scheduler.session.task_queue.len() >= 10);
        let queries: Vec<String> = scheduler
            .session
            .task_queue
            .iter()
            .filter_map(|t| t.query.clone())
            .collect();
        assert!(queries.contains(&"widget tools problems".to_string()));
        assert!(queries.contains(&"why is widget tools so hard".to_string()));
    }
}
