//! ParallelWorkerRunner - bounded fan-out with traces and evidence
//!
//! Tasks run on a semaphore-bounded task set under one overall wall-clock
//! timeout. Each completed task's trace is summarized into structured
//! web-search/web-extract call summaries and evidence records; workers that
//! skipped `web_extract` while deep-read budget remained get a
//! deterministic top-up so successful deep-read workers always carry
//! evidence.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::tools::WORKER_SAFE_TOOLS;

use super::runner::{ResultCallback, WorkerPool};
use super::subagent::{SubagentRunner, SubagentTask};
use super::trace::{SourceMeta, SubagentTrace, ToolCallRecord};

/// Excerpt budget for evidence records
const EVIDENCE_EXCERPT_CHARS: usize = 1500;

/// Lowercased host of a URL, empty when unparseable
pub fn domain_for(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_default()
}

/// A deep-research sub-task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerTask {
    pub id: String,
    pub prompt: String,
    #[serde(default)]
    pub agent_name: Option<String>,
    pub max_iterations: u32,
    /// Per-task cap overrides; `None` falls back to the spawn options
    #[serde(default)]
    pub max_web_search_calls: Option<u32>,
    #[serde(default)]
    pub max_web_extract_calls: Option<u32>,
}

impl WorkerTask {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            agent_name: None,
            max_iterations,
            max_web_search_calls: None,
            max_web_extract_calls: None,
        }
    }
}

/// One search-result hit kept in the web-search trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// Structured summary of one `web_search` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchCallSummary {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,
    #[serde(default)]
    pub result_count: u64,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub results: Vec<SearchHit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Structured summary of one `web_extract` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebExtractCallSummary {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub raw_len: u64,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Extracted-page payload usable for quote-grounded claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub url: String,
    pub title: String,
    /// First part of the extracted content, bounded for prompts
    pub excerpt: String,
    pub sha256: String,
    pub raw_len: u64,
    pub truncated: bool,
}

/// Result of one worker task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub task_id: String,
    #[serde(default)]
    pub output: String,
    /// Ordered-unique citation URLs
    #[serde(default)]
    pub citations: Vec<String>,
    #[serde(default)]
    pub sources: std::collections::BTreeMap<String, SourceMeta>,
    #[serde(default)]
    pub web_search_calls: u32,
    #[serde(default)]
    pub web_search_trace: Vec<WebSearchCallSummary>,
    #[serde(default)]
    pub web_extract_calls: u32,
    #[serde(default)]
    pub web_extract_trace: Vec<WebExtractCallSummary>,
    #[serde(default)]
    pub evidence: Vec<EvidenceRecord>,
    #[serde(default)]
    pub iterations: u32,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl WorkerResult {
    /// Unsuccessful result carrying only an error
    pub fn failed(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            output: String::new(),
            citations: Vec::new(),
            sources: Default::default(),
            web_search_calls: 0,
            web_search_trace: Vec::new(),
            web_extract_calls: 0,
            web_extract_trace: Vec::new(),
            evidence: Vec::new(),
            iterations: 0,
            duration_ms: None,
            success: false,
            error: Some(error.into()),
        }
    }

    /// Unique domains across this result's citations
    pub fn domains(&self) -> BTreeSet<String> {
        self.citations
            .iter()
            .map(|u| domain_for(u))
            .filter(|d| !d.is_empty())
            .collect()
    }
}

/// Knobs for one fan-out
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub max_workers: usize,
    pub timeout: Duration,
    /// `false` restricts workers to the read-only tool set
    pub allow_writes: bool,
    pub max_web_search_calls: Option<u32>,
    pub max_web_extract_calls: Option<u32>,
    pub extract_max_chars: usize,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            max_workers: 5,
            timeout: Duration::from_secs(60),
            allow_writes: false,
            max_web_search_calls: None,
            max_web_extract_calls: None,
            extract_max_chars: 20_000,
        }
    }
}

/// Bounded-concurrency fan-out over a [`SubagentRunner`]
pub struct ParallelWorkerRunner {
    runner: Arc<SubagentRunner>,
}

impl ParallelWorkerRunner {
    pub fn new(runner: Arc<SubagentRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl WorkerPool for ParallelWorkerRunner {
    async fn spawn_parallel(
        &self,
        tasks: &[WorkerTask],
        opts: &SpawnOptions,
        on_result: Option<ResultCallback<'_>>,
    ) -> Vec<WorkerResult> {
        if tasks.is_empty() {
            return Vec::new();
        }
        debug!(task_count = tasks.len(), max_workers = opts.max_workers, "spawn_parallel: called");

        let semaphore = Arc::new(Semaphore::new(opts.max_workers.max(1)));
        let mut join_set = JoinSet::new();
        for task in tasks.iter().cloned() {
            let runner = self.runner.clone();
            let semaphore = semaphore.clone();
            let opts = opts.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                run_worker(runner, task, &opts).await
            });
        }

        let deadline = Instant::now() + opts.timeout;
        let mut results: Vec<WorkerResult> = Vec::new();
        let mut timed_out = false;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, join_set.join_next()).await {
                Ok(Some(Ok(result))) => {
                    if let Some(cb) = on_result {
                        cb(&result);
                    }
                    results.push(result);
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "spawn_parallel: worker task join error");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("spawn_parallel: overall timeout, abandoning in-flight tasks");
                    join_set.abort_all();
                    timed_out = true;
                    break;
                }
            }
        }

        // Synthesize failures for tasks that never produced a result
        let have: BTreeSet<&str> = results.iter().map(|r| r.task_id.as_str()).collect();
        let missing: Vec<&WorkerTask> = tasks.iter().filter(|t| !have.contains(t.id.as_str())).collect();
        for task in missing {
            let error = if timed_out { "Overall timeout" } else { "Worker task aborted" };
            let result = WorkerResult::failed(&task.id, error);
            if let Some(cb) = on_result {
                cb(&result);
            }
            results.push(result);
        }

        results
    }
}

async fn run_worker(runner: Arc<SubagentRunner>, task: WorkerTask, opts: &SpawnOptions) -> WorkerResult {
    let started = Instant::now();

    let allowed_tools = if opts.allow_writes {
        None
    } else {
        Some(WORKER_SAFE_TOOLS.iter().map(|s| s.to_string()).collect())
    };

    let subagent_task = SubagentTask {
        prompt: task.prompt.clone(),
        agent_name: task.agent_name.clone(),
        max_iterations: task.max_iterations,
        allowed_tools,
        max_web_search_calls: task.max_web_search_calls.or(opts.max_web_search_calls),
        max_web_extract_calls: task.max_web_extract_calls.or(opts.max_web_extract_calls),
    };

    let (output, mut trace) = match runner.run_task_with_trace(&subagent_task).await {
        Ok(out) => out,
        Err(e) => {
            let mut failed = WorkerResult::failed(&task.id, e.to_string());
            failed.duration_ms = Some(started.elapsed().as_millis() as u64);
            return failed;
        }
    };

    // Deterministic evidence top-up: if deep read was budgeted but the
    // model never called web_extract, extract the best candidate URLs now.
    let extract_budget = subagent_task.max_web_extract_calls.unwrap_or(0);
    if extract_budget > 0 && trace.web_extract_calls == 0 {
        let candidates: Vec<String> = trace.citations.iter().cloned().collect();
        let selected = select_urls_for_extract(&candidates, &trace, extract_budget as usize);
        debug!(task_id = %task.id, count = selected.len(), "run_worker: evidence top-up");
        for url in selected {
            let args = json!({ "url": url, "max_chars": opts.extract_max_chars });
            let result = runner.registry().execute("web_extract", args.clone()).await;
            trace.web_extract_calls += 1;
            trace.absorb_web_extract_result(&result);
            trace.tool_calls.push(ToolCallRecord {
                tool_name: "web_extract".to_string(),
                args,
                result,
                duration_ms: None,
            });
        }
    }

    let web_search_trace = summarize_web_search_calls(&trace.tool_calls);
    let (web_extract_trace, evidence) = summarize_web_extract_calls(&trace.tool_calls);

    WorkerResult {
        task_id: task.id,
        output,
        citations: trace.citations.iter().cloned().collect(),
        sources: trace.sources.clone(),
        web_search_calls: trace.web_search_calls,
        web_search_trace,
        web_extract_calls: trace.web_extract_calls,
        web_extract_trace,
        evidence,
        iterations: trace.iterations,
        duration_ms: Some(started.elapsed().as_millis() as u64),
        success: true,
        error: None,
    }
}

/// Pick up to `max_urls` candidates for the evidence top-up.
///
/// URLs that already carry title/snippet metadata come first; duplicates by
/// URL or domain are skipped (one page per domain).
fn select_urls_for_extract(candidates: &[String], trace: &SubagentTrace, max_urls: usize) -> Vec<String> {
    if max_urls == 0 {
        return Vec::new();
    }

    let mut ordered: Vec<String> = Vec::new();
    let mut seen_url = BTreeSet::new();
    let mut seen_domain = BTreeSet::new();

    let prioritized = candidates
        .iter()
        .filter(|u| trace.sources.contains_key(*u))
        .chain(candidates.iter().filter(|u| !trace.sources.contains_key(*u)));

    for url in prioritized {
        if !url.starts_with("http") || seen_url.contains(url) {
            continue;
        }
        let domain = domain_for(url);
        if !domain.is_empty() && seen_domain.contains(&domain) {
            continue;
        }
        ordered.push(url.clone());
        seen_url.insert(url.clone());
        if !domain.is_empty() {
            seen_domain.insert(domain);
        }
        if ordered.len() >= max_urls {
            break;
        }
    }
    ordered
}

fn summarize_web_search_calls(tool_calls: &[ToolCallRecord]) -> Vec<WebSearchCallSummary> {
    let mut out = Vec::new();
    for rec in tool_calls {
        if rec.tool_name != "web_search" {
            continue;
        }
        if rec.result["success"] != Value::Bool(true) {
            out.push(WebSearchCallSummary {
                success: false,
                query: None,
                page: None,
                page_size: None,
                has_more: None,
                result_count: 0,
                urls: Vec::new(),
                results: Vec::new(),
                error: rec.result["error"].as_str().map(String::from),
                duration_ms: rec.duration_ms,
            });
            continue;
        }
        let payload = &rec.result["result"];
        let items = payload["results"].as_array().cloned().unwrap_or_default();
        let mut urls = Vec::new();
        let mut hits = Vec::new();
        for item in &items {
            let Some(url) = item["url"].as_str() else { continue };
            if !url.starts_with("http") {
                continue;
            }
            urls.push(url.to_string());
            hits.push(SearchHit {
                url: url.to_string(),
                title: item["title"].as_str().map(str::trim).filter(|s| !s.is_empty()).map(String::from),
                score: item["score"].as_f64(),
                snippet: item["content"]
                    .as_str()
                    .or_else(|| item["snippet"].as_str())
                    .or_else(|| item["description"].as_str())
                    .map(|s| {
                        let trimmed = s.trim();
                        trimmed.chars().take(500).collect::<String>()
                    })
                    .filter(|s| !s.is_empty()),
            });
        }
        out.push(WebSearchCallSummary {
            success: true,
            query: payload["query"].as_str().map(String::from),
            page: payload["page"].as_u64(),
            page_size: payload["page_size"].as_u64(),
            has_more: payload["has_more"].as_bool(),
            result_count: items.len() as u64,
            urls,
            results: hits,
            error: None,
            duration_ms: rec.duration_ms,
        });
    }
    out
}

fn summarize_web_extract_calls(tool_calls: &[ToolCallRecord]) -> (Vec<WebExtractCallSummary>, Vec<EvidenceRecord>) {
    let mut trace = Vec::new();
    let mut evidence = Vec::new();
    for rec in tool_calls {
        if rec.tool_name != "web_extract" {
            continue;
        }
        let requested_url = rec.args["url"].as_str().map(String::from);
        if rec.result["success"] != Value::Bool(true) {
            trace.push(WebExtractCallSummary {
                success: false,
                url: requested_url,
                raw_len: 0,
                truncated: false,
                error: rec.result["error"].as_str().map(String::from),
                duration_ms: rec.duration_ms,
            });
            continue;
        }
        let payload = &rec.result["result"];
        let Some(url) = payload["url"].as_str().map(String::from).or(requested_url) else {
            continue;
        };
        let raw = payload["raw_content"].as_str().unwrap_or("");
        let raw_len = payload["raw_len"].as_u64().unwrap_or(0);
        let truncated = payload["truncated"].as_bool().unwrap_or(false);

        evidence.push(EvidenceRecord {
            url: url.clone(),
            title: payload["title"].as_str().unwrap_or("").trim().to_string(),
            excerpt: raw.chars().take(EVIDENCE_EXCERPT_CHARS).collect(),
            sha256: payload["sha256"].as_str().unwrap_or("").to_string(),
            raw_len,
            truncated,
        });
        trace.push(WebExtractCallSummary {
            success: true,
            url: Some(url),
            raw_len,
            truncated,
            error: None,
            duration_ms: rec.duration_ms,
        });
    }
    (trace, evidence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockClient;
    use crate::llm::{CompletionClient, CompletionResponse, StopReason, TokenUsage, ToolCall};
    use crate::tools::{Tool, ToolContext, ToolRegistry};
    use serde_json::json;

    struct FakeSearchTool;

    #[async_trait]
    impl Tool for FakeSearchTool {
        fn name(&self) -> &'static str {
            "web_search"
        }
        fn description(&self) -> &'static str {
            "fake"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _input: Value, _ctx: &ToolContext) -> eyre::Result<Value> {
            Ok(json!({
                "query": "q", "page": 1, "page_size": 5, "has_more": false,
                "results": [
                    {"url": "https://a.com/1", "title": "A", "score": 0.9, "content": "alpha"},
                    {"url": "https://b.com/2", "title": "B", "score": 0.5, "content": "beta"}
                ]
            }))
        }
    }

    struct FakeExtractTool;

    #[async_trait]
    impl Tool for FakeExtractTool {
        fn name(&self) -> &'static str {
            "web_extract"
        }
        fn description(&self) -> &'static str {
            "fake"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, input: Value, _ctx: &ToolContext) -> eyre::Result<Value> {
            let url = input["url"].as_str().unwrap_or("");
            Ok(json!({
                "url": url,
                "title": "Page",
                "raw_content": "extracted page body",
                "raw_len": 19,
                "truncated": false,
                "sha256": "deadbeef",
            }))
        }
    }

    fn pool_with(responses: Vec<CompletionResponse>) -> ParallelWorkerRunner {
        let mut registry = ToolRegistry::new(".");
        registry.register(Box::new(FakeSearchTool));
        registry.register(Box::new(FakeExtractTool));
        let client: Arc<dyn CompletionClient> = Arc::new(MockClient::new(responses));
        ParallelWorkerRunner::new(Arc::new(SubagentRunner::new(client, Arc::new(registry))))
    }

    fn search_then_note() -> Vec<CompletionResponse> {
        vec![
            CompletionResponse {
                content: None,
                tool_calls: vec![ToolCall {
                    id: "c1".to_string(),
                    name: "web_search".to_string(),
                    input: json!({"query": "q"}),
                }],
                stop_reason: StopReason::ToolUse,
                usage: TokenUsage::default(),
            },
            CompletionResponse::text("note with findings"),
        ]
    }

    #[tokio::test]
    async fn test_spawn_parallel_summarizes_traces() {
        let pool = pool_with(search_then_note());
        let tasks = vec![WorkerTask::new("t1", "find things", 4)];
        let opts = SpawnOptions::default();

        let results = pool.spawn_parallel(&tasks, &opts, None).await;
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert!(r.success);
        assert_eq!(r.output, "note with findings");
        assert_eq!(r.citations, vec!["https://a.com/1", "https://b.com/2"]);
        assert_eq!(r.web_search_trace.len(), 1);
        assert_eq!(r.web_search_trace[0].result_count, 2);
        assert_eq!(r.web_search_trace[0].results[0].score, Some(0.9));
        assert_eq!(r.domains().len(), 2);
    }

    #[tokio::test]
    async fn test_evidence_top_up_when_model_skipped_extract() {
        let pool = pool_with(search_then_note());
        let tasks = vec![WorkerTask::new("t1", "deep read", 4)];
        let opts = SpawnOptions {
            max_web_extract_calls: Some(2),
            ..Default::default()
        };

        let results = pool.spawn_parallel(&tasks, &opts, None).await;
        let r = &results[0];
        assert!(r.success);
        // One page per domain, capped by budget
        assert_eq!(r.web_extract_calls, 2);
        assert_eq!(r.evidence.len(), 2);
        assert_eq!(r.evidence[0].excerpt, "extracted page body");
        assert!(r.evidence.iter().any(|e| e.url == "https://a.com/1"));
    }

    #[tokio::test]
    async fn test_worker_error_becomes_failed_result() {
        // No scripted responses: the mock errors immediately.
        let pool = pool_with(vec![]);
        let tasks = vec![WorkerTask::new("t1", "doomed", 4)];

        let results = pool.spawn_parallel(&tasks, &SpawnOptions::default(), None).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(results[0].error.is_some());
    }

    #[tokio::test]
    async fn test_on_result_called_per_task() {
        let pool = pool_with(search_then_note());
        let tasks = vec![WorkerTask::new("t1", "find", 4)];
        let seen = std::sync::Mutex::new(Vec::new());
        let cb = |r: &WorkerResult| seen.lock().unwrap().push(r.task_id.clone());

        pool.spawn_parallel(&tasks, &SpawnOptions::default(), Some(&cb)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["t1".to_string()]);
    }

    #[test]
    fn test_select_urls_prefers_sourced_and_dedupes_domains() {
        let mut trace = SubagentTrace::default();
        trace.sources.insert("https://b.com/meta".to_string(), SourceMeta::default());
        let candidates = vec![
            "https://a.com/1".to_string(),
            "https://a.com/2".to_string(),
            "https://b.com/meta".to_string(),
        ];

        let selected = select_urls_for_extract(&candidates, &trace, 5);
        // Sourced URL first, then one per remaining domain
        assert_eq!(selected[0], "https://b.com/meta");
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_domain_for() {
        assert_eq!(domain_for("https://Example.COM/path"), "example.com");
        assert_eq!(domain_for("not a url"), "");
    }
}
