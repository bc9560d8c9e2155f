//! End-to-end deep-research scenarios with a scripted LLM and worker pool

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use prospectd::agent::{ResultCallback, SpawnOptions, WorkerPool, WorkerResult, WorkerTask};
use prospectd::events::EventEmitter;
use prospectd::llm::{
    CompletionClient, CompletionRequest, CompletionResponse, LlmError, StopReason, StreamChunk, TokenUsage,
};
use prospectd::research::{DeepResearch, ResearchConfig, ResearchError, ResearchStrategy};

/// Scripted completion client: returns canned responses in call order
struct ScriptedClient {
    responses: Mutex<Vec<String>>,
}

impl ScriptedClient {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
        }
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let next = self.responses.lock().unwrap().pop();
        match next {
            Some(content) => Ok(CompletionResponse {
                content: Some(content),
                tool_calls: vec![],
                stop_reason: StopReason::EndTurn,
                usage: TokenUsage::default(),
            }),
            None => Err(LlmError::InvalidResponse("script exhausted".to_string())),
        }
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        _chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError> {
        self.complete(request).await
    }
}

/// Pool that fabricates one successful result per task, with a citation
/// URL derived from the task id
struct StubPool {
    fail_all: bool,
}

#[async_trait]
impl WorkerPool for StubPool {
    async fn spawn_parallel(
        &self,
        tasks: &[WorkerTask],
        _opts: &SpawnOptions,
        on_result: Option<ResultCallback<'_>>,
    ) -> Vec<WorkerResult> {
        tasks
            .iter()
            .map(|task| {
                let result = if self.fail_all {
                    WorkerResult::failed(&task.id, "stubbed failure")
                } else {
                    let mut r = WorkerResult::failed(&task.id, "");
                    r.success = true;
                    r.error = None;
                    r.output = format!("notes for {}", task.id);
                    r.citations = vec![format!("https://example.com/{}", task.id)];
                    r.web_search_calls = 1;
                    r.iterations = 1;
                    r.duration_ms = Some(5);
                    r
                };
                if let Some(cb) = on_result {
                    cb(&result);
                }
                result
            })
            .collect()
    }
}

fn narrative_payload(citation: &str) -> String {
    serde_json::json!({
        "title": "REPORT",
        "summary_bullets": ["a"],
        "findings": [{"claim": "c", "citations": [citation]}],
        "open_questions": [],
    })
    .to_string()
}

#[tokio::test]
async fn test_fallback_plan_produces_narrative_report() {
    // Planner returns prose; best-effort falls back to {overview,
    // comparison, recent}; the synthesizer grounds one claim.
    let payload = narrative_payload("https://example.com/overview");
    let llm = Arc::new(ScriptedClient::new(vec!["this is not a plan", &payload, &payload]));
    let config = ResearchConfig {
        best_effort: true,
        ..Default::default()
    };

    let research = DeepResearch::new(llm, Arc::new(StubPool { fail_all: false }), config, EventEmitter::disabled());
    let outcome = research.run("query").await.unwrap();

    let task_ids: Vec<&str> = outcome.plan.tasks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(task_ids, vec!["overview", "comparison", "recent"]);
    assert!(outcome.planner_error.is_some());

    let report = &outcome.report_markdown;
    assert!(report.starts_with("# REPORT"), "report was: {report}");
    assert!(report.contains("## Sources"));
    assert!(report.contains("[1]"));
    assert!(report.contains("Why:"));
    assert_eq!(outcome.citations.len(), 3);
}

#[tokio::test]
async fn test_code_fenced_plan_is_accepted() {
    let plan = "```json\n{\"tasks\": [\
        {\"id\": \"a\", \"search_query\": \"q1\", \"instructions\": \"i1\"},\
        {\"id\": \"b\", \"search_query\": \"q2\", \"instructions\": \"i2\"},\
        {\"id\": \"c\", \"search_query\": \"q3\", \"instructions\": \"i3\"}\
    ]}\n```";
    let payload = narrative_payload("https://example.com/a");
    let llm = Arc::new(ScriptedClient::new(vec![plan, &payload, &payload]));
    let config = ResearchConfig {
        min_total_domains: 0,
        ..Default::default()
    };

    let research = DeepResearch::new(llm, Arc::new(StubPool { fail_all: false }), config, EventEmitter::disabled());
    let outcome = research.run("some question").await.unwrap();

    assert_eq!(outcome.plan.tasks[0].id, "a");
    assert_eq!(outcome.tasks.len(), 3);
    assert!(outcome.report_markdown.starts_with("# REPORT"));
}

#[tokio::test]
async fn test_grounding_violation_raises_synthesis_error() {
    // Synthesizer cites a URL outside the allowed set; the repair pass
    // still cites it; the run fails with stage "synthesize" and the
    // partial outcome attached.
    let plan = "{\"tasks\": [\
        {\"id\": \"a\", \"search_query\": \"q1\", \"instructions\": \"i1\"},\
        {\"id\": \"b\", \"search_query\": \"q2\", \"instructions\": \"i2\"},\
        {\"id\": \"c\", \"search_query\": \"q3\", \"instructions\": \"i3\"}\
    ]}";
    let bad_payload = narrative_payload("https://other.com/b");
    let llm = Arc::new(ScriptedClient::new(vec![plan, &bad_payload, &bad_payload]));
    let config = ResearchConfig {
        min_total_domains: 0,
        ..Default::default()
    };

    let research = DeepResearch::new(llm, Arc::new(StubPool { fail_all: false }), config, EventEmitter::disabled());
    let err = research.run("some question").await.unwrap_err();

    match err {
        ResearchError::Run(run_err) => {
            assert!(run_err.message.contains("not present in allowed sources"));
            assert_eq!(run_err.outcome.synthesis_stage.as_deref(), Some("synthesize"));
            assert_eq!(run_err.outcome.results.len(), 3);
            assert!(run_err.outcome.report_markdown.is_empty());
        }
        other => panic!("expected Run error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_all_workers_failing_is_fatal_with_diagnostics() {
    let plan = "{\"tasks\": [\
        {\"id\": \"a\", \"search_query\": \"q1\", \"instructions\": \"i1\"},\
        {\"id\": \"b\", \"search_query\": \"q2\", \"instructions\": \"i2\"},\
        {\"id\": \"c\", \"search_query\": \"q3\", \"instructions\": \"i3\"}\
    ]}";
    let llm = Arc::new(ScriptedClient::new(vec![plan]));
    let config = ResearchConfig::default();

    let research = DeepResearch::new(llm, Arc::new(StubPool { fail_all: true }), config, EventEmitter::disabled());
    let err = research.run("some question").await.unwrap_err();

    match err {
        ResearchError::Gate(message) => {
            assert!(message.contains("Diagnostics"));
            assert!(message.contains("success=false"));
        }
        other => panic!("expected Gate error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_draft_strategy_single_iteration() {
    // max_iterations=1 terminates after exactly one planner/worker pass
    let plan = "{\"tasks\": [\
        {\"id\": \"a\", \"search_query\": \"q1\", \"instructions\": \"i1\"},\
        {\"id\": \"b\", \"search_query\": \"q2\", \"instructions\": \"i2\"},\
        {\"id\": \"c\", \"search_query\": \"q3\", \"instructions\": \"i3\"}\
    ]}";
    let draft = "Draft text.\n\n## Still Missing\n- more sources";
    let payload = narrative_payload("https://example.com/a");
    let llm = Arc::new(ScriptedClient::new(vec![plan, draft, &payload, &payload]));
    let config = ResearchConfig {
        strategy: ResearchStrategy::DraftCentric,
        max_iterations: 1,
        min_total_domains: 0,
        ..Default::default()
    };

    let research = DeepResearch::new(llm, Arc::new(StubPool { fail_all: false }), config, EventEmitter::disabled());
    let outcome = research.run("some question").await.unwrap();

    assert_eq!(outcome.rounds.len(), 1);
    assert_eq!(outcome.stop_reason.as_deref(), Some("max_iterations"));
    assert_eq!(outcome.tasks.len(), 3);
    assert!(outcome.report_markdown.starts_with("# REPORT"));
}

#[tokio::test]
async fn test_worker_completed_events_fire_in_completion_order() {
    let plan = "{\"tasks\": [\
        {\"id\": \"a\", \"search_query\": \"q1\", \"instructions\": \"i1\"},\
        {\"id\": \"b\", \"search_query\": \"q2\", \"instructions\": \"i2\"},\
        {\"id\": \"c\", \"search_query\": \"q3\", \"instructions\": \"i3\"}\
    ]}";
    let payload = narrative_payload("https://example.com/a");
    let llm = Arc::new(ScriptedClient::new(vec![plan, &payload, &payload]));
    let config = ResearchConfig {
        min_total_domains: 0,
        ..Default::default()
    };

    let completed = Arc::new(Mutex::new(Vec::new()));
    let completed2 = completed.clone();
    let emitter = EventEmitter::new(move |event| {
        if let prospectd::events::AgentEvent::WorkerCompleted { task_id, success, .. } = event {
            completed2.lock().unwrap().push((task_id, success));
        }
    });

    let research = DeepResearch::new(llm, Arc::new(StubPool { fail_all: false }), config, emitter);
    research.run("some question").await.unwrap();

    let seen = completed.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|(_, success)| *success));
}
