//! End-to-end ingestion run with a stub source and scripted extractor

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use prospectd::config::IngestConfig;
use prospectd::events::EventEmitter;
use prospectd::ingest::{DeepComments, IngestionScheduler, Source, SourceError};
use prospectd::llm::{
    CompletionClient, CompletionRequest, CompletionResponse, LlmError, StopReason, StreamChunk, TokenUsage,
};
use signalstore::{DocumentRef, Page, RawDocument, SearchTask, SessionState, SourceEntity, utc_now};

struct ScriptedClient {
    responses: Mutex<Vec<String>>,
}

impl ScriptedClient {
    fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().rev().collect()),
        }
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        match self.responses.lock().unwrap().pop() {
            Some(content) => Ok(CompletionResponse {
                content: Some(content),
                tool_calls: vec![],
                stop_reason: StopReason::EndTurn,
                usage: TokenUsage {
                    input_tokens: 100,
                    output_tokens: 50,
                },
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

/// One ref per search task, one document per ref
struct ForumSource;

#[async_trait]
impl Source for ForumSource {
    fn name(&self) -> &str {
        "forum"
    }

    async fn adapt_queries(&self, queries: &[String], _topic: &str) -> Result<Vec<SearchTask>, SourceError> {
        Ok(queries
            .iter()
            .map(|q| SearchTask::search("forum", "all", q.clone()))
            .collect())
    }

    async fn discover(&self, _topic: &str, _limit: usize) -> Result<Vec<SourceEntity>, SourceError> {
        Ok(Vec::new())
    }

    async fn search(&self, task: &SearchTask) -> Result<Page<DocumentRef>, SourceError> {
        Ok(Page {
            items: vec![DocumentRef {
                ref_id: format!("ref-{}", task.task_id),
                ref_type: "thread".to_string(),
                source: "forum".to_string(),
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

    async fn fetch(&self, r: &DocumentRef, _deep: DeepComments) -> Result<RawDocument, SourceError> {
        Ok(RawDocument {
            doc_id: r.ref_id.clone(),
            source: "forum".to_string(),
            source_entity: "all".to_string(),
            url: format!("https://forum.example/{}", r.ref_id),
            permalink: format!("https://forum.example/{}", r.ref_id),
            retrieved_at: utc_now(),
            published_at: None,
            title: "Thread about breakage".to_string(),
            raw_text: "The sync feature fails every night and nobody from support replies. ".repeat(4),
            author: Some("bob".to_string()),
            score: Some(40),
            num_comments: Some(12),
            metadata: Default::default(),
        })
    }
}

fn extraction_payload(novelty: f64) -> String {
    serde_json::json!({
        "snippets": [{
            "excerpt": "The sync feature fails every night",
            "pain_statement": "Nightly sync fails without support response",
            "signal_type": "bug",
            "intensity": 4,
            "confidence": 0.9,
            "entities": ["SyncCo"],
        }],
        "entities": ["SyncCo"],
        "follow_up_queries": [],
        "novelty": novelty,
    })
    .to_string()
}

#[tokio::test]
async fn test_full_ingestion_run_stops_at_document_cap() {
    let dir = tempfile::tempdir().unwrap();

    let mut session = SessionState::new("sync tools", 60);
    session.complexity = Some("medium".to_string());

    let mut config = IngestConfig::default();
    config.data_dir = dir.path().to_path_buf();
    config.parallel_workers = 2;
    config.max_documents = 3;

    // One extraction response per fetched document
    let llm = Arc::new(ScriptedClient::new(vec![
        extraction_payload(0.9),
        extraction_payload(0.8),
        extraction_payload(0.7),
        extraction_payload(0.6),
    ]));

    let mut scheduler = IngestionScheduler::new(
        session,
        vec![Arc::new(ForumSource)],
        config,
        llm,
        EventEmitter::disabled(),
    )
    .unwrap();

    scheduler.run().await.unwrap();

    let session = scheduler.session();
    assert_eq!(session.status, signalstore::SessionStatus::Completed);
    assert!(session.stats.docs_collected >= 3);
    assert!(session.stats.snippets_extracted >= 3);
    assert!(session.stats.iterations >= 1);
    assert!(session.stats.total_tokens > 0);

    // Storage matches the stats
    assert_eq!(scheduler.storage().document_count().unwrap() as u64, session.stats.docs_collected);
    assert_eq!(scheduler.storage().snippet_count().unwrap() as u64, session.stats.snippets_extracted);

    // The events stream ends with the stop decision
    let events = std::fs::read_to_string(scheduler.storage().session_dir().join("events.jsonl")).unwrap();
    assert!(events.contains("tasks_seeded"));
    assert!(events.contains("iteration_started"));
    assert!(events.contains("extraction_done"));
    assert!(events.contains("Max documents reached"));

    // The snapshot on disk round-trips the same state
    let state_path = dir.path().join(&session.session_id).join("state.json");
    let loaded: SessionState = serde_json::from_str(&std::fs::read_to_string(state_path).unwrap()).unwrap();
    assert_eq!(loaded.stats.docs_collected, session.stats.docs_collected);
    assert_eq!(loaded.status, signalstore::SessionStatus::Completed);
}
