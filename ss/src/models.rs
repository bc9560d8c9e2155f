//! Data model shared by the ingestion scheduler and storage
//!
//! These types are the durable vocabulary of a session: documents fetched
//! from sources, pain snippets extracted from them, the task queue, and the
//! session snapshot itself. Everything serializes to JSON for the snapshot
//! and the append-only streams.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Short random identifier (first 8 hex chars of a UUID v4)
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Current UTC timestamp
pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// A document fetched from a source. Immutable once saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDocument {
    pub doc_id: String,
    pub source: String,
    pub source_entity: String,
    pub url: String,
    pub permalink: String,
    pub retrieved_at: DateTime<Utc>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    pub title: String,
    pub raw_text: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub num_comments: Option<i64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Closed set of pain-signal labels. Anything else coerces to `complaint`.
pub const VALID_SIGNAL_TYPES: [&str; 9] = [
    "complaint",
    "wish",
    "workaround",
    "switch",
    "bug",
    "pricing",
    "support",
    "integration",
    "workflow",
];

/// A pain/opportunity observation extracted from one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PainSnippet {
    pub snippet_id: String,
    pub doc_id: String,
    pub excerpt: String,
    pub pain_statement: String,
    pub signal_type: String,
    /// Bounded to [1, 5]
    pub intensity: i64,
    /// Bounded to [0.0, 1.0]
    pub confidence: f64,
    /// Bounded to [0.0, 1.0]
    #[serde(default)]
    pub quality_score: f64,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub extractor_model: String,
    #[serde(default)]
    pub extractor_prompt_version: String,
    pub extracted_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// A unit of source-side work. Consumed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchTask {
    pub task_id: String,
    pub source: String,
    pub source_entity: String,
    /// `search` or `listing_<type>`
    pub mode: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub time_filter: Option<String>,
    /// Opaque continuation cursor, owned by the source
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default = "default_budget")]
    pub budget: u32,
    pub created_at: DateTime<Utc>,
}

fn default_budget() -> u32 {
    25
}

impl SearchTask {
    /// Build a search-mode task with a fresh id
    pub fn search(source: impl Into<String>, source_entity: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            task_id: generate_id(),
            source: source.into(),
            source_entity: source_entity.into(),
            mode: "search".to_string(),
            query: Some(query.into()),
            sort: None,
            time_filter: None,
            cursor: None,
            budget: default_budget(),
            created_at: utc_now(),
        }
    }

    /// Continuation of this task from an opaque cursor returned by the source
    pub fn continuation(&self, cursor: String) -> Self {
        Self {
            task_id: generate_id(),
            source: self.source.clone(),
            source_entity: self.source_entity.clone(),
            mode: self.mode.clone(),
            query: self.query.clone(),
            sort: self.sort.clone(),
            time_filter: self.time_filter.clone(),
            cursor: Some(cursor),
            budget: self.budget,
            created_at: utc_now(),
        }
    }
}

/// Lightweight discovery record pointing at a future document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRef {
    /// Used to de-duplicate before fetching
    pub ref_id: String,
    pub ref_type: String,
    pub source: String,
    pub source_entity: String,
    pub discovered_from_task_id: String,
    #[serde(default)]
    pub rank: u32,
    #[serde(default)]
    pub preview: Option<String>,
}

/// One page of results from a source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub exhausted: bool,
    #[serde(default)]
    pub estimated_total: Option<u64>,
}

impl<T> Page<T> {
    /// An empty, exhausted page (used when a task fails)
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            exhausted: true,
            estimated_total: None,
        }
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            exhausted: false,
            estimated_total: None,
        }
    }
}

/// A community/forum/tracker a source can be scoped to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntity {
    pub entity_id: String,
    pub source: String,
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subscriber_count: Option<u64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Output of one extraction pass over a document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    #[serde(default)]
    pub snippets: Vec<PainSnippet>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub follow_up_queries: Vec<String>,
    #[serde(default = "default_novelty")]
    pub novelty: f64,
    #[serde(default)]
    pub dropped_snippets: u32,
    #[serde(default)]
    pub error_kind: Option<String>,
}

fn default_novelty() -> f64 {
    0.5
}

/// Aggregate counters maintained by the scheduler
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionStats {
    pub docs_collected: u64,
    pub snippets_extracted: u64,
    pub tasks_completed: u64,
    pub tasks_remaining: u64,
    pub iterations: u64,
    pub avg_novelty: f64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub llm_calls: u64,
    pub extraction_calls: u64,
    pub complexity_calls: u64,
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
    Error,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Paused => write!(f, "paused"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Error => write!(f, "error"),
        }
    }
}

/// How many knowledge items the snapshot retains
pub const KNOWLEDGE_PERSIST_SIZE: usize = 100;

/// How many novelty observations the snapshot retains
pub const NOVELTY_HISTORY_SIZE: usize = 50;

/// The full scheduler snapshot, atomically persisted each iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub topic: String,
    pub status: SessionStatus,
    #[serde(default = "default_prompt_version")]
    pub extraction_prompt_version: String,
    #[serde(default)]
    pub task_queue: Vec<SearchTask>,
    #[serde(default)]
    pub visited_tasks: Vec<String>,
    #[serde(default)]
    pub visited_docs: Vec<String>,
    /// Rolling window of pain statements fed back into extraction prompts
    #[serde(default)]
    pub knowledge: Vec<String>,
    #[serde(default)]
    pub novelty_history: Vec<f64>,
    /// Per-source opaque cursors
    #[serde(default)]
    pub cursors: BTreeMap<String, String>,
    #[serde(default)]
    pub stats: SessionStats,
    #[serde(default)]
    pub complexity: Option<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_prompt_version() -> String {
    "v2".to_string()
}

fn default_max_iterations() -> u64 {
    60
}

impl SessionState {
    /// Fresh running session for a topic
    pub fn new(topic: impl Into<String>, max_iterations: u64) -> Self {
        let now = utc_now();
        Self {
            session_id: generate_id(),
            topic: topic.into(),
            status: SessionStatus::Running,
            extraction_prompt_version: default_prompt_version(),
            task_queue: Vec::new(),
            visited_tasks: Vec::new(),
            visited_docs: Vec::new(),
            knowledge: Vec::new(),
            novelty_history: Vec::new(),
            cursors: BTreeMap::new(),
            stats: SessionStats::default(),
            complexity: None,
            max_iterations,
            created_at: now,
            updated_at: now,
        }
    }

    /// Trim rolling windows to their persisted bounds
    pub fn apply_retention(&mut self) {
        if self.knowledge.len() > KNOWLEDGE_PERSIST_SIZE {
            let start = self.knowledge.len() - KNOWLEDGE_PERSIST_SIZE;
            self.knowledge.drain(..start);
        }
        if self.novelty_history.len() > NOVELTY_HISTORY_SIZE {
            let start = self.novelty_history.len() - NOVELTY_HISTORY_SIZE;
            self.novelty_history.drain(..start);
        }
    }
}

/// An append-only observation of scheduler activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub event_id: String,
    pub session_id: String,
    pub ts: DateTime<Utc>,
    pub kind: String,
    #[serde(default)]
    pub input: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub output: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub decision: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, serde_json::Value>,
}

impl SessionEvent {
    /// Event with the given kind and empty payloads
    pub fn new(session_id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            event_id: generate_id(),
            session_id: session_id.into(),
            ts: utc_now(),
            kind: kind.into(),
            input: BTreeMap::new(),
            output: BTreeMap::new(),
            decision: String::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_input(mut self, key: &str, value: serde_json::Value) -> Self {
        self.input.insert(key.to_string(), value);
        self
    }

    pub fn with_output(mut self, key: &str, value: serde_json::Value) -> Self {
        self.output.insert(key.to_string(), value);
        self
    }

    pub fn with_decision(mut self, decision: impl Into<String>) -> Self {
        self.decision = decision.into();
        self
    }

    pub fn with_metric(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metrics.insert(key.to_string(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_is_short_and_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_task_continuation_keeps_shape() {
        let task = SearchTask::search("news", "all", "widgets problems");
        let cont = task.continuation("cursor-2".to_string());

        assert_ne!(cont.task_id, task.task_id);
        assert_eq!(cont.source, "news");
        assert_eq!(cont.query.as_deref(), Some("widgets problems"));
        assert_eq!(cont.cursor.as_deref(), Some("cursor-2"));
        assert_eq!(cont.budget, task.budget);
    }

    #[test]
    fn test_session_retention_bounds() {
        let mut session = SessionState::new("topic", 60);
        session.knowledge = (0..250).map(|i| format!("k{i}")).collect();
        session.novelty_history = (0..90).map(|i| i as f64 / 100.0).collect();

        session.apply_retention();

        assert_eq!(session.knowledge.len(), KNOWLEDGE_PERSIST_SIZE);
        assert_eq!(session.knowledge.first().map(String::as_str), Some("k150"));
        assert_eq!(session.novelty_history.len(), NOVELTY_HISTORY_SIZE);
    }

    #[test]
    fn test_page_exhausted_invariant() {
        let page: Page<DocumentRef> = Page::empty();
        assert!(page.exhausted);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_session_state_round_trips_through_json() {
        let mut session = SessionState::new("crm tools", 30);
        session.task_queue.push(SearchTask::search("news", "all", "crm tools"));
        session.cursors.insert("news".to_string(), "abc".to_string());

        let json = serde_json::to_string(&session).unwrap();
        let parsed: SessionState = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.session_id, session.session_id);
        assert_eq!(parsed.task_queue.len(), 1);
        assert_eq!(parsed.status, SessionStatus::Running);
    }
}
