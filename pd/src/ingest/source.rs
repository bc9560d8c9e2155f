//! Source capability - the contract connectors implement

use async_trait::async_trait;
use thiserror::Error;

use signalstore::{DocumentRef, Page, RawDocument, SearchTask, SourceEntity};

/// Errors raised by source connectors.
///
/// Counted against the source's circuit breaker and logged as
/// `task_failed` / `fetch_failed` events.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Source rate limited: {0}")]
    RateLimited(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

/// How aggressively `fetch` should pull comment threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeepComments {
    #[default]
    Auto,
    Always,
    Never,
}

/// A content source (news, discussion, catalog, issue tracker).
///
/// Implementations must tolerate concurrent `search`/`fetch` calls across
/// tasks; per-source rate limits and retries are their responsibility.
/// Cursors inside [`SearchTask`] are opaque to the scheduler.
#[async_trait]
pub trait Source: Send + Sync {
    /// Stable source name used for breakers and task routing
    fn name(&self) -> &str;

    /// Translate generic semantic queries into this source's search grammar
    async fn adapt_queries(&self, queries: &[String], topic: &str) -> Result<Vec<SearchTask>, SourceError>;

    /// Discover communities/entities relevant to a topic
    async fn discover(&self, topic: &str, limit: usize) -> Result<Vec<SourceEntity>, SourceError>;

    /// Run one search task, returning a page of document refs
    async fn search(&self, task: &SearchTask) -> Result<Page<DocumentRef>, SourceError>;

    /// Fetch the full document behind a ref
    async fn fetch(&self, document_ref: &DocumentRef, deep_comments: DeepComments) -> Result<RawDocument, SourceError>;
}
