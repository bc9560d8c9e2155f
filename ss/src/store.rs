//! Relational store plus append-only JSONL streams
//!
//! One `Storage` handle per session. Writers serialize through the handle;
//! documents and snippets are shared-read after commit. Every relational
//! write also appends the record to the session's JSONL stream so the raw
//! history survives schema churn.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{PainSnippet, RawDocument, SessionEvent};

/// Errors raised by the relational store or the JSONL streams
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Stream append failed for {file}: {source}")]
    Append {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS documents (
    doc_id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    source_entity TEXT NOT NULL,
    url TEXT NOT NULL,
    permalink TEXT NOT NULL,
    retrieved_at TEXT NOT NULL,
    published_at TEXT,
    title TEXT NOT NULL,
    raw_text TEXT NOT NULL,
    author TEXT,
    score INTEGER,
    num_comments INTEGER,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS snippets (
    snippet_id TEXT PRIMARY KEY,
    doc_id TEXT NOT NULL REFERENCES documents(doc_id),
    excerpt TEXT NOT NULL,
    pain_statement TEXT NOT NULL,
    signal_type TEXT NOT NULL,
    intensity INTEGER NOT NULL,
    confidence REAL NOT NULL,
    quality_score REAL NOT NULL DEFAULT 0.0,
    entities TEXT NOT NULL DEFAULT '[]',
    extractor_model TEXT NOT NULL,
    extractor_prompt_version TEXT NOT NULL,
    extracted_at TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_snippets_doc_id ON snippets(doc_id);
CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source);
CREATE INDEX IF NOT EXISTS idx_snippets_signal_type ON snippets(signal_type);
";

/// Session-scoped storage handle
pub struct Storage {
    session_id: String,
    session_dir: PathBuf,
    conn: Connection,
}

impl Storage {
    /// Open (or create) the store for a session under `data_dir`
    pub fn open(session_id: &str, data_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let session_dir = data_dir.as_ref().join(session_id);
        fs::create_dir_all(&session_dir)?;
        debug!(?session_dir, "Storage::open: session directory ensured");

        let conn = Connection::open(session_dir.join("session.db"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let has_version: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type='table' AND name='schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        if has_version.is_none() {
            conn.execute_batch(SCHEMA)?;
            conn.execute("INSERT INTO schema_version (version) VALUES (?1)", params![SCHEMA_VERSION])?;
            info!(session_id, version = SCHEMA_VERSION, "Storage::open: database initialized");
        } else {
            let version: i64 = conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;
            if version != SCHEMA_VERSION {
                warn!(expected = SCHEMA_VERSION, got = version, "Storage::open: schema version mismatch");
            }
        }

        Ok(Self {
            session_id: session_id.to_string(),
            session_dir,
            conn,
        })
    }

    /// The session directory holding the database and JSONL streams
    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Persist a document and append it to `raw.jsonl`
    pub fn save_document(&self, doc: &RawDocument) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO documents
             (doc_id, source, source_entity, url, permalink, retrieved_at,
              published_at, title, raw_text, author, score, num_comments, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                doc.doc_id,
                doc.source,
                doc.source_entity,
                doc.url,
                doc.permalink,
                doc.retrieved_at.to_rfc3339(),
                doc.published_at.map(|t| t.to_rfc3339()),
                doc.title,
                doc.raw_text,
                doc.author,
                doc.score,
                doc.num_comments,
                serde_json::to_string(&doc.metadata)?,
            ],
        )?;
        self.append_jsonl("raw.jsonl", doc)?;
        debug!(doc_id = %doc.doc_id, "Storage::save_document: saved");
        Ok(())
    }

    /// Persist a snippet and append it to `snippets.jsonl`
    pub fn save_snippet(&self, snippet: &PainSnippet) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO snippets
             (snippet_id, doc_id, excerpt, pain_statement, signal_type, intensity,
              confidence, quality_score, entities, extractor_model,
              extractor_prompt_version, extracted_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                snippet.snippet_id,
                snippet.doc_id,
                snippet.excerpt,
                snippet.pain_statement,
                snippet.signal_type,
                snippet.intensity,
                snippet.confidence,
                snippet.quality_score,
                serde_json::to_string(&snippet.entities)?,
                snippet.extractor_model,
                snippet.extractor_prompt_version,
                snippet.extracted_at.to_rfc3339(),
                serde_json::to_string(&snippet.metadata)?,
            ],
        )?;
        self.append_jsonl("snippets.jsonl", snippet)?;
        debug!(snippet_id = %snippet.snippet_id, "Storage::save_snippet: saved");
        Ok(())
    }

    /// Append a scheduler event to `events.jsonl`
    pub fn log_event(&self, event: &SessionEvent) -> Result<(), StorageError> {
        self.append_jsonl("events.jsonl", event)?;
        debug!(kind = %event.kind, event_id = %event.event_id, "Storage::log_event: appended");
        Ok(())
    }

    fn append_jsonl<T: serde::Serialize>(&self, filename: &str, data: &T) -> Result<(), StorageError> {
        let path = self.session_dir.join(filename);
        let mut line = serde_json::to_string(data)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StorageError::Append {
                file: filename.to_string(),
                source: e,
            })?;
        file.write_all(line.as_bytes()).map_err(|e| StorageError::Append {
            file: filename.to_string(),
            source: e,
        })?;
        Ok(())
    }

    /// Single-document lookup
    pub fn get_document(&self, doc_id: &str) -> Result<Option<RawDocument>, StorageError> {
        let doc = self
            .conn
            .query_row("SELECT * FROM documents WHERE doc_id = ?1", params![doc_id], |row| {
                row_to_document(row)
            })
            .optional()?;
        Ok(doc)
    }

    /// All documents, newest retrieval first
    pub fn all_documents(&self) -> Result<Vec<RawDocument>, StorageError> {
        let mut stmt = self.conn.prepare("SELECT * FROM documents ORDER BY retrieved_at DESC")?;
        let rows = stmt.query_map([], |row| row_to_document(row))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn document_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn snippet_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM snippets", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Snippets extracted from one document
    pub fn snippets_for_document(&self, doc_id: &str) -> Result<Vec<PainSnippet>, StorageError> {
        let mut stmt = self.conn.prepare("SELECT * FROM snippets WHERE doc_id = ?1")?;
        let rows = stmt.query_map(params![doc_id], |row| row_to_snippet(row))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// All snippets, newest extraction first
    pub fn all_snippets(&self) -> Result<Vec<PainSnippet>, StorageError> {
        let mut stmt = self.conn.prepare("SELECT * FROM snippets ORDER BY extracted_at DESC")?;
        let rows = stmt.query_map([], |row| row_to_snippet(row))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Union of every snippet's entities, sorted
    pub fn all_entities(&self) -> Result<Vec<String>, StorageError> {
        let mut stmt = self.conn.prepare("SELECT DISTINCT entities FROM snippets")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut entities = std::collections::BTreeSet::new();
        for row in rows {
            let cell = row?;
            if let Ok(list) = serde_json::from_str::<Vec<String>>(&cell) {
                entities.extend(list);
            }
        }
        Ok(entities.into_iter().collect())
    }

    pub fn document_exists(&self, doc_id: &str) -> Result<bool, StorageError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM documents WHERE doc_id = ?1 LIMIT 1",
                params![doc_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// The session this handle belongs to
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

fn parse_ts(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<RawDocument> {
    let metadata: String = row.get("metadata")?;
    let published: Option<String> = row.get("published_at")?;
    Ok(RawDocument {
        doc_id: row.get("doc_id")?,
        source: row.get("source")?,
        source_entity: row.get("source_entity")?,
        url: row.get("url")?,
        permalink: row.get("permalink")?,
        retrieved_at: parse_ts(row.get("retrieved_at")?),
        published_at: published.map(parse_ts),
        title: row.get("title")?,
        raw_text: row.get("raw_text")?,
        author: row.get("author")?,
        score: row.get("score")?,
        num_comments: row.get("num_comments")?,
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
    })
}

fn row_to_snippet(row: &Row<'_>) -> rusqlite::Result<PainSnippet> {
    let entities: String = row.get("entities")?;
    let metadata: String = row.get("metadata")?;
    Ok(PainSnippet {
        snippet_id: row.get("snippet_id")?,
        doc_id: row.get("doc_id")?,
        excerpt: row.get("excerpt")?,
        pain_statement: row.get("pain_statement")?,
        signal_type: row.get("signal_type")?,
        intensity: row.get("intensity")?,
        confidence: row.get("confidence")?,
        quality_score: row.get("quality_score")?,
        entities: serde_json::from_str(&entities).unwrap_or_default(),
        extractor_model: row.get("extractor_model")?,
        extractor_prompt_version: row.get("extractor_prompt_version")?,
        extracted_at: parse_ts(row.get("extracted_at")?),
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{generate_id, utc_now};
    use tempfile::tempdir;

    fn sample_document(doc_id: &str) -> RawDocument {
        RawDocument {
            doc_id: doc_id.to_string(),
            source: "news".to_string(),
            source_entity: "all".to_string(),
            url: format!("https://example.com/{doc_id}"),
            permalink: format!("https://example.com/{doc_id}"),
            retrieved_at: utc_now(),
            published_at: None,
            title: "Widgets keep breaking".to_string(),
            raw_text: "The widget crashes whenever I export.".to_string(),
            author: Some("user1".to_string()),
            score: Some(42),
            num_comments: Some(7),
            metadata: Default::default(),
        }
    }

    fn sample_snippet(doc_id: &str) -> PainSnippet {
        PainSnippet {
            snippet_id: generate_id(),
            doc_id: doc_id.to_string(),
            excerpt: "The widget crashes whenever I export.".to_string(),
            pain_statement: "Export reliably crashes the widget".to_string(),
            signal_type: "bug".to_string(),
            intensity: 4,
            confidence: 0.9,
            quality_score: 0.8,
            entities: vec!["WidgetCo".to_string()],
            extractor_model: "gpt-4o".to_string(),
            extractor_prompt_version: "v2".to_string(),
            extracted_at: utc_now(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_save_and_get_document() {
        let dir = tempdir().unwrap();
        let storage = Storage::open("sess1", dir.path()).unwrap();

        let doc = sample_document("doc1");
        storage.save_document(&doc).unwrap();

        let loaded = storage.get_document("doc1").unwrap().unwrap();
        assert_eq!(loaded.title, doc.title);
        assert_eq!(loaded.score, Some(42));
        assert!(storage.document_exists("doc1").unwrap());
        assert!(!storage.document_exists("missing").unwrap());
        assert_eq!(storage.document_count().unwrap(), 1);
    }

    #[test]
    fn test_save_document_is_idempotent_by_id() {
        let dir = tempdir().unwrap();
        let storage = Storage::open("sess1", dir.path()).unwrap();

        let mut doc = sample_document("doc1");
        storage.save_document(&doc).unwrap();
        doc.title = "Updated".to_string();
        storage.save_document(&doc).unwrap();

        assert_eq!(storage.document_count().unwrap(), 1);
        assert_eq!(storage.get_document("doc1").unwrap().unwrap().title, "Updated");
    }

    #[test]
    fn test_snippets_and_entities() {
        let dir = tempdir().unwrap();
        let storage = Storage::open("sess1", dir.path()).unwrap();

        storage.save_document(&sample_document("doc1")).unwrap();
        let mut s1 = sample_snippet("doc1");
        s1.entities = vec!["WidgetCo".to_string(), "Acme".to_string()];
        let mut s2 = sample_snippet("doc1");
        s2.entities = vec!["Acme".to_string()];
        storage.save_snippet(&s1).unwrap();
        storage.save_snippet(&s2).unwrap();

        assert_eq!(storage.snippet_count().unwrap(), 2);
        assert_eq!(storage.snippets_for_document("doc1").unwrap().len(), 2);
        assert_eq!(storage.all_entities().unwrap(), vec!["Acme".to_string(), "WidgetCo".to_string()]);
    }

    #[test]
    fn test_jsonl_streams_are_append_only() {
        let dir = tempdir().unwrap();
        let storage = Storage::open("sess1", dir.path()).unwrap();

        storage.save_document(&sample_document("doc1")).unwrap();
        storage.save_document(&sample_document("doc2")).unwrap();
        storage
            .log_event(&SessionEvent::new("sess1", "iteration_started"))
            .unwrap();
        storage.log_event(&SessionEvent::new("sess1", "stop")).unwrap();

        let raw = std::fs::read_to_string(storage.session_dir().join("raw.jsonl")).unwrap();
        assert_eq!(raw.lines().count(), 2);

        let events = std::fs::read_to_string(storage.session_dir().join("events.jsonl")).unwrap();
        let kinds: Vec<String> = events
            .lines()
            .map(|l| serde_json::from_str::<SessionEvent>(l).unwrap().kind)
            .collect();
        assert_eq!(kinds, vec!["iteration_started", "stop"]);
    }
}
