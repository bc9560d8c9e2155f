//! SignalStore - session-scoped storage for the prospectd pipeline
//!
//! A session owns one directory holding a relational store (documents and
//! pain snippets), append-only JSONL streams (`raw.jsonl`, `snippets.jsonl`,
//! `events.jsonl`), and an atomically-written `state.json` snapshot.
//!
//! # Modules
//!
//! - [`models`] - the shared data model (documents, snippets, tasks, pages)
//! - [`store`] - rusqlite-backed storage plus JSONL appends
//! - [`session`] - session snapshot lifecycle (create/load/save/list)
//! - [`jsonio`] - atomic JSON write/read primitives

pub mod jsonio;
pub mod models;
pub mod session;
pub mod store;

pub use jsonio::{atomic_write_json, load_json};
pub use models::{
    DocumentRef, ExtractionResult, KNOWLEDGE_PERSIST_SIZE, NOVELTY_HISTORY_SIZE, PainSnippet, Page, RawDocument,
    SearchTask, SessionEvent, SessionState, SessionStats, SessionStatus, SourceEntity, VALID_SIGNAL_TYPES,
    generate_id, utc_now,
};
pub use session::{SessionError, SessionManager, SessionSummary, load_or_create_session};
pub use store::{SCHEMA_VERSION, Storage, StorageError};
