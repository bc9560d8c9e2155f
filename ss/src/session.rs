//! Session snapshot lifecycle
//!
//! Sessions live under `<data_dir>/<session_id>/` with an atomically-written
//! `state.json`. The manager never mutates a session on its own; the
//! scheduler owns the state and calls `save_session` at iteration
//! boundaries.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::jsonio::{atomic_write_json, load_json};
use crate::models::{SessionState, SessionStats, SessionStatus, utc_now};

/// Errors raised while loading or resuming sessions
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session {0} not found")]
    NotFound(String),

    #[error("Session {0} is already completed")]
    AlreadyCompleted(String),

    #[error("Either a session id or a topic must be provided")]
    MissingTopic,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// One line of `list_sessions` output
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub topic: String,
    pub status: SessionStatus,
    pub created_at: String,
    pub updated_at: String,
    pub stats: SessionStats,
}

/// Creates, loads, and persists session snapshots under a data directory
pub struct SessionManager {
    data_dir: PathBuf,
}

impl SessionManager {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self, SessionError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    /// Create and persist a fresh running session
    pub fn create_session(&self, topic: &str, max_iterations: u64) -> Result<SessionState, SessionError> {
        let session = SessionState::new(topic, max_iterations);
        self.write_state(&session)?;
        info!(session_id = %session.session_id, topic, "SessionManager::create_session: created");
        Ok(session)
    }

    /// Load a session snapshot, or `None` if it does not exist
    pub fn load_session(&self, session_id: &str) -> Option<SessionState> {
        let state_path = self.state_path(session_id);
        let session: Option<SessionState> = load_json(&state_path);
        match &session {
            Some(s) => {
                info!(session_id, status = %s.status, tasks = s.task_queue.len(), "SessionManager::load_session: loaded")
            }
            None => warn!(session_id, "SessionManager::load_session: not found"),
        }
        session
    }

    /// Persist a session, refreshing `updated_at` and trimming windows
    pub fn save_session(&self, session: &mut SessionState) -> Result<(), SessionError> {
        session.updated_at = utc_now();
        session.apply_retention();
        self.write_state(session)?;
        debug!(session_id = %session.session_id, "SessionManager::save_session: saved");
        Ok(())
    }

    fn write_state(&self, session: &SessionState) -> Result<(), SessionError> {
        atomic_write_json(self.state_path(&session.session_id), session)
            .map_err(|e| SessionError::Other(e.to_string()))
    }

    fn state_path(&self, session_id: &str) -> PathBuf {
        self.data_dir.join(session_id).join("state.json")
    }

    /// Summaries of all sessions, newest update first
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut sessions = Vec::new();
        let entries = match fs::read_dir(&self.data_dir) {
            Ok(e) => e,
            Err(_) => return sessions,
        };

        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let state_path = entry.path().join("state.json");
            if let Some(state) = load_json::<SessionState>(&state_path) {
                sessions.push(SessionSummary {
                    session_id: state.session_id,
                    topic: state.topic,
                    status: state.status,
                    created_at: state.created_at.to_rfc3339(),
                    updated_at: state.updated_at.to_rfc3339(),
                    stats: state.stats,
                });
            }
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    /// Delete a session directory. Returns false if it did not exist.
    pub fn delete_session(&self, session_id: &str) -> Result<bool, SessionError> {
        let session_dir = self.data_dir.join(session_id);
        if !session_dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&session_dir)?;
        info!(session_id, "SessionManager::delete_session: deleted");
        Ok(true)
    }
}

/// Resume an existing session or start a new one for `topic`.
///
/// Resuming a completed session is an error; a resumed session is flipped
/// back to running.
pub fn load_or_create_session(
    session_id: Option<&str>,
    topic: Option<&str>,
    max_iterations: u64,
    data_dir: impl AsRef<Path>,
) -> Result<SessionState, SessionError> {
    let manager = SessionManager::new(data_dir)?;

    if let Some(id) = session_id {
        let mut session = manager.load_session(id).ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        if session.status == SessionStatus::Completed {
            return Err(SessionError::AlreadyCompleted(id.to_string()));
        }
        session.status = SessionStatus::Running;
        return Ok(session);
    }

    let topic = topic.ok_or(SessionError::MissingTopic)?;
    manager.create_session(topic, max_iterations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_then_load_round_trip() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(dir.path()).unwrap();

        let created = manager.create_session("crm pain points", 60).unwrap();
        let loaded = manager.load_session(&created.session_id).unwrap();

        assert_eq!(loaded.session_id, created.session_id);
        assert_eq!(loaded.topic, "crm pain points");
        assert_eq!(loaded.status, SessionStatus::Running);
    }

    #[test]
    fn test_save_refreshes_updated_at_and_trims() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(dir.path()).unwrap();

        let mut session = manager.create_session("topic", 30).unwrap();
        session.knowledge = (0..300).map(|i| format!("k{i}")).collect();
        manager.save_session(&mut session).unwrap();

        let loaded = manager.load_session(&session.session_id).unwrap();
        assert_eq!(loaded.knowledge.len(), crate::models::KNOWLEDGE_PERSIST_SIZE);
    }

    #[test]
    fn test_resume_completed_session_is_rejected() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(dir.path()).unwrap();

        let mut session = manager.create_session("topic", 30).unwrap();
        session.status = SessionStatus::Completed;
        manager.save_session(&mut session).unwrap();

        let err = load_or_create_session(Some(&session.session_id), None, 30, dir.path()).unwrap_err();
        assert!(matches!(err, SessionError::AlreadyCompleted(_)));
    }

    #[test]
    fn test_resume_paused_session_becomes_running() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(dir.path()).unwrap();

        let mut session = manager.create_session("topic", 30).unwrap();
        session.status = SessionStatus::Paused;
        manager.save_session(&mut session).unwrap();

        let resumed = load_or_create_session(Some(&session.session_id), None, 30, dir.path()).unwrap();
        assert_eq!(resumed.status, SessionStatus::Running);
    }

    #[test]
    fn test_list_sessions_sorted_by_update() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(dir.path()).unwrap();

        let _a = manager.create_session("first", 30).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = manager.create_session("second", 30).unwrap();

        let sessions = manager.list_sessions();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_id, b.session_id);
    }

    #[test]
    fn test_delete_session() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(dir.path()).unwrap();

        let session = manager.create_session("topic", 30).unwrap();
        assert!(manager.delete_session(&session.session_id).unwrap());
        assert!(!manager.delete_session(&session.session_id).unwrap());
        assert!(manager.load_session(&session.session_id).is_none());
    }
}
