//! Atomic JSON snapshot I/O
//!
//! Session state must never be observable half-written. Writes go to a
//! tempfile in the same directory, then rename over the target (POSIX
//! atomic replace).

use std::fs;
use std::io::Write;
use std::path::Path;

use eyre::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Atomically replace `path` with the pretty-printed JSON form of `data`.
///
/// Parent directories are created as needed. The tempfile lives in the
/// target directory so the final rename stays on one filesystem.
pub fn atomic_write_json<T: Serialize>(path: impl AsRef<Path>, data: &T) -> Result<()> {
    let path = path.as_ref();
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).context("Failed to create snapshot directory")?;

    let payload = serde_json::to_vec_pretty(data).context("Failed to serialize snapshot")?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".state")
        .suffix(".tmp")
        .tempfile_in(parent)
        .context("Failed to create tempfile for snapshot")?;
    tmp.write_all(&payload).context("Failed to write snapshot tempfile")?;
    tmp.as_file().sync_all().ok();
    tmp.persist(path)
        .map_err(|e| e.error)
        .context("Failed to replace snapshot")?;

    debug!(?path, bytes = payload.len(), "atomic_write_json: wrote snapshot");
    Ok(())
}

/// Load JSON from `path`, returning `None` if the file is missing or invalid.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Option<T> {
    let path = path.as_ref();
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return None,
    };
    match serde_json::from_str(&content) {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(?path, error = %e, "load_json: invalid JSON");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Snapshot {
        id: String,
        count: u32,
        items: Vec<String>,
    }

    #[test]
    fn test_write_then_read_is_identity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let snap = Snapshot {
            id: "abc123".to_string(),
            count: 7,
            items: vec!["one".to_string(), "two".to_string()],
        };

        atomic_write_json(&path, &snap).unwrap();
        let loaded: Snapshot = load_json(&path).unwrap();
        assert_eq!(loaded, snap);
    }

    #[test]
    fn test_overwrite_replaces_previous_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        atomic_write_json(&path, &serde_json::json!({"v": 1})).unwrap();
        atomic_write_json(&path, &serde_json::json!({"v": 2})).unwrap();

        let loaded: serde_json::Value = load_json(&path).unwrap();
        assert_eq!(loaded["v"], 2);
    }

    #[test]
    fn test_load_missing_returns_none() {
        let dir = tempdir().unwrap();
        let loaded: Option<Snapshot> = load_json(dir.path().join("absent.json"));
        assert!(loaded.is_none());
    }

    #[test]
    fn test_load_invalid_returns_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();
        let loaded: Option<Snapshot> = load_json(&path);
        assert!(loaded.is_none());
    }
}
