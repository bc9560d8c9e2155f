//! ToolContext - execution context for tools

use std::path::{Path, PathBuf};

use eyre::{Result, bail};
use tracing::debug;

/// Execution context for tools, scoped to one root directory.
///
/// File tools cannot escape the root: absolute paths and `..` components
/// are rejected before any I/O happens.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Root path - all file operations are constrained here
    pub root: PathBuf,
}

impl ToolContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a tool-provided relative path against the root
    pub fn validate_path(&self, path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            bail!("Absolute paths are not allowed: {}", path.display());
        }
        for component in path.components() {
            if matches!(component, std::path::Component::ParentDir) {
                bail!("Path escapes the tool root: {}", path.display());
            }
        }
        let full = self.root.join(path);
        debug!(?full, "ToolContext::validate_path: resolved");
        Ok(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_paths_resolve_under_root() {
        let ctx = ToolContext::new("/tmp/work");
        let resolved = ctx.validate_path(Path::new("src/lib.rs")).unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/work/src/lib.rs"));
    }

    #[test]
    fn test_absolute_and_parent_paths_rejected() {
        let ctx = ToolContext::new("/tmp/work");
        assert!(ctx.validate_path(Path::new("/etc/passwd")).is_err());
        assert!(ctx.validate_path(Path::new("../outside")).is_err());
    }
}
