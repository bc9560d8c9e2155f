//! read_file tool - read file contents with line numbers

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::Path;
use tracing::debug;

use crate::tools::{Tool, ToolContext};

/// Read a file's contents with line numbers
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read a file's contents with line numbers."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the tool root"
                },
                "offset": {
                    "type": "integer",
                    "description": "Line number to start reading from (1-indexed)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Max lines to read (default: 2000)"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> eyre::Result<Value> {
        debug!(?input, "ReadFileTool::execute: called");
        let path = input["path"].as_str().ok_or_else(|| eyre::eyre!("path is required"))?;
        let offset = input["offset"].as_u64().unwrap_or(1) as usize;
        let limit = input["limit"].as_u64().unwrap_or(2000) as usize;

        let full_path = ctx.validate_path(Path::new(path))?;
        let content = tokio::fs::read_to_string(&full_path)
            .await
            .map_err(|e| eyre::eyre!("Failed to read file: {e}"))?;

        let lines: Vec<String> = content
            .lines()
            .skip(offset.saturating_sub(1))
            .take(limit)
            .enumerate()
            .map(|(i, line)| format!("{:>6}\u{2502}{}", offset + i, line))
            .collect();

        Ok(json!({
            "path": path,
            "line_count": content.lines().count(),
            "content": lines.join("\n"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_read_file_with_offset() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "one\ntwo\nthree\n").unwrap();
        let ctx = ToolContext::new(dir.path());

        let out = ReadFileTool
            .execute(json!({"path": "f.txt", "offset": 2, "limit": 1}), &ctx)
            .await
            .unwrap();

        assert_eq!(out["line_count"], 3);
        assert!(out["content"].as_str().unwrap().contains("two"));
        assert!(!out["content"].as_str().unwrap().contains("three"));
    }

    #[tokio::test]
    async fn test_read_missing_file_is_error() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path());
        let err = ReadFileTool.execute(json!({"path": "absent.txt"}), &ctx).await;
        assert!(err.is_err());
    }
}
