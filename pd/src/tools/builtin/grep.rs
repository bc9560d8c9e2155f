//! grep tool - regex search over files under the tool root

use std::path::Path;

use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{Value, json};
use tracing::debug;

use crate::tools::{Tool, ToolContext};

/// Search files for a regex pattern, returning matching lines
pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &'static str {
        "grep"
    }

    fn description(&self) -> &'static str {
        "Search for a regex pattern in files. Returns matching lines with file and line number."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regex pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory or file to search, relative to the tool root (default: .)"
                },
                "case_insensitive": {
                    "type": "boolean",
                    "description": "Case-insensitive search (default: false)"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum matching lines to return (default: 50)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> eyre::Result<Value> {
        debug!(?input, "GrepTool::execute: called");
        let pattern = input["pattern"].as_str().ok_or_else(|| eyre::eyre!("pattern is required"))?;
        let path = input["path"].as_str().unwrap_or(".");
        let case_insensitive = input["case_insensitive"].as_bool().unwrap_or(false);
        let max_results = input["max_results"].as_u64().unwrap_or(50) as usize;

        let regex = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| eyre::eyre!("Invalid pattern: {e}"))?;

        let root = ctx.validate_path(Path::new(path))?;
        let mut matches = Vec::new();
        search_path(&root, &regex, max_results, &mut matches)?;

        Ok(json!({
            "pattern": pattern,
            "match_count": matches.len(),
            "matches": matches,
        }))
    }
}

fn search_path(path: &Path, regex: &regex::Regex, max: usize, out: &mut Vec<Value>) -> eyre::Result<()> {
    if out.len() >= max {
        return Ok(());
    }
    if path.is_file() {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Ok(());
        };
        for (idx, line) in content.lines().enumerate() {
            if out.len() >= max {
                break;
            }
            if regex.is_match(line) {
                out.push(json!({
                    "file": path.display().to_string(),
                    "line": idx + 1,
                    "text": line,
                }));
            }
        }
        return Ok(());
    }
    if path.is_dir() {
        let mut entries: Vec<_> = std::fs::read_dir(path)
            .map_err(|e| eyre::eyre!("Failed to read {}: {e}", path.display()))?
            .flatten()
            .map(|e| e.path())
            .collect();
        entries.sort();
        for entry in entries {
            let name = entry.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.starts_with('.') {
                continue;
            }
            search_path(&entry, regex, max, out)?;
        }
    }
    Ok(())
}
