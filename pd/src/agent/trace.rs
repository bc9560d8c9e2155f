//! Sub-agent traces
//!
//! A trace records everything a worker did: every tool call with its
//! wrapped result, counters for the capped web tools, the citation set, and
//! per-URL source metadata harvested from search results.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Title/snippet metadata for a search-result URL
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// One tool invocation, args and wrapped result included
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub args: Value,
    pub result: Value,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// Everything observed while one sub-agent task ran
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubagentTrace {
    pub tool_calls: Vec<ToolCallRecord>,
    pub web_search_calls: u32,
    pub web_extract_calls: u32,
    /// `http…` URLs seen in successful web_search results
    pub citations: BTreeSet<String>,
    /// URL -> title/snippet metadata from search results
    pub sources: BTreeMap<String, SourceMeta>,
    /// URL -> web_extract payload for successful extractions
    pub extracted: BTreeMap<String, Value>,
    pub iterations: u32,
    pub duration_ms: Option<u64>,
}

impl SubagentTrace {
    /// Fold a successful `web_search` result into citations and sources
    pub fn absorb_web_search_result(&mut self, result: &Value) {
        if result["success"] != Value::Bool(true) {
            return;
        }
        let Some(items) = result["result"]["results"].as_array() else {
            return;
        };
        for item in items {
            let Some(url) = item["url"].as_str() else { continue };
            if !url.starts_with("http") {
                continue;
            }
            self.citations.insert(url.to_string());

            let title = item["title"].as_str().map(str::trim).filter(|s| !s.is_empty());
            let snippet = item["content"]
                .as_str()
                .or_else(|| item["snippet"].as_str())
                .or_else(|| item["description"].as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty());
            if title.is_some() || snippet.is_some() {
                self.sources.insert(
                    url.to_string(),
                    SourceMeta {
                        title: title.map(String::from),
                        snippet: snippet.map(String::from),
                    },
                );
            }
        }
    }

    /// Fold a successful `web_extract` result into the extracted-page map
    pub fn absorb_web_extract_result(&mut self, result: &Value) {
        if result["success"] != Value::Bool(true) {
            return;
        }
        let payload = &result["result"];
        if let Some(url) = payload["url"].as_str() {
            self.extracted.insert(url.to_string(), payload.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absorb_web_search_collects_http_urls_only() {
        let mut trace = SubagentTrace::default();
        trace.absorb_web_search_result(&json!({
            "success": true,
            "result": {
                "results": [
                    {"url": "https://a.com/x", "title": "A", "content": "about a"},
                    {"url": "ftp://b.com/y", "title": "B"},
                    {"url": "https://c.com/z"}
                ]
            }
        }));

        assert!(trace.citations.contains("https://a.com/x"));
        assert!(trace.citations.contains("https://c.com/z"));
        assert!(!trace.citations.iter().any(|u| u.starts_with("ftp")));
        assert_eq!(trace.sources.get("https://a.com/x").unwrap().title.as_deref(), Some("A"));
        assert!(!trace.sources.contains_key("https://c.com/z"));
    }

    #[test]
    fn test_absorb_failed_search_is_noop() {
        let mut trace = SubagentTrace::default();
        trace.absorb_web_search_result(&json!({"success": false, "error": "boom"}));
        assert!(trace.citations.is_empty());
    }

    #[test]
    fn test_absorb_web_extract_records_payload() {
        let mut trace = SubagentTrace::default();
        trace.absorb_web_extract_result(&json!({
            "success": true,
            "result": {"url": "https://a.com/doc", "raw_content": "text", "raw_len": 4}
        }));
        assert_eq!(trace.extracted["https://a.com/doc"]["raw_len"], 4);
    }
}
