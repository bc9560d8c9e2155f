//! web_search tool - Tavily-backed web search with client-side pagination

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::tools::{Tool, ToolContext};

const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

/// Search the web via the Tavily API.
///
/// Tavily has no server-side pagination, so the tool fetches
/// `page * page_size` results and slices the requested window, reporting
/// `has_more` when results extend past it.
pub struct WebSearchTool {
    http: reqwest::Client,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> &'static str {
        "Search the web. Returns result URLs with titles, snippets, and relevance scores."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "page": { "type": "integer", "description": "1-based page number", "default": 1 },
                "page_size": {
                    "type": "integer",
                    "description": "Results per page (1-20)",
                    "default": 5
                },
                "max_results": {
                    "type": "integer",
                    "description": "Hard cap on fetched results (optional)"
                },
                "include_domains": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Only include results from these domains"
                },
                "exclude_domains": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Exclude results from these domains"
                },
                "days": {
                    "type": "integer",
                    "description": "Only include results from the last N days (optional)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> eyre::Result<Value> {
        let query = input["query"].as_str().unwrap_or("").trim().to_string();
        if query.is_empty() {
            eyre::bail!("query is required");
        }

        let api_key =
            std::env::var("TAVILY_API_KEY").map_err(|_| eyre::eyre!("TAVILY_API_KEY is not set"))?;

        let page = input["page"].as_u64().unwrap_or(1).max(1) as usize;
        let page_size = input["page_size"].as_u64().unwrap_or(5).clamp(1, 20) as usize;

        let end = page * page_size;
        let mut fetch_n = end;
        if let Some(max_results) = input["max_results"].as_u64() {
            fetch_n = fetch_n.min(max_results.max(1) as usize);
        }

        let mut payload = json!({
            "query": query,
            "max_results": fetch_n,
        });
        if let Some(domains) = input.get("include_domains").filter(|v| v.is_array()) {
            payload["include_domains"] = domains.clone();
        }
        if let Some(domains) = input.get("exclude_domains").filter(|v| v.is_array()) {
            payload["exclude_domains"] = domains.clone();
        }
        if let Some(days) = input["days"].as_u64() {
            payload["days"] = json!(days);
        }

        debug!(%query, page, page_size, "WebSearchTool::execute: querying");
        let response = self
            .http
            .post(TAVILY_SEARCH_URL)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| eyre::eyre!("web_search request failed: {e}"))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            eyre::bail!("web_search failed with status {status}: {text}");
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| eyre::eyre!("web_search returned invalid JSON: {e}"))?;

        let results = body["results"].as_array().cloned().unwrap_or_default();
        let start = (page - 1) * page_size;
        let sliced: Vec<Value> = results.iter().skip(start).take(page_size).cloned().collect();
        let has_more = results.len() > end;

        Ok(json!({
            "query": query,
            "page": page,
            "page_size": page_size,
            "has_more": has_more,
            "results": sliced,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolContext;

    #[tokio::test]
    async fn test_empty_query_is_error() {
        let ctx = ToolContext::new(".");
        let err = WebSearchTool::new().execute(json!({"query": "  "}), &ctx).await;
        assert!(err.is_err());
    }
}
