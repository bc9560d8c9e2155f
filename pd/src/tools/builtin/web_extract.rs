//! web_extract tool - full-page content extraction with digests

use async_trait::async_trait;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::tools::{Tool, ToolContext};

const TAVILY_EXTRACT_URL: &str = "https://api.tavily.com/extract";

/// Default truncation budget for extracted pages
pub const DEFAULT_EXTRACT_MAX_CHARS: usize = 20_000;

/// Extract a page's raw content via the Tavily API.
///
/// Output carries `raw_len` and `truncated` so callers can tell how much
/// was cut, and a sha256 digest of the returned content for evidence
/// integrity checks.
pub struct WebExtractTool {
    http: reqwest::Client,
}

impl WebExtractTool {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
        }
    }

    fn payload_for(url: &str, raw: &str, title: &str, max_chars: usize) -> Value {
        let raw_len = raw.chars().count();
        let truncated = raw_len > max_chars;
        let content: String = if truncated { raw.chars().take(max_chars).collect() } else { raw.to_string() };

        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let digest = format!("{:x}", hasher.finalize());

        json!({
            "url": url,
            "title": title.trim(),
            "raw_content": content,
            "raw_len": raw_len,
            "truncated": truncated,
            "sha256": digest,
        })
    }
}

impl Default for WebExtractTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebExtractTool {
    fn name(&self) -> &'static str {
        "web_extract"
    }

    fn description(&self) -> &'static str {
        "Extract the full text content of a web page for deep reading and quoting."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "URL to extract content from" },
                "max_chars": {
                    "type": "integer",
                    "description": "Max characters to return (truncates raw_content)",
                    "default": DEFAULT_EXTRACT_MAX_CHARS
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> eyre::Result<Value> {
        let url = input["url"].as_str().unwrap_or("").trim().to_string();
        if url.is_empty() {
            eyre::bail!("url is required");
        }

        let api_key =
            std::env::var("TAVILY_API_KEY").map_err(|_| eyre::eyre!("TAVILY_API_KEY is not set"))?;

        let max_chars = input["max_chars"]
            .as_u64()
            .map(|n| n.max(1) as usize)
            .unwrap_or(DEFAULT_EXTRACT_MAX_CHARS);

        debug!(%url, max_chars, "WebExtractTool::execute: extracting");
        let response = self
            .http
            .post(TAVILY_EXTRACT_URL)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&json!({ "urls": [url] }))
            .send()
            .await
            .map_err(|e| eyre::eyre!("web_extract request failed: {e}"))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            eyre::bail!("web_extract failed with status {status}: {text}");
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| eyre::eyre!("web_extract returned invalid JSON: {e}"))?;

        let first = body["results"].as_array().and_then(|r| r.first()).cloned().unwrap_or(json!({}));
        let raw = first["raw_content"].as_str().unwrap_or("");
        let title = first["title"].as_str().unwrap_or("");

        Ok(Self::payload_for(&url, raw, title, max_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_truncation_and_digest() {
        let payload = WebExtractTool::payload_for("https://example.com", "abcdefghij", "Title ", 4);
        assert_eq!(payload["raw_content"], "abcd");
        assert_eq!(payload["raw_len"], 10);
        assert_eq!(payload["truncated"], true);
        assert_eq!(payload["title"], "Title");

        let mut hasher = Sha256::new();
        hasher.update(b"abcd");
        assert_eq!(payload["sha256"], format!("{:x}", hasher.finalize()));
    }

    #[test]
    fn test_payload_empty_content() {
        let payload = WebExtractTool::payload_for("https://example.com", "", "", 100);
        assert_eq!(payload["raw_len"], 0);
        assert_eq!(payload["truncated"], false);
        assert_eq!(
            payload["sha256"],
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
