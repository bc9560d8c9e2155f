//! LLM extraction with JSON repair and scoring
//!
//! One prompted call per document, temperature 0.0, with bounded retries on
//! parse failures. Snippets are clamped into their invariant ranges and
//! scored; the validator drops weak or duplicate ones.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use signalstore::{ExtractionResult, PainSnippet, RawDocument, VALID_SIGNAL_TYPES, generate_id, utc_now};

use crate::llm::{CompletionClient, CompletionRequest};

use super::cost::CostTracker;
use super::prompts::extraction_prompt;
use super::validation::SnippetValidator;
use super::{CONTENT_TRUNCATION_LIMIT, KNOWLEDGE_CONTEXT_SIZE, MAX_FOLLOWUP_QUERIES};

fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        return (min + max) / 2.0;
    }
    value.clamp(min, max)
}

fn number_or(value: &Value, default: f64) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(default),
        Value::String(s) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

/// Accept raw JSON or a single fenced block
fn strip_code_fence(content: &str) -> &str {
    let mut s = content.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

/// Prompted extractor with a versioned template
pub struct Extractor {
    llm: Arc<dyn CompletionClient>,
    model: String,
    prompt_version: String,
    max_retries: u32,
    retry_delay: Duration,
    validator: SnippetValidator,
}

impl Extractor {
    pub fn new(
        llm: Arc<dyn CompletionClient>,
        model: impl Into<String>,
        prompt_version: impl Into<String>,
        validator: SnippetValidator,
    ) -> Self {
        Self {
            llm,
            model: model.into(),
            prompt_version: prompt_version.into(),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            validator,
        }
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Extract pain snippets from a document.
    ///
    /// Never fails: exhausted retries return an empty result tagged with an
    /// `error_kind` so the scheduler can record what happened.
    pub async fn extract(
        &self,
        doc: &RawDocument,
        topic: &str,
        knowledge: &[String],
        cost: &CostTracker,
    ) -> ExtractionResult {
        let prompt = self.build_prompt(doc, topic, knowledge);

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay).await;
            }

            let request = CompletionRequest::simple(prompt.clone(), 0.0, 4096);
            let content = match self.llm.complete(request).await {
                Ok(response) => {
                    cost.record("extraction", &response.usage, &self.model);
                    response.content.unwrap_or_default()
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Extractor::extract: LLM error");
                    if attempt + 1 == self.max_retries {
                        return self.empty_result("llm_error");
                    }
                    continue;
                }
            };

            if content.trim().is_empty() {
                warn!(attempt, "Extractor::extract: empty response");
                if attempt + 1 == self.max_retries {
                    return self.empty_result("llm_error");
                }
                continue;
            }

            match serde_json::from_str::<Value>(strip_code_fence(&content)) {
                Ok(data) => {
                    let result = self.parse_payload(&data, &doc.doc_id);
                    info!(
                        doc_id = %doc.doc_id,
                        snippets = result.snippets.len(),
                        entities = result.entities.len(),
                        "Extractor::extract: extracted"
                    );
                    return result;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Extractor::extract: JSON parse error");
                    if attempt + 1 == self.max_retries {
                        return self.empty_result("json_parse");
                    }
                }
            }
        }

        self.empty_result("unknown")
    }

    fn build_prompt(&self, doc: &RawDocument, topic: &str, knowledge: &[String]) -> String {
        let knowledge_text = if knowledge.is_empty() {
            "No prior knowledge yet.".to_string()
        } else {
            knowledge
                .iter()
                .rev()
                .take(KNOWLEDGE_CONTEXT_SIZE)
                .rev()
                .map(|k| format!("- {k}"))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let mut content = doc.raw_text.clone();
        if content.chars().count() > CONTENT_TRUNCATION_LIMIT {
            content = content.chars().take(CONTENT_TRUNCATION_LIMIT).collect();
            content.push_str("\n\n[Content truncated...]");
        }

        extraction_prompt(&self.prompt_version)
            .replace("{topic}", topic)
            .replace("{source}", &doc.source_entity)
            .replace("{title}", &doc.title)
            .replace("{url}", &doc.url)
            .replace("{content}", &content)
            .replace("{knowledge}", &knowledge_text)
    }

    fn parse_payload(&self, data: &Value, doc_id: &str) -> ExtractionResult {
        let novelty = clamp(number_or(&data["novelty"], 0.5), 0.0, 1.0);

        let mut snippets = Vec::new();
        if let Some(items) = data["snippets"].as_array() {
            for item in items {
                if !item.is_object() {
                    debug!("Extractor::parse_payload: skipping non-object snippet");
                    continue;
                }
                let intensity = clamp(number_or(&item["intensity"], 3.0), 1.0, 5.0) as i64;
                let confidence = clamp(number_or(&item["confidence"], 0.5), 0.0, 1.0);
                let entities: Vec<String> = item["entities"]
                    .as_array()
                    .map(|list| list.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    .unwrap_or_default();

                snippets.push(PainSnippet {
                    snippet_id: generate_id(),
                    doc_id: doc_id.to_string(),
                    excerpt: item["excerpt"].as_str().unwrap_or("").to_string(),
                    pain_statement: item["pain_statement"].as_str().unwrap_or("").to_string(),
                    signal_type: validate_signal_type(item["signal_type"].as_str().unwrap_or("complaint")),
                    intensity,
                    confidence,
                    quality_score: quality_score(intensity, confidence, novelty),
                    entities,
                    extractor_model: self.model.clone(),
                    extractor_prompt_version: self.prompt_version.clone(),
                    extracted_at: utc_now(),
                    metadata: Default::default(),
                });
            }
        }

        let entities: Vec<String> = data["entities"]
            .as_array()
            .map(|list| list.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        let mut follow_up_queries: Vec<String> = data["follow_up_queries"]
            .as_array()
            .map(|list| list.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        follow_up_queries.truncate(MAX_FOLLOWUP_QUERIES);

        let (snippets, dropped) = self.validator.validate(snippets);

        ExtractionResult {
            snippets,
            entities,
            follow_up_queries,
            novelty,
            dropped_snippets: dropped,
            error_kind: None,
        }
    }

    fn empty_result(&self, error_kind: &str) -> ExtractionResult {
        ExtractionResult {
            snippets: Vec::new(),
            entities: Vec::new(),
            follow_up_queries: Vec::new(),
            novelty: 0.5,
            dropped_snippets: 0,
            error_kind: Some(error_kind.to_string()),
        }
    }
}

/// Coerce unknown labels to `complaint`
fn validate_signal_type(signal_type: &str) -> String {
    let normalized = signal_type.trim().to_lowercase();
    if VALID_SIGNAL_TYPES.contains(&normalized.as_str()) {
        normalized
    } else {
        "complaint".to_string()
    }
}

/// Weighted quality: 0.4·normalized intensity + 0.4·confidence + 0.2·novelty
fn quality_score(intensity: i64, confidence: f64, novelty: f64) -> f64 {
    let normalized_intensity = clamp((intensity as f64 - 1.0) / 4.0, 0.0, 1.0);
    clamp(normalized_intensity * 0.4 + confidence * 0.4 + novelty * 0.2, 0.0, 1.0)
}
