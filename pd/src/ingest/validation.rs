//! Snippet validation - drop weak or duplicate extractions

use serde::{Deserialize, Serialize};

use signalstore::PainSnippet;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnippetValidationConfig {
    pub min_confidence: f64,
    pub min_excerpt_length: usize,
    pub min_pain_statement_length: usize,
}

impl Default for SnippetValidationConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.0,
            min_excerpt_length: 10,
            min_pain_statement_length: 10,
        }
    }
}

/// Drops snippets below the configured minima and deduplicates by the
/// lowercased pain statement. Returns kept snippets and the dropped count.
pub struct SnippetValidator {
    config: SnippetValidationConfig,
}

impl SnippetValidator {
    pub fn new(config: SnippetValidationConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, snippets: Vec<PainSnippet>) -> (Vec<PainSnippet>, u32) {
        let mut seen = std::collections::BTreeSet::new();
        let mut kept = Vec::new();
        let mut dropped = 0u32;

        for mut snippet in snippets {
            let excerpt = snippet.excerpt.trim().to_string();
            let pain = snippet.pain_statement.trim().to_string();

            if excerpt.len() < self.config.min_excerpt_length
                || pain.len() < self.config.min_pain_statement_length
                || snippet.confidence < self.config.min_confidence
            {
                dropped += 1;
                continue;
            }

            let key = pain.to_lowercase();
            if !seen.insert(key) {
                dropped += 1;
                continue;
            }

            snippet.excerpt = excerpt;
            snippet.pain_statement = pain;
            kept.push(snippet);
        }

        (kept, dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signalstore::{generate_id, utc_now};

    fn snippet(excerpt: &str, pain: &str, confidence: f64) -> PainSnippet {
        PainSnippet {
            snippet_id: generate_id(),
            doc_id: "d1".to_string(),
            excerpt: excerpt.to_string(),
            pain_statement: pain.to_string(),
            signal_type: "complaint".to_string(),
            intensity: 3,
            confidence,
            quality_score: 0.5,
            entities: Vec::new(),
            extractor_model: String::new(),
            extractor_prompt_version: String::new(),
            extracted_at: utc_now(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_validator_drops_short_and_low_confidence() {
        let validator = SnippetValidator::new(SnippetValidationConfig {
            min_confidence: 0.5,
            ..Default::default()
        });
        let snippets = vec![
            snippet("long enough excerpt", "long enough statement", 0.9),
            snippet("short", "long enough statement two", 0.9),
            snippet("long enough excerpt two", "short", 0.9),
            snippet("long enough excerpt three", "long enough statement three", 0.1),
        ];

        let (kept, dropped) = validator.validate(snippets);
        assert_eq!(kept.len(), 1);
        assert_eq!(dropped, 3);
    }

    #[test]
    fn test_validator_dedupes_by_pain_statement() {
        let validator = SnippetValidator::new(SnippetValidationConfig::default());
        let snippets = vec![
            snippet("excerpt number one", "Exports keep failing", 0.9),
            snippet("excerpt number two", "exports KEEP failing", 0.9),
        ];

        let (kept, dropped) = validator.validate(snippets);
        assert_eq!(kept.len(), 1);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn test_validator_trims_whitespace() {
        let validator = SnippetValidator::new(SnippetValidationConfig::default());
        let (kept, _) = validator.validate(vec![snippet("  padded excerpt text  ", "  padded statement  ", 0.9)]);
        assert_eq!(kept[0].excerpt, "padded excerpt text");
        assert_eq!(kept[0].pain_statement, "padded statement");
    }
}
