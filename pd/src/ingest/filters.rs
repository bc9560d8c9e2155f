//! Content filter - cheap rejection before the LLM sees a document

use serde::{Deserialize, Serialize};

use signalstore::RawDocument;

/// Filter thresholds, configurable per run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub min_content_length: usize,
    pub min_score: i64,
    pub skip_deleted_authors: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_content_length: 100,
            min_score: 5,
            skip_deleted_authors: true,
        }
    }
}

/// Decides whether a document is worth an extraction call.
///
/// The reason string feeds the `doc_filtered` event.
pub struct ContentFilter {
    config: FilterConfig,
}

impl ContentFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn should_extract(&self, doc: &RawDocument) -> (bool, &'static str) {
        if self.config.min_content_length > 0 && doc.raw_text.len() < self.config.min_content_length {
            return (false, "too_short");
        }
        if let Some(score) = doc.score
            && score < self.config.min_score
        {
            return (false, "low_score");
        }
        if self.config.skip_deleted_authors && doc.author.as_deref() == Some("[deleted]") {
            return (false, "deleted_author");
        }
        (true, "pass")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signalstore::utc_now;

    fn doc(text: &str, score: Option<i64>, author: Option<&str>) -> RawDocument {
        RawDocument {
            doc_id: "d1".to_string(),
            source: "news".to_string(),
            source_entity: "all".to_string(),
            url: "https://example.com".to_string(),
            permalink: "https://example.com".to_string(),
            retrieved_at: utc_now(),
            published_at: None,
            title: "t".to_string(),
            raw_text: text.to_string(),
            author: author.map(String::from),
            score,
            num_comments: None,
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_filter_reasons() {
        let filter = ContentFilter::new(FilterConfig::default());
        let long_text = "x".repeat(200);

        assert_eq!(filter.should_extract(&doc("short", Some(10), None)), (false, "too_short"));
        assert_eq!(filter.should_extract(&doc(&long_text, Some(1), None)), (false, "low_score"));
        assert_eq!(
            filter.should_extract(&doc(&long_text, Some(10), Some("[deleted]"))),
            (false, "deleted_author")
        );
        assert_eq!(filter.should_extract(&doc(&long_text, Some(10), Some("alice"))), (true, "pass"));
        // Scoreless documents pass the score check
        assert_eq!(filter.should_extract(&doc(&long_text, None, None)), (true, "pass"));
    }
}
