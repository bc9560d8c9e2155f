//! Extraction pipeline - content filter, then prompted extraction

use signalstore::{ExtractionResult, RawDocument};

use super::cost::CostTracker;
use super::extract::Extractor;
use super::filters::ContentFilter;

/// What happened to one document
#[derive(Debug)]
pub struct PipelineResult {
    pub filtered: bool,
    pub reason: &'static str,
    pub extraction: Option<ExtractionResult>,
}

/// Filter → extract. Filtered documents never reach the LLM.
pub struct ExtractionPipeline {
    content_filter: ContentFilter,
    extractor: Extractor,
}

impl ExtractionPipeline {
    pub fn new(content_filter: ContentFilter, extractor: Extractor) -> Self {
        Self {
            content_filter,
            extractor,
        }
    }

    pub async fn process(
        &self,
        doc: &RawDocument,
        topic: &str,
        knowledge: &[String],
        cost: &CostTracker,
    ) -> PipelineResult {
        let (should_extract, reason) = self.content_filter.should_extract(doc);
        if !should_extract {
            return PipelineResult {
                filtered: true,
                reason,
                extraction: None,
            };
        }

        let extraction = self.extractor.extract(doc, topic, knowledge, cost).await;
        PipelineResult {
            filtered: false,
            reason: "extracted",
            extraction: Some(extraction),
        }
    }
}
