//! Ingestion: sources, scheduling, and the extraction pipeline
//!
//! A long-running scheduler seeds and scores search tasks across content
//! sources, fans them out under per-source circuit breakers and adaptive
//! concurrency, extracts structured pain snippets via the LLM, persists
//! everything, and decides when to stop.

mod breaker;
mod complexity;
mod cost;
mod extract;
mod filters;
mod parallel;
mod pipeline;
mod prompts;
mod scheduler;
mod source;
mod validation;

pub use breaker::{CircuitBreaker, RateLimiter};
pub use complexity::{TopicComplexity, assess_complexity, iteration_budget};
pub use cost::{CostTotals, CostTracker};
pub use extract::Extractor;
pub use filters::{ContentFilter, FilterConfig};
pub use parallel::{ParallelExecutor, SuccessRateTracker, TaskOutcome};
pub use pipeline::{ExtractionPipeline, PipelineResult};
pub use prompts::{DEFAULT_EXTRACTION_PROMPT_VERSION, extraction_prompt};
pub use scheduler::IngestionScheduler;
pub use source::{DeepComments, Source, SourceError};
pub use validation::{SnippetValidationConfig, SnippetValidator};

/// Entities used to derive follow-up queries
pub const MAX_ENTITIES_FOR_FOLLOWUP: usize = 3;

/// Follow-up queries accepted from one extraction
pub const MAX_FOLLOWUP_QUERIES: usize = 2;

/// Knowledge items injected into extraction prompts
pub const KNOWLEDGE_CONTEXT_SIZE: usize = 20;

/// Raw-text budget for extraction prompts
pub const CONTENT_TRUNCATION_LIMIT: usize = 8000;
