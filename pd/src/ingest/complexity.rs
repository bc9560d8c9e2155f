//! Topic complexity assessment
//!
//! One cheap classification call maps a topic to an iteration budget.
//! Anything unparseable defaults to medium.

use std::sync::Arc;

use tracing::{info, warn};

use crate::llm::{CompletionClient, CompletionRequest};

use super::cost::CostTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicComplexity {
    Simple,
    Medium,
    Complex,
}

impl TopicComplexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicComplexity::Simple => "simple",
            TopicComplexity::Medium => "medium",
            TopicComplexity::Complex => "complex",
        }
    }
}

/// Iteration caps per complexity tier
pub fn iteration_budget(complexity: TopicComplexity) -> u64 {
    match complexity {
        TopicComplexity::Simple => 30,
        TopicComplexity::Medium => 60,
        TopicComplexity::Complex => 100,
    }
}

fn complexity_prompt(topic: &str) -> String {
    format!(
        "Assess the research complexity of this topic:\n\n\
         Topic: \"{topic}\"\n\n\
         Complexity levels:\n\
         - SIMPLE: Single product, specific tool, narrow niche (e.g., \"HawkSoft AMS problems\", \"Notion calendar bugs\")\n\
         - MEDIUM: Industry segment, multiple products, defined scope (e.g., \"insurance broker software\", \"project management tools for agencies\")\n\
         - COMPLEX: Broad market, many dimensions, open-ended (e.g., \"small business pain points\", \"SaaS pricing problems\")\n\n\
         Respond with exactly one word: SIMPLE, MEDIUM, or COMPLEX"
    )
}

/// Classify a topic; failures default to medium
pub async fn assess_complexity(
    llm: &Arc<dyn CompletionClient>,
    topic: &str,
    model: &str,
    cost: &CostTracker,
) -> TopicComplexity {
    let request = CompletionRequest::simple(complexity_prompt(topic), 0.0, 10);
    match llm.complete(request).await {
        Ok(response) => {
            cost.record("complexity", &response.usage, model);
            let word = response.content.unwrap_or_default().trim().to_uppercase();
            let complexity = match word.as_str() {
                "SIMPLE" => TopicComplexity::Simple,
                "COMPLEX" => TopicComplexity::Complex,
                _ => TopicComplexity::Medium,
            };
            info!(topic, complexity = complexity.as_str(), "assess_complexity: classified");
            complexity
        }
        Err(e) => {
            warn!(error = %e, "assess_complexity: failed, defaulting to medium");
            TopicComplexity::Medium
        }
    }
}
