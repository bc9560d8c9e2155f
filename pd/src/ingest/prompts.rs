//! Versioned extraction prompt templates
//!
//! Prompt versions are recorded on every snippet so extractions stay
//! comparable across runs.

pub const DEFAULT_EXTRACTION_PROMPT_VERSION: &str = "v2";

const EXTRACT_V1: &str = "\
You analyze user-generated content for pain points about a topic.

Topic: {topic}
Source: {source}
Title: {title}
URL: {url}

Content:
{content}

Known pain points so far:
{knowledge}

Find concrete pain signals (complaints, wishes, workarounds, switching, bugs,
pricing gripes, support problems, integration or workflow friction).

Return ONLY valid JSON:
{
  \"snippets\": [
    {
      \"excerpt\": \"verbatim quote from the content\",
      \"pain_statement\": \"one-sentence normalized pain statement\",
      \"signal_type\": \"complaint|wish|workaround|switch|bug|pricing|support|integration|workflow\",
      \"intensity\": 1,
      \"confidence\": 0.0,
      \"entities\": [\"product or company names\"]
    }
  ],
  \"entities\": [\"all product/company names mentioned\"],
  \"follow_up_queries\": [\"searches that would surface more of this pain\"],
  \"novelty\": 0.0
}";

const EXTRACT_V2: &str = "\
You analyze user-generated content for pain points about a topic.

Topic: {topic}
Source: {source}
Title: {title}
URL: {url}

Content:
{content}

Known pain points so far (avoid re-reporting these; they lower novelty):
{knowledge}

Find concrete pain signals (complaints, wishes, workarounds, switching, bugs,
pricing gripes, support problems, integration or workflow friction).

Rules:
- `excerpt` must be copied verbatim from the content.
- `pain_statement` is one sentence, present tense, no hedging.
- `intensity` is 1 (mild annoyance) to 5 (deal-breaker).
- `confidence` is how sure you are this is a real pain signal.
- `novelty` is how much NEW information this document adds versus the known
  pain points (0.0 = nothing new, 1.0 = entirely new).
- Skip marketing copy and vague sentiment.

Return ONLY valid JSON:
{
  \"snippets\": [
    {
      \"excerpt\": \"verbatim quote from the content\",
      \"pain_statement\": \"one-sentence normalized pain statement\",
      \"signal_type\": \"complaint|wish|workaround|switch|bug|pricing|support|integration|workflow\",
      \"intensity\": 1,
      \"confidence\": 0.0,
      \"entities\": [\"product or company names\"]
    }
  ],
  \"entities\": [\"all product/company names mentioned\"],
  \"follow_up_queries\": [\"searches that would surface more of this pain\"],
  \"novelty\": 0.0
}";

/// Template for a prompt version; unknown versions fall back to the default
pub fn extraction_prompt(version: &str) -> &'static str {
    match version {
        "v1" => EXTRACT_V1,
        "v2" => EXTRACT_V2,
        _ => EXTRACT_V2,
    }
}
