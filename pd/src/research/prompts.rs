//! Prompt builders for planning, synthesis, and drafting
//!
//! All prompts demand raw JSON where structure matters; the parsers in
//! `planning.rs` tolerate one fenced code block on top of that.

use serde_json::Value;

use super::memo::ResearchMemo;
use super::types::{ReportType, WorkerFinding};

pub(crate) fn planning_prompt(query: &str, max_tasks: u32, report_type: ReportType) -> String {
    let catalog_rules = if report_type == ReportType::Catalog {
        "\n- This is a CATALOG request: tasks must discover concrete providers/services and capture \
         pricing + proof links (case studies/testimonials) with URLs.\n\
         - Prefer tasks that map to distinct categories so we can find >= 2x candidates for selection."
    } else {
        ""
    };
    format!(
        "You are a research orchestrator.\n\n\
         Goal: propose a set of web searches to answer the user query.\n\n\
         User query:\n{query}\n\n\
         Return ONLY valid JSON in this exact shape:\n\
         {{\n  \"tasks\": [\n    {{\n      \"id\": \"short_id\",\n      \"search_query\": \"web search query\",\n      \"instructions\": \"what to look for and what to return\"\n    }}\n  ]\n}}\n\n\
         Rules:\n\
         - Provide 3 to {max_tasks} tasks.\n\
         - Prefer diverse angles (definitions, market map, pros/cons, recent changes, technical details).\n\
         - Each task must be answerable via web search results (URLs).{catalog_rules}\n"
    )
}

pub(crate) fn gap_fill_prompt(query: &str, memo: &ResearchMemo, max_tasks: u32) -> String {
    format!(
        "You are a research orchestrator.\n\n\
         Goal: propose follow-up web searches to fill gaps after the previous round.\n\n\
         User query:\n{query}\n\n\
         Memo (bounded context from the previous round):\n{memo}\n\n\
         Return ONLY valid JSON in this exact shape:\n\
         {{\n  \"gaps\": [\n    {{\n      \"gap_type\": \"missing_topic|weak_evidence|missing_field|missing_candidates\",\n      \"description\": \"string\",\n      \"priority\": 1,\n      \"suggested_query\": \"string (optional)\"\n    }}\n  ],\n  \"tasks\": [\n    {{\n      \"id\": \"short_id\",\n      \"search_query\": \"web search query\",\n      \"instructions\": \"what to look for and what to return\"\n    }}\n  ]\n}}\n\n\
         Rules:\n\
         - Provide 0 to {max_tasks} tasks.\n\
         - Tasks MUST address the gaps you listed (use suggested_query when appropriate).\n\
         - Prefer NEW domains and NEW query variants.\n\
         - Return ONLY raw JSON (no markdown, no code fences).\n",
        memo = memo.planner_context(8000),
    )
}

pub(crate) fn verification_prompt(query: &str, memo: &ResearchMemo, max_tasks: u32) -> String {
    format!(
        "You are a research orchestrator.\n\n\
         Goal: propose web searches to VERIFY and corroborate the most important claims so far.\n\n\
         User query:\n{query}\n\n\
         Memo (bounded context from previous rounds):\n{memo}\n\n\
         Return ONLY valid JSON in this exact shape:\n\
         {{\n  \"claims_to_verify\": [\n    {{\n      \"claim_text\": \"string\",\n      \"source_url\": \"https://...\",\n      \"confidence\": \"high|medium|low\",\n      \"verification_query\": \"web search query\"\n    }}\n  ],\n  \"tasks\": [\n    {{\n      \"id\": \"short_id\",\n      \"search_query\": \"web search query\",\n      \"instructions\": \"what to verify and what to return (must include URLs)\"\n    }}\n  ]\n}}\n\n\
         Rules:\n\
         - Provide 0 to {max_tasks} tasks.\n\
         - Prefer independent sources and NEW domains (not the same source_url domain).\n\
         - Seek corroboration OR contradiction (complaints, pricing changes, independent reviews).\n\
         - Return ONLY raw JSON (no markdown, no code fences).\n",
        memo = memo.planner_context(8000),
    )
}

pub(crate) fn synthesis_prompt(query: &str, findings: &[WorkerFinding], require_quotes: bool) -> String {
    let findings_json = serde_json::to_string(findings).unwrap_or_else(|_| "[]".to_string());

    let (findings_shape, rules) = if require_quotes {
        (
            "{\n      \"claim\": \"string\",\n      \"evidence\": [\n        {\n          \"url\": \"https://...\",\n          \"quote\": \"A short direct quote copied from the extracted page content.\"\n        }\n      ]\n    }",
            "- Every `evidence[].url` MUST be a URL present in the worker evidence/extracted sources.\n\
             - Every `evidence[].quote` MUST be copied from that URL's extracted content (no paraphrased quotes).\n\
             - Base claims only on information supported by the quotes + sources.\n\
             - If you cannot support a claim with evidence, omit it.",
        )
    } else {
        (
            "{\n      \"claim\": \"string\",\n      \"citations\": [\"https://...\"]\n    }",
            "- Every item in `findings[].citations` MUST be a URL present in the worker findings citations.\n\
             - Base claims only on information supported by the cited sources (use source titles/snippets in the worker findings).\n\
             - If you cannot support a claim with citations, omit it.",
        )
    };

    let extra_rules = if require_quotes {
        ""
    } else {
        "\n- Use as many unique citations as practical from the provided worker findings.\n\
         - Prefer sources that look like official docs/specs/references (/docs, /spec, /reference, /api, /security) or credible organizations.\n\
         - Avoid reusing the exact same citation URLs across multiple findings unless necessary."
    };

    format!(
        "You are a research synthesizer.\n\n\
         User query:\n{query}\n\n\
         Worker findings (JSON):\n{findings_json}\n\n\
         Return ONLY valid JSON in this exact shape:\n\
         {{\n  \"title\": \"string\",\n  \"summary_bullets\": [\"string\"],\n  \"findings\": [\n    {findings_shape}\n  ],\n  \"open_questions\": [\"string\"]\n}}\n\n\
         Rules:\n{rules}{extra_rules}\n\
         - Be explicit about uncertainty.\n"
    )
}

/// The allowed-URL list appended to synthesis and repair prompts
pub(crate) fn allowed_sources_block(urls: &[String], max_items: usize) -> String {
    let cleaned: Vec<&String> = urls.iter().filter(|u| u.starts_with("http")).take(max_items).collect();
    if cleaned.is_empty() {
        return String::new();
    }
    let mut lines = vec!["Allowed citation URLs (you MUST cite ONLY from this list):".to_string()];
    for (i, url) in cleaned.iter().enumerate() {
        lines.push(format!("- S{}: {url}", i + 1));
    }
    lines.join("\n")
}

pub(crate) fn outline_prompt(query: &str, findings: &Value) -> String {
    format!(
        "You are a research outline planner.\n\n\
         User query:\n{query}\n\n\
         Worker findings (JSON):\n{findings}\n\n\
         Return ONLY valid JSON:\n\
         {{\n  \"sections\": [\n    {{\n      \"id\": \"s1\",\n      \"title\": \"string\",\n      \"task_ids\": [\"task1\", \"task2\"]\n    }}\n  ]\n}}\n\n\
         Rules:\n\
         - Provide 4 to 8 sections.\n\
         - Each section must reference 1+ existing task_ids from the worker findings.\n\
         - Prefer a logical structure: context, then specifics, then risks and recommendations.\n"
    )
}

pub(crate) fn section_findings_prompt(query: &str, section_title: &str, evidence: &Value) -> String {
    format!(
        "You are a research writer for one section of a report.\n\n\
         User query:\n{query}\n\n\
         Section:\n{section_title}\n\n\
         Evidence (JSON). Quotes MUST be copied from these excerpts exactly:\n{evidence}\n\n\
         Return ONLY valid JSON:\n\
         {{\n  \"findings\": [\n    {{\n      \"claim\": \"string\",\n      \"evidence\": [\n        {{\"url\": \"https://...\", \"quote\": \"copied excerpt\"}}\n      ]\n    }}\n  ]\n}}\n\n\
         Rules:\n\
         - Provide 3 to 5 findings for this section (keep output compact).\n\
         - Every finding must include 1-2 evidence items (prefer 2 when possible).\n\
         - Every evidence.url must appear in the provided Evidence list.\n\
         - Every evidence.quote must be a substring copied from that URL's excerpt.\n\
         - Keep each `claim` short (<= 200 chars) and each `quote` short (<= 240 chars).\n\
         - Return ONLY raw JSON (no markdown, no code fences).\n"
    )
}

pub(crate) fn summary_prompt(query: &str, claims: &[String]) -> String {
    let claims_json = serde_json::to_string(claims).unwrap_or_else(|_| "[]".to_string());
    format!(
        "You are a research summarizer.\n\n\
         User query:\n{query}\n\n\
         Accepted claims (bullet list):\n{claims_json}\n\n\
         Return ONLY valid JSON:\n\
         {{\n  \"title\": \"string\",\n  \"summary_bullets\": [\"string\"],\n  \"open_questions\": [\"string\"]\n}}\n\n\
         Rules:\n\
         - Write 5 to 10 summary bullets grounded in the claims.\n\
         - Write 3 to 8 open questions for follow-up research.\n"
    )
}

pub(crate) fn catalog_synthesis_prompt(
    query: &str,
    target_items: u32,
    required_fields: &[String],
    findings: &[WorkerFinding],
    allowed_urls: &[String],
) -> String {
    let findings_json = serde_json::to_string(findings).unwrap_or_else(|_| "[]".to_string());
    let fields_str = required_fields.join(", ");
    let allowed_block = allowed_sources_block(allowed_urls, 60);
    format!(
        "You are a research writer producing a structured catalog.\n\n\
         User query:\n{query}\n\n\
         Worker findings (JSON). Candidate items and evidence come from here:\n{findings_json}\n\n\
         Return ONLY valid JSON (no markdown, no code fences), in this exact shape:\n\
         {{\n  \"title\": \"string\",\n  \"summary_bullets\": [\"string\"],\n  \"items\": [\n    {{\n      \"name\": \"string\",\n      \"provider\": \"string\",\n      \"website_url\": \"https://...\",\n      \"problem_solved\": \"string\",\n      \"who_its_for\": \"string\",\n      \"how_ai_is_used\": \"string\",\n      \"pricing_model\": \"string\",\n      \"why_evergreen\": \"string\",\n      \"replicable_with\": \"string\",\n      \"proof_links\": [\"https://...\"],\n      \"evidence\": [\n        {{\"url\": \"https://...\", \"quote\": \"copied excerpt\"}}\n      ]\n    }}\n  ],\n  \"open_questions\": [\"string\"]\n}}\n\n\
         Rules:\n\
         - Produce up to {target_items} items.\n\
         - Every URL field MUST be present in the allowed citation URLs.\n\
         - Every item SHOULD include at least one proof link (case study/testimonial/service page).\n\
         - Every quote MUST be copied exactly from that URL's evidence excerpt.\n\
         - If a field is unknown, write an empty string, but prefer to find it.\n\
         - Required fields for this request: {fields_str}\n\n\
         {allowed_block}\n"
    )
}

pub(crate) fn draft_refine_prompt(query: &str, report_type: ReportType, draft: &str, findings: &Value) -> String {
    let current = if draft.trim().is_empty() { "(empty - first iteration)" } else { draft };
    format!(
        "You are refining a research draft based on new findings.\n\n\
         Query: {query}\n\
         Report type: {report_type}\n\n\
         Current draft:\n{current}\n\n\
         New findings (JSON):\n{findings}\n\n\
         STRICT RULES:\n\
         - Do NOT add new factual claims unless DIRECTLY supported by the New findings above\n\
         - If information is uncertain or unverified, mark it as [TBD] or [needs verification]\n\
         - Remove or update any information that contradicts the new findings\n\
         - Keep the draft concise (max 2000 words)\n\n\
         FORMAT:\n\
         End the draft with a \"## Still Missing\" section listing:\n\
         - Information gaps that need more research\n\
         - Claims that need verification\n\
         - Topics not yet covered\n\n\
         Return ONLY the updated draft text. No JSON, no code fences.\n"
    )
}

pub(crate) fn draft_continuation_prompt(query: &str, draft: &str, max_tasks: u32) -> String {
    let current = if draft.trim().is_empty() { "(no draft yet)" } else { draft };
    format!(
        "You are a research orchestrator.\n\n\
         Goal: propose follow-up web searches that fill the gaps the current draft names.\n\n\
         User query:\n{query}\n\n\
         Current draft (read its \"Still Missing\" section carefully):\n{current}\n\n\
         Return ONLY valid JSON in this exact shape:\n\
         {{\n  \"tasks\": [\n    {{\n      \"id\": \"short_id\",\n      \"search_query\": \"web search query\",\n      \"instructions\": \"what to look for and what to return\"\n    }}\n  ]}}\n\n\
         Rules:\n\
         - Provide 0 to {max_tasks} tasks.\n\
         - Prefer NEW domains and NEW query variants over repeating earlier searches.\n\
         - Return ONLY raw JSON (no markdown, no code fences).\n"
    )
}
