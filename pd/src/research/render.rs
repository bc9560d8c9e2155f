//! Markdown rendering with deterministic citation numbering
//!
//! Sources are numbered in order of first citation across the findings
//! list. Each finding bullet carries a `Why:` line (source snippet or
//! title) and, in quote mode, the validated `Quote:`.

use std::collections::BTreeMap;

use serde_json::Value;

use super::orchestrator::DeepResearch;
use super::types::{SynthesisError, WorkerFinding, normalize_ws, sanitize_snippet};

/// First-seen-order citation numbering
struct CitationNumbers {
    numbers: BTreeMap<String, usize>,
    ordered: Vec<String>,
}

impl CitationNumbers {
    fn new() -> Self {
        Self {
            numbers: BTreeMap::new(),
            ordered: Vec::new(),
        }
    }

    fn number(&mut self, url: &str) -> usize {
        if let Some(n) = self.numbers.get(url) {
            return *n;
        }
        let n = self.numbers.len() + 1;
        self.numbers.insert(url.to_string(), n);
        self.ordered.push(url.to_string());
        n
    }
}

/// Per-URL metadata merged from worker sources and evidence
#[derive(Default, Clone)]
struct RenderMeta {
    title: String,
    snippet: String,
    excerpt: String,
}

fn collect_render_meta(findings: &[WorkerFinding]) -> BTreeMap<String, RenderMeta> {
    let mut meta: BTreeMap<String, RenderMeta> = BTreeMap::new();
    for f in findings {
        for (url, m) in &f.sources {
            if !url.starts_with("http") {
                continue;
            }
            let entry = meta.entry(url.clone()).or_default();
            if let Some(title) = &m.title
                && !title.trim().is_empty()
            {
                entry.title = title.trim().to_string();
            }
            if let Some(snippet) = &m.snippet
                && !snippet.trim().is_empty()
            {
                entry.snippet = sanitize_snippet(snippet);
            }
        }
        for ev in &f.evidence {
            if !ev.url.starts_with("http") {
                continue;
            }
            let entry = meta.entry(ev.url.clone()).or_default();
            if !ev.title.trim().is_empty() {
                entry.title = ev.title.trim().to_string();
            }
            if !ev.excerpt.trim().is_empty() {
                entry.excerpt = ev.excerpt.trim().to_string();
            }
        }
    }
    meta
}

fn why_line(meta: &BTreeMap<String, RenderMeta>, url: &str) -> String {
    let m = meta.get(url).cloned().unwrap_or_default();
    let snippet = if !m.excerpt.is_empty() { m.excerpt } else { m.snippet };
    if !snippet.trim().is_empty() {
        let s = normalize_ws(&snippet);
        let capped: String = s.chars().take(220).collect();
        return if s.chars().count() > 220 { format!("{capped}\u{2026}") } else { capped };
    }
    if !m.title.is_empty() {
        return m.title;
    }
    domain_or_url(url)
}

fn domain_or_url(url: &str) -> String {
    let d = crate::agent::domain_for(url);
    if d.is_empty() { url.to_string() } else { d }
}

fn push_sources_section(lines: &mut Vec<String>, numbers: &CitationNumbers, meta: &BTreeMap<String, RenderMeta>) {
    if numbers.ordered.is_empty() {
        return;
    }
    lines.push("## Sources".to_string());
    for url in &numbers.ordered {
        let n = numbers.numbers[url];
        let title = meta.get(url).map(|m| m.title.clone()).unwrap_or_default();
        let label = if title.is_empty() { url.clone() } else { format!("{title} \u{2014} {url}") };
        lines.push(format!("- [{n}]({url}) {label}"));
    }
    lines.push(String::new());
}

impl DeepResearch {
    /// Render a narrative payload into the final report
    pub(crate) fn render_from_payload(
        &self,
        _query: &str,
        findings: &[WorkerFinding],
        citations: &[String],
        payload: Value,
    ) -> Result<String, SynthesisError> {
        let title = payload["title"].as_str().unwrap_or("Deep Research Report").to_string();
        let summary = payload["summary_bullets"].as_array().cloned().unwrap_or_default();
        let findings_out = payload["findings"].as_array().cloned().unwrap_or_default();
        let open_questions = payload["open_questions"].as_array().cloned().unwrap_or_default();

        let allowed: std::collections::BTreeSet<&str> = citations.iter().map(String::as_str).collect();
        let meta = collect_render_meta(findings);
        let mut numbers = CitationNumbers::new();

        // Quote mode validates quotes against recorded evidence excerpts
        let evidence_text: BTreeMap<String, String> = if self.config.require_quote_per_claim {
            meta.iter()
                .filter(|(_, m)| !m.excerpt.trim().is_empty())
                .map(|(url, m)| (url.clone(), normalize_ws(&m.excerpt)))
                .collect()
        } else {
            BTreeMap::new()
        };

        let mut rendered_findings: Vec<String> = Vec::new();
        for item in &findings_out {
            let claim = item["claim"].as_str().unwrap_or("").trim().to_string();
            if claim.is_empty() {
                continue;
            }

            if self.config.require_quote_per_claim {
                let ev_items: Vec<(String, String)> = item["evidence"]
                    .as_array()
                    .map(|evs| {
                        evs.iter()
                            .filter_map(|e| {
                                let url = e["url"].as_str()?;
                                let quote = e["quote"].as_str()?;
                                if !allowed.contains(url) {
                                    return None;
                                }
                                let q = normalize_ws(quote);
                                let text = evidence_text.get(url)?;
                                if q.is_empty() || !text.contains(&q) {
                                    return None;
                                }
                                Some((url.to_string(), quote.trim().to_string()))
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                if ev_items.is_empty() {
                    if self.config.best_effort {
                        continue;
                    }
                    return Err(SynthesisError::new(
                        format!("Synthesis produced an unsupported claim: {claim}"),
                        payload.to_string(),
                        "synthesize",
                    ));
                }
                let nums: Vec<usize> = ev_items.iter().map(|(url, _)| numbers.number(url)).collect();
                let links: String = nums.iter().take(3).map(|n| format!("[{n}]")).collect();
                let (primary_url, primary_quote) = &ev_items[0];
                rendered_findings.push(format!("- {claim} {links}"));
                rendered_findings.push(format!("  - Why: {}", why_line(&meta, primary_url)));
                rendered_findings.push(format!("  - Quote: \u{201c}{}\u{201d}", normalize_ws(primary_quote)));
            } else {
                let cites: Vec<&str> = item["citations"]
                    .as_array()
                    .map(|cs| {
                        cs.iter()
                            .filter_map(|c| c.as_str())
                            .filter(|u| allowed.contains(u))
                            .collect()
                    })
                    .unwrap_or_default();

                if cites.is_empty() {
                    if self.config.best_effort {
                        continue;
                    }
                    return Err(SynthesisError::new(
                        format!("Synthesis produced an uncited claim: {claim}"),
                        payload.to_string(),
                        "synthesize",
                    ));
                }
                let nums: Vec<usize> = cites.iter().map(|url| numbers.number(url)).collect();
                let links: String = nums.iter().take(3).map(|n| format!("[{n}]")).collect();
                rendered_findings.push(format!("- {claim} {links}"));
                rendered_findings.push(format!("  - Why: {}", why_line(&meta, cites[0])));
            }
        }

        let mut lines = vec![format!("# {title}"), String::new()];
        if !summary.is_empty() {
            lines.push("## Summary".to_string());
            for b in summary.iter().take(12) {
                if let Some(text) = b.as_str()
                    && !text.trim().is_empty()
                {
                    lines.push(format!("- {}", text.trim()));
                }
            }
            lines.push(String::new());
        }
        if !rendered_findings.is_empty() {
            lines.push("## Findings".to_string());
            lines.extend(rendered_findings);
            lines.push(String::new());
        }
        if !open_questions.is_empty() {
            lines.push("## Open Questions".to_string());
            for q in open_questions.iter().take(12) {
                if let Some(text) = q.as_str()
                    && !text.trim().is_empty()
                {
                    lines.push(format!("- {}", text.trim()));
                }
            }
            lines.push(String::new());
        }
        push_sources_section(&mut lines, &numbers, &meta);

        Ok(lines.join("\n").trim().to_string())
    }

    /// Render a catalog payload into the final report
    pub(crate) fn render_catalog_payload(
        &self,
        payload: &Value,
        citations: &[String],
        findings: &[WorkerFinding],
    ) -> Result<String, SynthesisError> {
        let title = payload["title"].as_str().unwrap_or("Catalog Report").to_string();
        let summary = payload["summary_bullets"].as_array().cloned().unwrap_or_default();
        let items = payload["items"].as_array().cloned().unwrap_or_default();
        let open_questions = payload["open_questions"].as_array().cloned().unwrap_or_default();

        let allowed: std::collections::BTreeSet<&str> = citations.iter().map(String::as_str).collect();
        let meta = collect_render_meta(findings);
        let mut numbers = CitationNumbers::new();

        let mut lines = vec![format!("# {title}"), String::new()];
        if !summary.is_empty() {
            lines.push("## Summary".to_string());
            for b in summary.iter().take(12) {
                if let Some(text) = b.as_str()
                    && !text.trim().is_empty()
                {
                    lines.push(format!("- {}", text.trim()));
                }
            }
            lines.push(String::new());
        }

        if !items.is_empty() {
            lines.push("## Catalog".to_string());
            for (idx, item) in items.iter().enumerate() {
                if !item.is_object() {
                    continue;
                }
                let name = item["name"].as_str().map(str::trim).filter(|s| !s.is_empty());
                let name = name.map(String::from).unwrap_or_else(|| format!("Item {}", idx + 1));
                let provider = item["provider"].as_str().map(str::trim).unwrap_or("");
                let header = if provider.is_empty() {
                    format!("### {}. {name}", idx + 1)
                } else {
                    format!("### {}. {name} \u{2014} {provider}", idx + 1)
                };
                lines.push(header);

                if let Some(url) = item["website_url"].as_str()
                    && allowed.contains(url)
                {
                    let n = numbers.number(url);
                    lines.push(format!("- Website: [{n}]({url}) {url}"));
                }

                let field_line = |label: &str, key: &str, lines: &mut Vec<String>| {
                    if let Some(v) = item[key].as_str()
                        && !v.trim().is_empty()
                    {
                        lines.push(format!("- {label}: {}", v.trim()));
                    }
                };
                field_line("Problem", "problem_solved", &mut lines);
                field_line("For", "who_its_for", &mut lines);
                field_line("How AI is used", "how_ai_is_used", &mut lines);
                field_line("Pricing", "pricing_model", &mut lines);
                field_line("Evergreen", "why_evergreen", &mut lines);
                field_line("Replicable with", "replicable_with", &mut lines);

                if let Some(links) = item["proof_links"].as_array() {
                    let kept: Vec<&str> = links
                        .iter()
                        .filter_map(|l| l.as_str())
                        .filter(|u| allowed.contains(u))
                        .take(3)
                        .collect();
                    if !kept.is_empty() {
                        let rendered: Vec<String> = kept
                            .iter()
                            .map(|u| {
                                let n = numbers.number(u);
                                format!("[{n}]({u})")
                            })
                            .collect();
                        lines.push(format!("- Proof: {}", rendered.join(", ")));
                    }
                }

                if let Some(evidence) = item["evidence"].as_array() {
                    for e in evidence.iter().take(2) {
                        if let (Some(url), Some(quote)) = (e["url"].as_str(), e["quote"].as_str())
                            && allowed.contains(url)
                        {
                            let n = numbers.number(url);
                            lines.push(format!("- Quote: \u{201c}{}\u{201d} [{n}]({url})", normalize_ws(quote)));
                        }
                    }
                }
                lines.push(String::new());
            }
        }

        if !open_questions.is_empty() {
            lines.push("## Open Questions".to_string());
            for q in open_questions.iter().take(12) {
                if let Some(text) = q.as_str()
                    && !text.trim().is_empty()
                {
                    lines.push(format!("- {}", text.trim()));
                }
            }
            lines.push(String::new());
        }
        push_sources_section(&mut lines, &numbers, &meta);

        Ok(lines.join("\n").trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::SourceMeta;
    use serde_json::json;

    fn research_with(best_effort: bool, require_quotes: bool) -> DeepResearch {
        let config = super::super::types::ResearchConfig {
            best_effort,
            require_quote_per_claim: require_quotes,
            ..Default::default()
        };
        DeepResearch::for_tests(config)
    }

    fn finding_with_source(url: &str, snippet: &str) -> WorkerFinding {
        let mut sources = std::collections::BTreeMap::new();
        sources.insert(
            url.to_string(),
            SourceMeta {
                title: Some("Example Title".to_string()),
                snippet: Some(snippet.to_string()),
            },
        );
        WorkerFinding {
            task_id: "t".to_string(),
            success: true,
            output: String::new(),
            error: None,
            citations: vec![url.to_string()],
            sources,
            evidence: Vec::new(),
            web_search_calls: 1,
            web_extract_calls: 0,
        }
    }

    #[test]
    fn test_render_narrative_report() {
        let research = research_with(false, false);
        let url = "https://example.com/overview";
        let findings = vec![finding_with_source(url, "a helpful snippet")];
        let citations = vec![url.to_string()];
        let payload = json!({
            "title": "REPORT",
            "summary_bullets": ["a"],
            "findings": [{"claim": "c", "citations": [url]}],
            "open_questions": [],
        });

        let md = research.render_from_payload("query", &findings, &citations, payload).unwrap();
        assert!(md.starts_with("# REPORT"));
        assert!(md.contains("## Summary"));
        assert!(md.contains("- c [1]"));
        assert!(md.contains("Why: a helpful snippet"));
        assert!(md.contains("## Sources"));
        assert!(md.contains("[1](https://example.com/overview)"));
    }

    #[test]
    fn test_render_uncited_claim_is_fatal_unless_best_effort() {
        let url = "https://example.com/a";
        let findings = vec![finding_with_source(url, "s")];
        let citations = vec![url.to_string()];
        let payload = json!({"title": "T", "findings": [{"claim": "orphan", "citations": []}]});

        let strict = research_with(false, false);
        let err = strict
            .render_from_payload("q", &findings, &citations, payload.clone())
            .unwrap_err();
        assert!(err.message.contains("uncited claim"));

        let lenient = research_with(true, false);
        let md = lenient.render_from_payload("q", &findings, &citations, payload).unwrap();
        assert!(!md.contains("orphan"));
        assert!(!md.contains("## Findings"));
    }

    #[test]
    fn test_render_numbering_is_first_seen_order() {
        let research = research_with(false, false);
        let a = "https://a.com/1";
        let b = "https://b.com/2";
        let findings = vec![finding_with_source(a, "sa"), finding_with_source(b, "sb")];
        let citations = vec![a.to_string(), b.to_string()];
        let payload = json!({
            "title": "T",
            "findings": [
                {"claim": "second source first", "citations": [b]},
                {"claim": "then the first", "citations": [a, b]},
            ],
        });

        let md = research.render_from_payload("q", &findings, &citations, payload).unwrap();
        assert!(md.contains("- second source first [1]"));
        assert!(md.contains("- then the first [2][1]"));
        let sources_idx = md.find("## Sources").unwrap();
        let b_idx = md[sources_idx..].find("https://b.com/2").unwrap();
        let a_idx = md[sources_idx..].find("https://a.com/1").unwrap();
        assert!(b_idx < a_idx);
    }

    #[test]
    fn test_render_quote_mode_validates_substring() {
        let research = research_with(false, true);
        let url = "https://example.com/doc";
        let mut finding = finding_with_source(url, "snippet");
        finding.evidence = vec![crate::agent::EvidenceRecord {
            url: url.to_string(),
            title: "Doc".to_string(),
            excerpt: "the system retries failed calls once".to_string(),
            sha256: String::new(),
            raw_len: 36,
            truncated: false,
        }];
        let citations = vec![url.to_string()];
        let payload = json!({
            "title": "T",
            "findings": [{
                "claim": "retries happen once",
                "evidence": [{"url": url, "quote": "retries failed calls once"}],
            }],
        });

        let md = research.render_from_payload("q", &[finding], &citations, payload).unwrap();
        assert!(md.contains("Quote: \u{201c}retries failed calls once\u{201d}"));
    }

    #[test]
    fn test_render_catalog_payload() {
        let research = research_with(false, false);
        let url = "https://acme.com";
        let proof = "https://acme.com/case-study";
        let findings = vec![finding_with_source(url, "s")];
        let citations = vec![url.to_string(), proof.to_string()];
        let payload = json!({
            "title": "CATALOG",
            "summary_bullets": ["b1"],
            "items": [{
                "name": "Acme",
                "provider": "Acme Inc",
                "website_url": url,
                "problem_solved": "manual work",
                "pricing_model": "$99/mo",
                "proof_links": [proof],
            }],
        });

        let md = research.render_catalog_payload(&payload, &citations, &findings).unwrap();
        assert!(md.starts_with("# CATALOG"));
        assert!(md.contains("### 1. Acme \u{2014} Acme Inc"));
        assert!(md.contains("- Website: [1](https://acme.com)"));
        assert!(md.contains("- Pricing: $99/mo"));
        assert!(md.contains("- Proof: [2](https://acme.com/case-study)"));
        assert!(md.contains("## Sources"));
    }
}
