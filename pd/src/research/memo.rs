//! Round memos - bounded-context snapshots passed between rounds
//!
//! Planners consume a memo, never a live reference back to the
//! orchestrator. The source summary is bounded (at most 20 entries, at most
//! 3 per domain, evidence-bearing URLs first) so planner prompts stay small
//! and deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::agent::domain_for;

use super::planning::parse_planner_json;
use super::types::{
    ReportType, ResearchConfig, WorkerFinding, detect_required_fields, detect_target_items, normalize_ws,
};

/// How complete one catalog field is for a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldStatus {
    Missing,
    Partial,
    Found,
}

/// One bounded source-summary entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    pub url: String,
    pub domain: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub has_evidence: bool,
    #[serde(default)]
    pub relevance: String,
}

/// A coverage or evidence gap the next round should address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gap {
    pub gap_type: String,
    pub description: String,
    pub priority: u32,
    #[serde(default)]
    pub candidate_name: Option<String>,
    #[serde(default)]
    pub missing_fields: Vec<String>,
    #[serde(default)]
    pub suggested_query: Option<String>,
}

/// One catalog candidate parsed from worker outputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogCandidate {
    pub name: String,
    #[serde(default)]
    pub provider_url: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldStatus>,
    #[serde(default)]
    pub evidence_urls: Vec<String>,
}

/// Catalog-specific memo extension
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogMemo {
    pub target_items: u32,
    pub required_fields: Vec<String>,
    pub candidates: Vec<CatalogCandidate>,
}

/// Immutable value snapshot of one research round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchMemo {
    pub query: String,
    pub report_type: ReportType,
    pub round_index: u32,
    pub tasks_completed: usize,
    pub tasks_remaining: usize,
    pub unique_citations: usize,
    pub unique_domains: usize,
    pub pages_extracted: usize,
    pub sources_summary: Vec<SourceEntry>,
    pub gaps: Vec<Gap>,
    #[serde(default)]
    pub catalog: Option<CatalogMemo>,
}

fn relevance_for(url: &str) -> &'static str {
    let path = url.to_lowercase();
    if ["/pricing", "pricing", "plans", "case-study", "case-studies", "customer"]
        .iter()
        .any(|k| path.contains(k))
    {
        return "pricing";
    }
    if ["/docs", "/spec", "/reference", "/api", "/security"].iter().any(|k| path.contains(k)) {
        return "reference";
    }
    "overview"
}

impl ResearchMemo {
    /// Build the memo for a completed round
    pub fn build(
        config: &ResearchConfig,
        query: &str,
        report_type: ReportType,
        round_index: u32,
        tasks_remaining: usize,
        findings: &[WorkerFinding],
    ) -> Self {
        let mut urls = std::collections::BTreeSet::new();
        let mut evidence_urls = std::collections::BTreeSet::new();
        let mut sources: BTreeMap<String, (String, bool)> = BTreeMap::new();
        let mut pages_extracted = 0usize;

        for f in findings {
            for u in &f.citations {
                if u.starts_with("http") {
                    urls.insert(u.clone());
                }
            }
            for (u, meta) in &f.sources {
                if u.starts_with("http") {
                    sources.insert(u.clone(), (meta.title.clone().unwrap_or_default(), false));
                }
            }
            for ev in &f.evidence {
                if ev.url.starts_with("http") {
                    evidence_urls.insert(ev.url.clone());
                }
            }
            pages_extracted += f.evidence.len();
        }

        let domains: std::collections::BTreeSet<String> =
            urls.iter().map(|u| domain_for(u)).filter(|d| !d.is_empty()).collect();

        // Sources summary: evidence-bearing first, <= 3 per domain, <= 20 total
        let mut sources_summary = Vec::new();
        let mut per_domain: BTreeMap<String, usize> = BTreeMap::new();
        let ordered: Vec<String> = evidence_urls
            .iter()
            .cloned()
            .chain(urls.iter().filter(|u| !evidence_urls.contains(*u)).cloned())
            .collect();
        for url in ordered {
            let domain = domain_for(&url);
            if domain.is_empty() {
                continue;
            }
            let count = per_domain.entry(domain.clone()).or_insert(0);
            if *count >= 3 {
                continue;
            }
            *count += 1;
            let title = sources.get(&url).map(|(t, _)| t.clone()).unwrap_or_default();
            sources_summary.push(SourceEntry {
                relevance: relevance_for(&url).to_string(),
                has_evidence: evidence_urls.contains(&url),
                title,
                domain,
                url,
            });
            if sources_summary.len() >= 20 {
                break;
            }
        }

        let unique_citations = urls.len();
        let unique_domains = domains.len();
        let tasks_completed = findings.len();

        if report_type == ReportType::Catalog {
            let target_items = detect_target_items(query).unwrap_or(5);
            let required_fields = normalize_catalog_required_fields(&detect_required_fields(query));
            let candidates = extract_catalog_candidates(findings, &required_fields);
            let gaps = catalog_gaps(&candidates, target_items);
            return Self {
                query: query.to_string(),
                report_type,
                round_index,
                tasks_completed,
                tasks_remaining,
                unique_citations,
                unique_domains,
                pages_extracted,
                sources_summary,
                gaps,
                catalog: Some(CatalogMemo {
                    target_items,
                    required_fields,
                    candidates,
                }),
            };
        }

        // Narrative gaps: deterministic coverage/evidence gaps only
        let mut gaps = Vec::new();
        let min_domains_target = config.min_total_domains.max(config.report_min_unique_domains_target);
        let min_citations_target = config.min_total_citations.max(config.report_min_unique_citations_target);

        if min_domains_target > 0 && unique_domains < min_domains_target {
            gaps.push(Gap {
                gap_type: "coverage_domains".to_string(),
                description: format!("Need more unique domains: {unique_domains} < {min_domains_target}"),
                priority: 1,
                candidate_name: None,
                missing_fields: Vec::new(),
                suggested_query: Some(format!("{query} official docs specification reference")),
            });
        }
        if min_citations_target > 0 && unique_citations < min_citations_target {
            gaps.push(Gap {
                gap_type: "coverage_citations".to_string(),
                description: format!("Need more unique citations: {unique_citations} < {min_citations_target}"),
                priority: 2,
                candidate_name: None,
                missing_fields: Vec::new(),
                suggested_query: Some(format!("{query} overview guide examples")),
            });
        }
        if config.enable_deep_read && config.require_quote_per_claim && pages_extracted == 0 {
            gaps.push(Gap {
                gap_type: "missing_evidence".to_string(),
                description: "Need extracted page evidence (quotes) for grounded claims".to_string(),
                priority: 1,
                candidate_name: None,
                missing_fields: Vec::new(),
                suggested_query: Some(format!("{query} documentation")),
            });
        }
        gaps.truncate(10);

        Self {
            query: query.to_string(),
            report_type,
            round_index,
            tasks_completed,
            tasks_remaining,
            unique_citations,
            unique_domains,
            pages_extracted,
            sources_summary,
            gaps,
            catalog: None,
        }
    }

    /// Render the memo as bounded planner context
    pub fn planner_context(&self, max_chars: usize) -> String {
        let mut lines = Vec::new();
        lines.push(format!("## Research Memo (Round {})", self.round_index));
        lines.push(format!("Report Type: {}", self.report_type));
        lines.push(String::new());
        lines.push("## Progress".to_string());
        lines.push(format!("- Tasks completed: {}", self.tasks_completed));
        lines.push(format!("- Tasks remaining: {}", self.tasks_remaining));
        lines.push(format!("- Unique citations: {}", self.unique_citations));
        lines.push(format!("- Unique domains: {}", self.unique_domains));
        lines.push(format!("- Pages extracted: {}", self.pages_extracted));
        lines.push(String::new());

        if !self.sources_summary.is_empty() {
            lines.push("## Sources Summary (bounded)".to_string());
            for s in self.sources_summary.iter().take(20) {
                let ev = if s.has_evidence { " evidence" } else { "" };
                let title = if s.title.is_empty() { String::new() } else { format!(" \u{2014} {}", s.title) };
                lines.push(format!("- {}{}: {}{}", s.domain, ev, s.url, title));
            }
            lines.push(String::new());
        }
        if !self.gaps.is_empty() {
            lines.push("## Gaps to Fill".to_string());
            for g in self.gaps.iter().take(10) {
                lines.push(format!("- [P{}] {}", g.priority, g.description));
                if let Some(q) = &g.suggested_query {
                    lines.push(format!("  Suggested query: {q}"));
                }
            }
            lines.push(String::new());
        }
        if let Some(catalog) = &self.catalog {
            lines.push(format!(
                "## Candidates ({}/{} target)",
                catalog.candidates.len(),
                catalog.target_items * 2
            ));
            for c in catalog.candidates.iter().take(10) {
                let missing: Vec<&str> = c
                    .fields
                    .iter()
                    .filter(|(_, v)| **v == FieldStatus::Missing)
                    .map(|(k, _)| k.as_str())
                    .collect();
                let status = if missing.is_empty() {
                    "complete".to_string()
                } else {
                    format!("missing: {}", missing.join(", "))
                };
                lines.push(format!("- {}: {}", c.name, status));
            }
            lines.push(String::new());
        }

        let mut text = lines.join("\n").trim().to_string();
        text.push('\n');
        if text.chars().count() <= max_chars {
            return text;
        }
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{}\n\u{2026}(memo truncated)\n", truncated.trim_end())
    }
}

/// Map user-provided field labels to the canonical catalog keys.
///
/// The essentials are always required so the catalog stays usable.
pub(crate) fn normalize_catalog_required_fields(raw_fields: &[String]) -> Vec<String> {
    let mut canonical: Vec<String> = Vec::new();
    let add = |key: &str, canonical: &mut Vec<String>| {
        if !canonical.iter().any(|k| k == key) {
            canonical.push(key.to_string());
        }
    };

    for field in raw_fields {
        let s = field.trim().to_lowercase();
        if s.is_empty() {
            continue;
        }
        if s.contains("url") || (s.contains("website") && s.contains("provider")) || s.contains("website") {
            add("website_url", &mut canonical);
        } else if s.contains("pricing") || s.contains("price") || s.contains("retainer") || s.contains("contract") {
            add("pricing_model", &mut canonical);
        } else if s.contains("case") || s.contains("testimonial") || s.contains("proof") {
            add("proof_links", &mut canonical);
        } else if s.contains("problem") {
            add("problem_solved", &mut canonical);
        } else if s.contains("for whom") || s.contains("who") || s.contains("customer") {
            add("who_its_for", &mut canonical);
        } else if s.contains("automation") || s.contains("ai") {
            add("how_ai_is_used", &mut canonical);
        } else if s.contains("evergreen") {
            add("why_evergreen", &mut canonical);
        } else if s.contains("replic") || s.contains("tools") {
            add("replicable_with", &mut canonical);
        } else if s.contains("name") || s.contains("provider") || s.contains("company") {
            add("name", &mut canonical);
        }
    }

    for key in ["name", "website_url", "problem_solved", "pricing_model", "proof_links"] {
        add(key, &mut canonical);
    }
    canonical.truncate(30);
    canonical
}

/// Parse worker outputs for catalog runs (workers return JSON with a
/// top-level `candidates` array)
pub(crate) fn extract_catalog_candidates(findings: &[WorkerFinding], required_fields: &[String]) -> Vec<CatalogCandidate> {
    let mut out = Vec::new();
    let mut seen = std::collections::BTreeSet::new();

    for f in findings {
        let raw = f.output.trim();
        if raw.is_empty() {
            continue;
        }
        let Ok(payload) = parse_planner_json(raw) else { continue };
        let Some(items) = payload["candidates"].as_array() else { continue };

        for item in items {
            let name = item["name"]
                .as_str()
                .or_else(|| item["provider"].as_str())
                .or_else(|| item["company"].as_str())
                .unwrap_or("")
                .trim()
                .to_string();
            if name.is_empty() {
                continue;
            }
            if !seen.insert(name.to_lowercase()) {
                continue;
            }

            let provider_url = item["website_url"]
                .as_str()
                .or_else(|| item["provider_url"].as_str())
                .or_else(|| item["url"].as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from);

            let mut fields = BTreeMap::new();
            for rf in required_fields {
                let value = if rf == "website_url" {
                    provider_url.clone().map(serde_json::Value::String).unwrap_or(serde_json::Value::Null)
                } else {
                    item[rf.as_str()].clone()
                };
                let status = match &value {
                    serde_json::Value::String(s) if !s.trim().is_empty() => FieldStatus::Found,
                    serde_json::Value::Array(items)
                        if items.iter().any(|x| x.as_str().is_some_and(|s| !s.trim().is_empty())) =>
                    {
                        FieldStatus::Found
                    }
                    _ => FieldStatus::Missing,
                };
                fields.insert(rf.clone(), status);
            }

            out.push(CatalogCandidate {
                name,
                provider_url,
                fields,
                evidence_urls: Vec::new(),
            });
        }
    }

    out
}

/// Deterministic catalog gaps: missing candidates, then missing fields
pub(crate) fn catalog_gaps(candidates: &[CatalogCandidate], target_items: u32) -> Vec<Gap> {
    let mut gaps = Vec::new();
    let want = target_items.max(1) as usize * 2;
    if candidates.len() < want {
        gaps.push(Gap {
            gap_type: "missing_candidates".to_string(),
            description: format!("Need more candidates: have {}, want {want}", candidates.len()),
            priority: 1,
            candidate_name: None,
            missing_fields: Vec::new(),
            suggested_query: Some("AI service provider pricing case study".to_string()),
        });
    }

    for c in candidates {
        let missing: Vec<String> = c
            .fields
            .iter()
            .filter(|(_, v)| **v == FieldStatus::Missing)
            .map(|(k, _)| k.clone())
            .collect();
        if missing.is_empty() {
            continue;
        }
        let priority = if missing.iter().any(|m| m.contains("pricing")) { 1 } else { 2 };
        let suggested = if missing.iter().any(|m| m.contains("pricing")) {
            format!("\"{}\" pricing cost plans", c.name)
        } else if missing.iter().any(|m| m.contains("proof") || m.contains("case")) {
            format!("\"{}\" case study customer testimonial", c.name)
        } else {
            format!("\"{}\" {}", c.name, missing.join(" "))
        };
        gaps.push(Gap {
            gap_type: "missing_field".to_string(),
            description: format!("{}: missing {}", c.name, missing.join(", ")),
            priority,
            candidate_name: Some(c.name.clone()),
            missing_fields: missing,
            suggested_query: Some(suggested),
        });
    }

    gaps.sort_by_key(|g| g.priority);
    gaps.truncate(10);
    gaps
}

/// Trim a finding's note for outline prompts
pub(crate) fn compact_findings_for_outline(findings: &[WorkerFinding]) -> serde_json::Value {
    let compact: Vec<serde_json::Value> = findings
        .iter()
        .filter(|f| !f.task_id.is_empty())
        .map(|f| {
            let mut note = normalize_ws(&f.output);
            if note.chars().count() > 800 {
                note = note.chars().take(800).collect::<String>().trim_end().to_string();
                note.push('\u{2026}');
            }
            let urls: Vec<&String> = f.citations.iter().filter(|u| u.starts_with("http")).collect();
            serde_json::json!({
                "task_id": f.task_id,
                "success": f.success,
                "citations_count": urls.len(),
                "top_urls": urls.iter().take(6).collect::<Vec<_>>(),
                "note": note,
            })
        })
        .collect();
    serde_json::Value::Array(compact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::EvidenceRecord;

    fn finding(task_id: &str, citations: &[&str], evidence_urls: &[&str]) -> WorkerFinding {
        WorkerFinding {
            task_id: task_id.to_string(),
            success: true,
            output: "note".to_string(),
            error: None,
            citations: citations.iter().map(|s| s.to_string()).collect(),
            sources: Default::default(),
            evidence: evidence_urls
                .iter()
                .map(|u| EvidenceRecord {
                    url: u.to_string(),
                    title: String::new(),
                    excerpt: "body".to_string(),
                    sha256: String::new(),
                    raw_len: 4,
                    truncated: false,
                })
                .collect(),
            web_search_calls: 1,
            web_extract_calls: evidence_urls.len() as u32,
        }
    }

    #[test]
    fn test_memo_counts_and_summary() {
        let config = ResearchConfig::default();
        let findings = vec![
            finding("t1", &["https://a.com/1", "https://a.com/2"], &["https://a.com/1"]),
            finding("t2", &["https://b.com/x"], &[]),
        ];
        let memo = ResearchMemo::build(&config, "query", ReportType::Narrative, 1, 0, &findings);

        assert_eq!(memo.unique_citations, 3);
        assert_eq!(memo.unique_domains, 2);
        assert_eq!(memo.pages_extracted, 1);
        // Evidence-bearing URL sorts first
        assert_eq!(memo.sources_summary[0].url, "https://a.com/1");
        assert!(memo.sources_summary[0].has_evidence);
    }

    #[test]
    fn test_memo_sources_bounded_per_domain() {
        let config = ResearchConfig::default();
        let urls: Vec<String> = (0..6).map(|i| format!("https://same.com/{i}")).collect();
        let url_refs: Vec<&str> = urls.iter().map(String::as_str).collect();
        let findings = vec![finding("t1", &url_refs, &[])];
        let memo = ResearchMemo::build(&config, "q", ReportType::Narrative, 1, 0, &findings);
        assert_eq!(memo.sources_summary.len(), 3);
    }

    #[test]
    fn test_narrative_gaps_track_targets() {
        let config = ResearchConfig {
            min_total_domains: 3,
            min_total_citations: 5,
            ..Default::default()
        };
        let findings = vec![finding("t1", &["https://a.com/1"], &[])];
        let memo = ResearchMemo::build(&config, "q", ReportType::Narrative, 1, 2, &findings);

        let kinds: Vec<&str> = memo.gaps.iter().map(|g| g.gap_type.as_str()).collect();
        assert!(kinds.contains(&"coverage_domains"));
        assert!(kinds.contains(&"coverage_citations"));
    }

    #[test]
    fn test_normalize_required_fields_adds_essentials() {
        let fields = normalize_catalog_required_fields(&["Pricing".to_string(), "Case studies".to_string()]);
        assert!(fields.contains(&"pricing_model".to_string()));
        assert!(fields.contains(&"proof_links".to_string()));
        assert!(fields.contains(&"name".to_string()));
        assert!(fields.contains(&"website_url".to_string()));
        assert!(fields.contains(&"problem_solved".to_string()));
    }

    #[test]
    fn test_extract_catalog_candidates_dedupes_by_name() {
        let required = vec!["name".to_string(), "pricing_model".to_string()];
        let mut f1 = finding("t1", &[], &[]);
        f1.output = r#"{"candidates": [{"name": "Acme", "pricing_model": "$99/mo"}, {"name": "acme"}]}"#.to_string();
        let candidates = extract_catalog_candidates(&[f1], &required);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].fields["pricing_model"], FieldStatus::Found);
    }

    #[test]
    fn test_catalog_gaps_prioritize_pricing() {
        let mut fields = BTreeMap::new();
        fields.insert("pricing_model".to_string(), FieldStatus::Missing);
        let candidates = vec![CatalogCandidate {
            name: "Acme".to_string(),
            provider_url: None,
            fields,
            evidence_urls: Vec::new(),
        }];
        let gaps = catalog_gaps(&candidates, 1);
        let field_gap = gaps.iter().find(|g| g.gap_type == "missing_field").unwrap();
        assert_eq!(field_gap.priority, 1);
        assert!(field_gap.suggested_query.as_ref().unwrap().contains("pricing"));
    }

    #[test]
    fn test_planner_context_truncates() {
        let config = ResearchConfig::default();
        let memo = ResearchMemo::build(&config, "q", ReportType::Narrative, 1, 0, &[]);
        let ctx = memo.planner_context(40);
        assert!(ctx.contains("(memo truncated)"));
    }
}
