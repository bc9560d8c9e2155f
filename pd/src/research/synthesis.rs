//! Report synthesis: single-pass, multi-pass, and catalog modes
//!
//! Grounding is non-negotiable: every citation the synthesizer emits must
//! come from the allowed-URL set collected by workers. Invalid JSON gets
//! one format-only retry; grounding/coverage problems get one repair pass
//! that shows the offending payload back to the model.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::agent::{WorkerResult, domain_for};
use crate::events::AgentEvent;
use crate::llm::CompletionRequest;

use super::memo::compact_findings_for_outline;
use super::orchestrator::DeepResearch;
use super::planning::parse_planner_json;
use super::prompts;
use super::types::{
    CuratedSource, ReportType, SynthesisError, WorkerFinding, detect_required_fields, detect_target_items,
    normalize_ws,
};

/// Rank findings by citation/evidence density and keep the top `k`
pub fn select_top_findings(findings: &[WorkerFinding], k: usize) -> Vec<WorkerFinding> {
    let mut ordered: Vec<&WorkerFinding> = findings.iter().collect();
    ordered.sort_by_key(|f| std::cmp::Reverse(f.citations.len() + 2 * f.evidence.len()));
    ordered.into_iter().take(k).cloned().collect()
}

fn evidence_urls_of(finding: &Value) -> Vec<String> {
    finding["evidence"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|e| e["url"].as_str())
                .filter(|u| u.starts_with("http"))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Greedy set-cover selection of payload findings maximizing new-URL and
/// new-domain coverage. Evidence lists are reordered so an unused URL comes
/// first, and capped at 3 entries.
pub fn select_diverse_findings(candidates: Vec<Value>, target_findings: usize) -> Vec<Value> {
    if target_findings == 0 {
        return candidates;
    }

    let mut remaining: Vec<Value> = candidates.into_iter().filter(|c| c.is_object()).collect();
    let mut selected: Vec<Value> = Vec::new();
    let mut used_urls: BTreeSet<String> = BTreeSet::new();
    let mut used_domains: BTreeSet<String> = BTreeSet::new();

    while !remaining.is_empty() && selected.len() < target_findings {
        let mut best_idx: Option<usize> = None;
        let mut best_score = 0i64;

        for (idx, item) in remaining.iter().enumerate() {
            let urls = evidence_urls_of(item);
            if urls.is_empty() {
                continue;
            }
            let domains: BTreeSet<String> = urls.iter().map(|u| domain_for(u)).filter(|d| !d.is_empty()).collect();
            let new_urls = urls.iter().filter(|u| !used_urls.contains(*u)).count() as i64;
            let new_domains = domains.iter().filter(|d| !used_domains.contains(*d)).count() as i64;
            let score = new_urls * 100 + new_domains * 10 + (urls.len() as i64).min(3);
            if best_idx.is_none() || score > best_score {
                best_idx = Some(idx);
                best_score = score;
            }
        }

        let Some(idx) = best_idx else { break };
        let mut picked = remaining.remove(idx);

        if let Some(ev) = picked["evidence"].as_array() {
            let mut kept: Vec<Value> = ev
                .iter()
                .filter(|e| e["url"].as_str().is_some())
                .cloned()
                .collect();
            kept.sort_by_key(|e| {
                let url = e["url"].as_str().unwrap_or("");
                used_urls.contains(url)
            });
            kept.truncate(3);
            picked["evidence"] = Value::Array(kept);
        }

        let urls = evidence_urls_of(&picked);
        used_urls.extend(urls.iter().cloned());
        used_domains.extend(urls.iter().map(|u| domain_for(u)).filter(|d| !d.is_empty()));
        selected.push(picked);
    }

    // Fill to the target with whatever remains
    while !remaining.is_empty() && selected.len() < target_findings {
        let mut item = remaining.remove(0);
        if let Some(ev) = item["evidence"].as_array() {
            let kept: Vec<Value> = ev.iter().filter(|e| e.is_object()).take(3).cloned().collect();
            item["evidence"] = Value::Array(kept);
        }
        selected.push(item);
    }

    selected
}

/// Coverage statistics accompanying coverage issues
pub(crate) struct CoverageStats {
    pub unique_citations: usize,
    pub unique_domains: usize,
    pub target_per_finding: usize,
}

impl DeepResearch {
    /// Synthesize a payload and render it into Markdown
    pub(crate) async fn synthesize_and_render(
        &self,
        query: &str,
        findings: &[WorkerFinding],
        citations: &[String],
        report_type: ReportType,
    ) -> Result<(String, Option<Value>), SynthesisError> {
        if report_type == ReportType::Catalog {
            return self.catalog_synthesize_and_render(query, findings, citations).await;
        }

        if self.config.require_quote_per_claim && self.config.multi_pass_synthesis && !self.config.best_effort {
            let (md, payload) = self.multi_pass_synthesize_and_render(query, findings, citations).await?;
            return Ok((md, Some(payload)));
        }

        let prompt = self.synthesis_prompt_with_constraints(query, findings, citations);
        let mut payload: Option<Value> = None;
        let mut raw = String::new();
        let mut last_err: Option<String> = None;

        for attempt in 0..2 {
            let messages = if attempt == 0 || raw.is_empty() {
                vec![crate::llm::Message::user(prompt.clone())]
            } else {
                vec![
                    crate::llm::Message::user(prompt.clone()),
                    crate::llm::Message::assistant(raw.clone()),
                    crate::llm::Message::user(
                        "Your previous response was invalid JSON. Return ONLY valid raw JSON matching the schema (no markdown).",
                    ),
                ]
            };
            let request = CompletionRequest {
                system_prompt: None,
                messages,
                tools: Vec::new(),
                tool_choice: None,
                temperature: if attempt == 0 { 0.2 } else { 0.0 },
                max_tokens: 1200,
            };

            raw = match self.llm.complete(request).await {
                Ok(response) => response.content.unwrap_or_default().trim().to_string(),
                Err(e) => {
                    last_err = Some(e.to_string());
                    continue;
                }
            };
            if raw.is_empty() {
                last_err = Some("empty response".to_string());
                continue;
            }
            match parse_planner_json(&raw) {
                Ok(parsed) if parsed.is_object() => {
                    payload = Some(parsed);
                    break;
                }
                Ok(_) => last_err = Some("response was not a JSON object".to_string()),
                Err(e) => last_err = Some(e),
            }
        }

        if payload.is_none() && !self.config.best_effort {
            let detail = last_err.map(|e| format!(": {e}")).unwrap_or_default();
            return Err(SynthesisError::new(
                format!("Synthesis returned invalid JSON{detail}"),
                raw,
                "synthesize",
            ));
        }

        let payload = match payload {
            Some(p) => {
                Some(
                    self.repair_and_validate_synthesis_payload(query, findings, citations, p)
                        .await?,
                )
            }
            None => None,
        };

        let md = self.render_from_payload(query, findings, citations, payload.clone().unwrap_or_else(|| json!({})))?;
        Ok((md, payload))
    }

    /// Validate grounding and coverage, attempting one repair pass first.
    ///
    /// Grounding failures are always fatal. Coverage failures obey
    /// `coverage_mode`.
    pub(crate) async fn repair_and_validate_synthesis_payload(
        &self,
        query: &str,
        findings: &[WorkerFinding],
        citations: &[String],
        mut payload: Value,
    ) -> Result<Value, SynthesisError> {
        let allowed: BTreeSet<String> = citations.iter().cloned().collect();

        let mut issues = grounding_issues(&payload, &allowed);
        let (mut coverage, mut stats) = self.coverage_issues(&payload, &allowed);

        if !issues.is_empty() || !coverage.is_empty() {
            let mut all_issues = issues.clone();
            all_issues.extend(coverage.clone());
            if let Some(repaired) = self.attempt_synthesis_repair(query, findings, citations, &payload, &all_issues).await
            {
                payload = repaired;
                issues = grounding_issues(&payload, &allowed);
                let rechecked = self.coverage_issues(&payload, &allowed);
                coverage = rechecked.0;
                stats = rechecked.1;
            }
        }

        if !issues.is_empty() {
            return Err(SynthesisError::new(
                "Synthesis produced citations not present in allowed sources",
                payload.to_string(),
                "synthesize",
            ));
        }

        if !coverage.is_empty() {
            let msg = format!(
                "Synthesis did not meet coverage targets. {} (unique_citations={}, domains={}, target_per_finding={})",
                coverage.iter().take(3).cloned().collect::<Vec<_>>().join(", "),
                stats.unique_citations,
                stats.unique_domains,
                stats.target_per_finding,
            );
            if self.config.coverage_mode.to_lowercase() == "error" {
                return Err(SynthesisError::new(msg, payload.to_string(), "coverage"));
            }
            warn!("{msg}");
            self.emitter
                .emit(AgentEvent::progress("synthesize", 0, None, format!("WARNING: {msg}")));
        }

        Ok(payload)
    }

    async fn attempt_synthesis_repair(
        &self,
        query: &str,
        findings: &[WorkerFinding],
        citations: &[String],
        payload: &Value,
        issues: &[String],
    ) -> Option<Value> {
        if issues.is_empty() {
            return None;
        }
        debug!(issue_count = issues.len(), "attempt_synthesis_repair: called");
        let prompt = self.synthesis_prompt_with_constraints(query, findings, citations);
        let allowed_block = prompts::allowed_sources_block(citations, 60);
        let issue_lines: String = issues.iter().take(12).map(|i| format!("- {i}")).collect::<Vec<_>>().join("\n");
        let msg = format!(
            "Your previous JSON did not meet requirements.\n\nProblems:\n{issue_lines}{}\n\n\
             Return ONLY corrected raw JSON matching the schema (no markdown). \
             Cite ONLY from the Allowed citation URLs list.",
            if allowed_block.is_empty() { String::new() } else { format!("\n\n{allowed_block}") },
        );

        let request = CompletionRequest {
            system_prompt: None,
            messages: vec![
                crate::llm::Message::user(prompt),
                crate::llm::Message::assistant(payload.to_string()),
                crate::llm::Message::user(msg),
            ],
            tools: Vec::new(),
            tool_choice: None,
            temperature: 0.0,
            max_tokens: 1200,
        };

        let raw = self.llm.complete(request).await.ok()?.content.unwrap_or_default();
        let parsed = parse_planner_json(raw.trim()).ok()?;
        parsed.is_object().then_some(parsed)
    }

    /// Synthesis prompt plus per-run constraints and the allowed-URL block
    pub(crate) fn synthesis_prompt_with_constraints(
        &self,
        query: &str,
        findings: &[WorkerFinding],
        allowed_urls: &[String],
    ) -> String {
        let mut prompt = prompts::synthesis_prompt(query, findings, self.config.require_quote_per_claim);
        if !self.config.require_quote_per_claim {
            let min_unique = self.config.report_min_unique_citations_target;
            let min_domains = self.config.report_min_unique_domains_target;
            let findings_target = self.config.report_findings_target.max(1);
            let target_per_finding = if allowed_urls.len() >= findings_target * 2 { 2 } else { 1 };
            prompt = format!(
                "{}\n\nAdditional constraints for this run:\n\
                 - Write up to {findings_target} findings.\n\
                 - Target >= {min_unique} unique citation URLs across the whole report (if possible).\n\
                 - Target >= {min_domains} unique domains across the whole report (if possible).\n\
                 - Target >= {target_per_finding} citation URLs per finding (if possible).\n\
                 - Avoid repeating the same citation URLs across multiple findings when alternatives exist.\n\
                 - Copy citation URLs EXACTLY; do not invent or modify URLs.\n",
                prompt.trim_end(),
            );
            let allowed_block = prompts::allowed_sources_block(allowed_urls, 60);
            if !allowed_block.is_empty() {
                prompt = format!("{}\n\n{allowed_block}\n", prompt.trim_end());
            }
        }
        prompt
    }

    /// Coverage check against the run's targets
    pub(crate) fn coverage_issues(&self, payload: &Value, allowed: &BTreeSet<String>) -> (Vec<String>, CoverageStats) {
        let mut urls: BTreeSet<String> = BTreeSet::new();
        let mut per_finding_counts: Vec<usize> = Vec::new();

        if let Some(findings) = payload["findings"].as_array() {
            for item in findings {
                let Some(cites) = item["citations"].as_array() else {
                    continue;
                };
                let mut kept = 0;
                for c in cites {
                    if let Some(u) = c.as_str()
                        && allowed.contains(u)
                    {
                        urls.insert(u.to_string());
                        kept += 1;
                    }
                }
                per_finding_counts.push(kept);
            }
        }

        let domains: BTreeSet<String> = urls.iter().map(|u| domain_for(u)).filter(|d| !d.is_empty()).collect();
        let findings_target = self.config.report_findings_target.max(1);
        let effective_findings = findings_target.min(per_finding_counts.len().max(1)).max(1);
        let target_per_finding = if allowed.len() >= effective_findings * 2 { 2 } else { 1 };

        let mut issues = Vec::new();
        let min_citations = self.config.report_min_unique_citations_target;
        let min_domains = self.config.report_min_unique_domains_target;
        if min_citations > 0 && urls.len() < min_citations {
            issues.push(format!("unique citations below target: {} < {min_citations}", urls.len()));
        }
        if min_domains > 0 && domains.len() < min_domains {
            issues.push(format!("unique domains below target: {} < {min_domains}", domains.len()));
        }
        if !per_finding_counts.is_empty() {
            let below = per_finding_counts
                .iter()
                .take(effective_findings)
                .filter(|n| **n < target_per_finding)
                .count();
            if below > 0 {
                issues.push(format!("{below} finding(s) below per-finding citation target: {target_per_finding}"));
            }
        }

        (
            issues,
            CoverageStats {
                unique_citations: urls.len(),
                unique_domains: domains.len(),
                target_per_finding,
            },
        )
    }

    /// Outline, per-section writers, diversity selection, then a summary
    /// pass. Quotes must be substrings of the provided excerpts.
    pub(crate) async fn multi_pass_synthesize_and_render(
        &self,
        query: &str,
        findings: &[WorkerFinding],
        citations: &[String],
    ) -> Result<(String, Value), SynthesisError> {
        let allowed: BTreeSet<String> = citations.iter().cloned().collect();

        // 1) Outline
        let compact = compact_findings_for_outline(findings);
        let outline_request = CompletionRequest::simple(prompts::outline_prompt(query, &compact), 0.2, 800);
        let outline_raw = self
            .llm
            .complete(outline_request)
            .await
            .map_err(|e| SynthesisError::new(format!("Outline call failed: {e}"), "", "outline"))?
            .content
            .unwrap_or_default()
            .trim()
            .to_string();
        let outline = parse_planner_json(&outline_raw)
            .map_err(|e| SynthesisError::new(format!("Outline returned invalid JSON: {e}"), outline_raw.clone(), "outline"))?;
        let sections = outline["sections"].as_array().cloned().unwrap_or_default();
        if sections.is_empty() {
            return Err(SynthesisError::new("Outline produced no sections", outline_raw, "outline"));
        }

        // Evidence grouped by task, restricted to allowed URLs
        let mut evidence_by_task: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for f in findings {
            if f.task_id.is_empty() {
                continue;
            }
            let cleaned: Vec<Value> = f
                .evidence
                .iter()
                .filter(|ev| allowed.contains(&ev.url) && !ev.excerpt.trim().is_empty())
                .map(|ev| {
                    json!({
                        "url": ev.url,
                        "title": ev.title,
                        "excerpt": ev.excerpt.trim(),
                    })
                })
                .collect();
            if !cleaned.is_empty() {
                evidence_by_task.insert(f.task_id.clone(), cleaned);
            }
        }

        // 2) Write sections
        let mut combined_findings: Vec<Value> = Vec::new();
        for sec in sections.iter().take(8) {
            let sec_title = sec["title"].as_str().unwrap_or("").trim().to_string();
            let task_ids: Vec<String> = sec["task_ids"]
                .as_array()
                .map(|ids| {
                    ids.iter()
                        .filter_map(|v| v.as_str())
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default();
            if sec_title.is_empty() || task_ids.is_empty() {
                continue;
            }

            let mut evidence: Vec<Value> = Vec::new();
            for tid in &task_ids {
                if let Some(items) = evidence_by_task.get(tid) {
                    evidence.extend(items.iter().cloned());
                }
            }
            if evidence.is_empty() {
                continue;
            }

            let excerpt_map: BTreeMap<String, String> = evidence
                .iter()
                .filter_map(|e| {
                    let url = e["url"].as_str()?;
                    Some((url.to_string(), e["excerpt"].as_str().unwrap_or("").to_string()))
                })
                .collect();

            let request = CompletionRequest::simple(
                prompts::section_findings_prompt(query, &sec_title, &Value::Array(evidence)),
                0.2,
                900,
            );
            let sec_raw = self
                .llm
                .complete(request)
                .await
                .map_err(|e| SynthesisError::new(format!("Section writer call failed: {e}"), "", "section"))?
                .content
                .unwrap_or_default()
                .trim()
                .to_string();
            let sec_payload = parse_planner_json(&sec_raw).map_err(|e| {
                SynthesisError::new(
                    format!("Section writer returned invalid JSON for '{sec_title}': {e}"),
                    sec_raw.clone(),
                    "section",
                )
            })?;
            let Some(sec_findings) = sec_payload["findings"].as_array() else {
                continue;
            };

            for item in sec_findings.iter().take(10) {
                let claim = item["claim"].as_str().unwrap_or("").trim().to_string();
                let Some(ev_items) = item["evidence"].as_array() else { continue };
                if claim.is_empty() || ev_items.is_empty() {
                    continue;
                }
                let mut kept = Vec::new();
                for e in ev_items.iter().take(3) {
                    let Some(url) = e["url"].as_str() else { continue };
                    let Some(quote) = e["quote"].as_str() else { continue };
                    if !allowed.contains(url) {
                        continue;
                    }
                    let q = normalize_ws(quote);
                    if q.is_empty() {
                        continue;
                    }
                    let excerpt = normalize_ws(excerpt_map.get(url).map(String::as_str).unwrap_or(""));
                    if !excerpt.contains(&q) {
                        continue;
                    }
                    kept.push(json!({"url": url, "quote": quote.trim()}));
                }
                if kept.is_empty() {
                    continue;
                }
                combined_findings.push(json!({"claim": claim, "evidence": kept}));
            }
        }

        if combined_findings.is_empty() {
            return Err(SynthesisError::new(
                "Multi-pass synthesis produced no supported findings",
                "",
                "multi_pass",
            ));
        }

        let combined_findings = select_diverse_findings(combined_findings, self.config.report_findings_target.max(1));
        let claims: Vec<String> = combined_findings
            .iter()
            .filter_map(|it| it["claim"].as_str())
            .map(String::from)
            .collect();

        // 3) Summarize
        let request = CompletionRequest::simple(prompts::summary_prompt(query, &claims), 0.2, 500);
        let sum_raw = self
            .llm
            .complete(request)
            .await
            .map_err(|e| SynthesisError::new(format!("Summary call failed: {e}"), "", "summary"))?
            .content
            .unwrap_or_default()
            .trim()
            .to_string();
        let summary_payload = parse_planner_json(&sum_raw)
            .map_err(|e| SynthesisError::new(format!("Summary returned invalid JSON: {e}"), sum_raw.clone(), "summary"))?;
        if !summary_payload.is_object() {
            return Err(SynthesisError::new("Summary returned invalid shape", sum_raw, "summary"));
        }

        let synthesized = json!({
            "title": summary_payload["title"].as_str().unwrap_or("Deep Research Report"),
            "summary_bullets": summary_payload["summary_bullets"].as_array().cloned().unwrap_or_default(),
            "findings": combined_findings,
            "open_questions": summary_payload["open_questions"].as_array().cloned().unwrap_or_default(),
        });

        let md = self.render_from_payload(query, findings, citations, synthesized.clone())?;
        Ok((md, synthesized))
    }

    /// Catalog synthesis: one call producing structured items; URL fields
    /// must be allowed and quotes must match recorded evidence excerpts.
    pub(crate) async fn catalog_synthesize_and_render(
        &self,
        query: &str,
        findings: &[WorkerFinding],
        citations: &[String],
    ) -> Result<(String, Option<Value>), SynthesisError> {
        let target_items = detect_target_items(query).unwrap_or(5);
        let required_fields =
            super::memo::normalize_catalog_required_fields(&detect_required_fields(query));
        let prompt = prompts::catalog_synthesis_prompt(query, target_items, &required_fields, findings, citations);

        let mut raw = String::new();
        let mut payload: Option<Value> = None;
        for attempt in 0..2 {
            let messages = if attempt == 0 || raw.is_empty() {
                vec![crate::llm::Message::user(prompt.clone())]
            } else {
                vec![
                    crate::llm::Message::user(prompt.clone()),
                    crate::llm::Message::assistant(raw.clone()),
                    crate::llm::Message::user(
                        "Your previous response was invalid JSON. Return ONLY valid raw JSON matching the schema (no markdown).",
                    ),
                ]
            };
            let request = CompletionRequest {
                system_prompt: None,
                messages,
                tools: Vec::new(),
                tool_choice: None,
                temperature: if attempt == 0 { 0.2 } else { 0.0 },
                max_tokens: 2000,
            };
            raw = match self.llm.complete(request).await {
                Ok(response) => response.content.unwrap_or_default().trim().to_string(),
                Err(_) => continue,
            };
            if let Ok(parsed) = parse_planner_json(&raw)
                && parsed.is_object()
            {
                payload = Some(parsed);
                break;
            }
        }

        let Some(mut payload) = payload else {
            if self.config.best_effort {
                let md = self.render_catalog_payload(&json!({}), citations, findings)?;
                return Ok((md, None));
            }
            return Err(SynthesisError::new("Catalog synthesis returned invalid JSON", raw, "synthesize"));
        };

        sanitize_catalog_payload(&mut payload, citations, findings);
        let md = self.render_catalog_payload(&payload, citations, findings)?;
        Ok((md, Some(payload)))
    }

    /// Curated-sources selection: per task, order by Tavily score then rank;
    /// two-pass round-robin (fulfill `min_per_task`, then fill to
    /// `max_total`) under a per-domain cap.
    pub(crate) fn build_curated_sources(&self, results: &[WorkerResult]) -> Vec<CuratedSource> {
        let max_total = self.config.curated_sources_max_total;
        if max_total == 0 {
            return Vec::new();
        }
        let max_per_domain = self.config.curated_sources_max_per_domain;
        let min_per_task = self.config.curated_sources_min_per_task;

        let mut per_task: BTreeMap<String, Vec<CuratedSource>> = BTreeMap::new();
        for r in results {
            if r.task_id.is_empty() {
                continue;
            }
            let mut best_by_url: BTreeMap<String, CuratedSource> = BTreeMap::new();
            let mut rank = 0u32;
            for call in &r.web_search_trace {
                for hit in &call.results {
                    if !hit.url.starts_with("http") {
                        continue;
                    }
                    rank += 1;
                    let score = hit.score.unwrap_or(0.0);
                    let meta = r.sources.get(&hit.url);
                    let title = meta
                        .and_then(|m| m.title.clone())
                        .or_else(|| hit.title.clone())
                        .unwrap_or_default();
                    let snippet = meta
                        .and_then(|m| m.snippet.clone())
                        .or_else(|| hit.snippet.clone())
                        .unwrap_or_default();
                    let entry = CuratedSource {
                        url: hit.url.clone(),
                        domain: domain_for(&hit.url),
                        title: title.trim().to_string(),
                        snippet: super::types::sanitize_snippet(&snippet),
                        score,
                        task_id: r.task_id.clone(),
                        rank_within_task: rank,
                    };
                    match best_by_url.get(&hit.url) {
                        Some(existing) if existing.score >= score => {}
                        _ => {
                            best_by_url.insert(hit.url.clone(), entry);
                        }
                    }
                }
            }
            let mut candidates: Vec<CuratedSource> = best_by_url.into_values().collect();
            candidates.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.rank_within_task.cmp(&b.rank_within_task))
            });
            per_task.insert(r.task_id.clone(), candidates);
        }

        let mut selected: Vec<CuratedSource> = Vec::new();
        let mut selected_urls: BTreeSet<String> = BTreeSet::new();
        let mut domain_counts: BTreeMap<String, usize> = BTreeMap::new();
        let task_ids: Vec<String> = per_task.keys().cloned().collect();
        let mut per_task_counts: BTreeMap<String, usize> = task_ids.iter().map(|t| (t.clone(), 0)).collect();

        let can_add = |item: &CuratedSource,
                       selected_urls: &BTreeSet<String>,
                       domain_counts: &BTreeMap<String, usize>| {
            if selected_urls.contains(&item.url) {
                return false;
            }
            if max_per_domain > 0 && domain_counts.get(&item.domain).copied().unwrap_or(0) >= max_per_domain {
                return false;
            }
            true
        };

        // Pass 1: fulfill min_per_task round-robin
        if min_per_task > 0 {
            let mut made_progress = true;
            while made_progress && selected.len() < max_total {
                made_progress = false;
                for tid in &task_ids {
                    if selected.len() >= max_total {
                        break;
                    }
                    if per_task_counts[tid] >= min_per_task {
                        continue;
                    }
                    let items = per_task.get_mut(tid).expect("task id present");
                    while !items.is_empty() && !can_add(&items[0], &selected_urls, &domain_counts) {
                        items.remove(0);
                    }
                    if items.is_empty() {
                        continue;
                    }
                    let item = items.remove(0);
                    selected_urls.insert(item.url.clone());
                    *domain_counts.entry(item.domain.clone()).or_insert(0) += 1;
                    *per_task_counts.get_mut(tid).expect("task id present") += 1;
                    selected.push(item);
                    made_progress = true;
                }
            }
        }

        // Pass 2: fill to max_total round-robin
        let mut made_progress = true;
        while made_progress && selected.len() < max_total {
            made_progress = false;
            for tid in &task_ids {
                if selected.len() >= max_total {
                    break;
                }
                let items = per_task.get_mut(tid).expect("task id present");
                while !items.is_empty() && !can_add(&items[0], &selected_urls, &domain_counts) {
                    items.remove(0);
                }
                if items.is_empty() {
                    continue;
                }
                let item = items.remove(0);
                selected_urls.insert(item.url.clone());
                *domain_counts.entry(item.domain.clone()).or_insert(0) += 1;
                selected.push(item);
                made_progress = true;
            }
        }

        selected
    }

    /// Findings restricted to the curated allowed-URL set
    pub(crate) fn build_synthesis_findings(&self, results: &[WorkerResult], allowed: &BTreeSet<String>) -> Vec<WorkerFinding> {
        results
            .iter()
            .map(|r| {
                let mut finding = WorkerFinding::from(r);
                finding.citations.retain(|u| allowed.contains(u));
                finding.sources.retain(|u, _| allowed.contains(u));
                for meta in finding.sources.values_mut() {
                    if let Some(snippet) = &meta.snippet {
                        meta.snippet = Some(super::types::sanitize_snippet(snippet));
                    }
                }
                finding
            })
            .collect()
    }
}

/// Drop catalog items/fields that violate grounding:
/// URL fields not in the allowed set, quotes not found in evidence excerpts.
fn sanitize_catalog_payload(payload: &mut Value, citations: &[String], findings: &[WorkerFinding]) {
    let allowed: BTreeSet<&str> = citations.iter().map(String::as_str).collect();
    let mut excerpts: BTreeMap<&str, String> = BTreeMap::new();
    for f in findings {
        for ev in &f.evidence {
            excerpts.insert(ev.url.as_str(), normalize_ws(&ev.excerpt));
        }
    }

    let Some(items) = payload["items"].as_array_mut() else { return };
    items.retain_mut(|item| {
        if !item.is_object() {
            return false;
        }
        if item["name"].as_str().map(str::trim).unwrap_or("").is_empty() {
            return false;
        }
        if let Some(url) = item["website_url"].as_str()
            && !url.trim().is_empty()
            && !allowed.contains(url)
        {
            item["website_url"] = Value::String(String::new());
        }
        if let Some(links) = item["proof_links"].as_array() {
            let kept: Vec<Value> = links
                .iter()
                .filter(|l| l.as_str().is_some_and(|u| allowed.contains(u)))
                .cloned()
                .collect();
            item["proof_links"] = Value::Array(kept);
        }
        if let Some(evidence) = item["evidence"].as_array() {
            let kept: Vec<Value> = evidence
                .iter()
                .filter(|e| {
                    let Some(url) = e["url"].as_str() else { return false };
                    let Some(quote) = e["quote"].as_str() else { return false };
                    if !allowed.contains(url) {
                        return false;
                    }
                    let q = normalize_ws(quote);
                    !q.is_empty() && excerpts.get(url).is_some_and(|ex| ex.contains(&q))
                })
                .cloned()
                .collect();
            item["evidence"] = Value::Array(kept);
        }
        true
    });
}

/// Citations outside the allowed set, if any
pub(crate) fn grounding_issues(payload: &Value, allowed: &BTreeSet<String>) -> Vec<String> {
    let Some(findings) = payload["findings"].as_array() else {
        return vec!["payload.findings is missing or not a list".to_string()];
    };
    let mut bad: BTreeSet<String> = BTreeSet::new();
    for item in findings {
        if let Some(cites) = item["citations"].as_array() {
            for c in cites {
                if let Some(u) = c.as_str()
                    && u.starts_with("http")
                    && !allowed.contains(u)
                {
                    bad.insert(u.to_string());
                }
            }
        }
        if let Some(evidence) = item["evidence"].as_array() {
            for e in evidence {
                if let Some(u) = e["url"].as_str()
                    && u.starts_with("http")
                    && !allowed.contains(u)
                {
                    bad.insert(u.to_string());
                }
            }
        }
    }
    if bad.is_empty() {
        return Vec::new();
    }
    let sample: Vec<String> = bad.iter().take(5).cloned().collect();
    vec![format!(
        "found {} citation(s) not in allowed sources: {}",
        bad.len(),
        sample.join(", ")
    )]
}
