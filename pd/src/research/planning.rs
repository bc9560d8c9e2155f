//! Planner calls, validation, and worker-task construction

use serde_json::Value;
use tracing::{debug, warn};

use crate::agent::WorkerTask;
use crate::events::AgentEvent;
use crate::llm::CompletionRequest;

use super::memo::ResearchMemo;
use super::orchestrator::DeepResearch;
use super::prompts;
use super::types::{PlanSet, PlannedTask, PlanningError, ReportType, detect_report_type};

/// Parse planner output: raw JSON first, then a single fenced code block.
pub fn parse_planner_json(content: &str) -> Result<Value, String> {
    if let Ok(value) = serde_json::from_str::<Value>(content) {
        return Ok(value);
    }

    let stripped = content.trim();
    if stripped.starts_with("```")
        && let Some(inner) = extract_single_code_fence(stripped)
    {
        return serde_json::from_str::<Value>(&inner).map_err(|e| e.to_string());
    }

    Err("content is not a JSON object".to_string())
}

/// Inner text of a single leading code fence (```json allowed), if any.
pub fn extract_single_code_fence(text: &str) -> Option<String> {
    let mut lines = text.lines();
    let first = lines.next()?;
    if !first.starts_with("```") {
        return None;
    }
    let mut inner = Vec::new();
    let mut closed = false;
    for line in lines {
        if line.trim() == "```" {
            closed = true;
            break;
        }
        inner.push(line);
    }
    if !closed {
        return None;
    }
    let joined = inner.join("\n").trim().to_string();
    if joined.is_empty() { None } else { Some(joined) }
}

/// Strictly validate a plan value: tasks missing a query or instructions are
/// filtered; missing ids default to `task_<idx>`; too few survivors is an
/// error. At most 10 tasks are kept.
pub(crate) fn validate_plan(plan: &Value, min_tasks: usize) -> Result<PlanSet, PlanningError> {
    if !plan.is_object() {
        return Err(PlanningError::new("Planner output must be a JSON object", plan.to_string()));
    }
    let Some(tasks) = plan["tasks"].as_array() else {
        return Err(PlanningError::new(
            "Planner output must include `tasks` as a list",
            plan.to_string(),
        ));
    };

    let mut validated = Vec::new();
    for (idx, t) in tasks.iter().enumerate() {
        if !t.is_object() {
            continue;
        }
        let mut task_id = t["id"].as_str().unwrap_or("").trim().to_string();
        let search_query = t["search_query"].as_str().unwrap_or("").trim().to_string();
        let instructions = t["instructions"].as_str().unwrap_or("").trim().to_string();
        if task_id.is_empty() {
            task_id = format!("task_{idx}");
        }
        if search_query.is_empty() || instructions.is_empty() {
            continue;
        }
        validated.push(PlannedTask {
            id: task_id,
            search_query,
            instructions,
        });
    }

    if validated.len() < min_tasks {
        return Err(PlanningError::new(
            format!("Planner output did not produce enough valid tasks (need >= {min_tasks})"),
            plan.to_string(),
        ));
    }

    validated.truncate(10);
    Ok(PlanSet { tasks: validated })
}

/// Deterministic plan used when best-effort runs lose the planner
pub(crate) fn fallback_plan(query: &str) -> PlanSet {
    PlanSet {
        tasks: vec![
            PlannedTask {
                id: "overview".to_string(),
                search_query: query.to_string(),
                instructions: "Find high-quality overview sources and key facts with links.".to_string(),
            },
            PlannedTask {
                id: "comparison".to_string(),
                search_query: format!("{query} comparison"),
                instructions: "Find comparisons, pros/cons, and alternatives with links.".to_string(),
            },
            PlannedTask {
                id: "recent".to_string(),
                search_query: format!("{query} 2024 2025"),
                instructions: "Find recent changes/news and notable developments with links.".to_string(),
            },
        ],
    }
}

impl DeepResearch {
    /// Initial plan. Returns (plan, raw planner output, soft error).
    pub(crate) async fn plan(
        &self,
        query: &str,
        max_tasks: u32,
        min_tasks: usize,
        report_type: ReportType,
    ) -> Result<(PlanSet, String, Option<String>), PlanningError> {
        debug!(max_tasks, min_tasks, "plan: called");
        let prompt = prompts::planning_prompt(query, max_tasks.max(1), report_type);
        let request = CompletionRequest::simple(prompt, 0.2, 800);

        let content = match self.llm.complete(request).await {
            Ok(response) => response.content.unwrap_or_default().trim().to_string(),
            Err(e) => {
                let msg = format!("Planner call failed: {e}");
                if !self.config.best_effort {
                    return Err(PlanningError::new(msg, ""));
                }
                self.warn_plan(&msg);
                return Ok((fallback_plan(query), String::new(), Some(msg)));
            }
        };

        if content.is_empty() {
            let msg = "Planner returned an empty response. \
                       Check that your LLM provider API key is set for the selected model."
                .to_string();
            if !self.config.best_effort {
                return Err(PlanningError::new(msg, content));
            }
            self.warn_plan(&msg);
            return Ok((fallback_plan(query), content, Some(msg)));
        }

        let parsed = match parse_planner_json(&content) {
            Ok(value) => value,
            Err(e) => {
                let msg = format!("Planner returned invalid JSON: {e}");
                if !self.config.best_effort {
                    return Err(PlanningError::new(msg, content));
                }
                self.warn_plan(&format!("{msg}. Using fallback plan (best-effort)."));
                return Ok((fallback_plan(query), content, Some(msg)));
            }
        };

        match validate_plan(&parsed, min_tasks) {
            Ok(plan) => Ok((plan, content, None)),
            Err(e) => {
                if !self.config.best_effort {
                    return Err(PlanningError::new(e.message, content));
                }
                let msg = e.message;
                self.warn_plan(&format!("{msg}. Using fallback plan (best-effort)."));
                Ok((fallback_plan(query), content, Some(msg)))
            }
        }
    }

    fn warn_plan(&self, message: &str) {
        warn!("{message}");
        self.emitter
            .emit(AgentEvent::progress("plan", 0, None, format!("WARNING: {message}")));
    }

    /// Gap-fill plan from the round memo. Task ids get an `r2_` prefix.
    pub(crate) async fn gap_fill_plan(
        &self,
        query: &str,
        memo: &ResearchMemo,
        max_tasks: u32,
    ) -> Result<(PlanSet, String), PlanningError> {
        let prompt = prompts::gap_fill_prompt(query, memo, max_tasks);
        let request = CompletionRequest::simple(prompt, 0.2, 800);
        let content = self
            .llm
            .complete(request)
            .await
            .map_err(|e| PlanningError::new(format!("Gap planner call failed: {e}"), ""))?
            .content
            .unwrap_or_default()
            .trim()
            .to_string();

        if content.is_empty() {
            return Err(PlanningError::new("Gap planner returned an empty response.", content));
        }
        let parsed = parse_planner_json(&content)
            .map_err(|e| PlanningError::new(format!("Gap planner returned invalid JSON: {e}"), content.clone()))?;
        let mut plan = validate_plan(&parsed, 0)?;
        for task in &mut plan.tasks {
            if !task.id.starts_with("r2_") {
                task.id = format!("r2_{}", task.id);
            }
        }
        plan.tasks.truncate(max_tasks as usize);
        Ok((plan, content))
    }

    /// Verification plan from the round memo. Task ids get a `v_` prefix.
    pub(crate) async fn verification_plan(
        &self,
        query: &str,
        memo: &ResearchMemo,
        max_tasks: u32,
    ) -> Result<(PlanSet, String), PlanningError> {
        let prompt = prompts::verification_prompt(query, memo, max_tasks);
        let request = CompletionRequest::simple(prompt, 0.2, 800);
        let content = self
            .llm
            .complete(request)
            .await
            .map_err(|e| PlanningError::new(format!("Verification planner call failed: {e}"), ""))?
            .content
            .unwrap_or_default()
            .trim()
            .to_string();

        if content.is_empty() {
            return Err(PlanningError::new("Verification planner returned an empty response.", content));
        }
        let parsed = parse_planner_json(&content).map_err(|e| {
            PlanningError::new(format!("Verification planner returned invalid JSON: {e}"), content.clone())
        })?;
        let mut plan = validate_plan(&parsed, 0)?;
        for task in &mut plan.tasks {
            if !task.id.starts_with("v_") {
                task.id = format!("v_{}", task.id);
            }
        }
        plan.tasks.truncate(max_tasks as usize);
        Ok((plan, content))
    }

    /// Continuation plan for the draft-centric strategy
    pub(crate) async fn draft_continuation_plan(
        &self,
        query: &str,
        draft: &str,
        max_tasks: u32,
    ) -> Result<(PlanSet, String), PlanningError> {
        let prompt = prompts::draft_continuation_prompt(query, draft, max_tasks);
        let request = CompletionRequest::simple(prompt, 0.2, 800);
        let content = self
            .llm
            .complete(request)
            .await
            .map_err(|e| PlanningError::new(format!("Continuation planner call failed: {e}"), ""))?
            .content
            .unwrap_or_default()
            .trim()
            .to_string();

        if content.is_empty() {
            return Err(PlanningError::new("Continuation planner returned an empty response.", content));
        }
        let parsed = parse_planner_json(&content).map_err(|e| {
            PlanningError::new(format!("Continuation planner returned invalid JSON: {e}"), content.clone())
        })?;
        let mut plan = validate_plan(&parsed, 0)?;
        plan.tasks.truncate(max_tasks as usize);
        Ok((plan, content))
    }

    /// Expand a validated plan into worker tasks with full prompts
    pub(crate) fn to_worker_tasks(&self, query: &str, plan: &PlanSet) -> Result<Vec<WorkerTask>, PlanningError> {
        let report_type = detect_report_type(query);
        if plan.tasks.is_empty() {
            if !self.config.best_effort {
                return Err(PlanningError::new("Plan produced no tasks", ""));
            }
            return Ok(vec![WorkerTask::new(
                "search",
                format!("Use `web_search` for: {query}. Return key findings with URLs."),
                self.config.worker_max_iterations,
            )]);
        }

        let deep_read = self.config.enable_deep_read;
        let read_block = if deep_read {
            format!(
                "\nDeep mode: after you find promising URLs, you MUST call `web_extract` on the best sources.\n\
                 - Extract up to {} pages.\n\
                 - Use `max_chars={}`.\n\
                 - Prefer diverse, reputable domains and avoid duplicates.\n",
                self.config.max_web_extract_calls.max(1),
                self.config.extract_max_chars.max(1),
            )
        } else {
            String::new()
        };

        let mut worker_tasks = Vec::new();
        for t in plan.tasks.iter().take(10) {
            let prompt = if report_type == ReportType::Catalog {
                format!(
                    "You are collecting candidates for a structured catalog.\n\
                     Use the `web_search` tool to find provider sites, pricing pages, and case studies.\n\
                     Aim for ~{target} `web_search` calls.\n\
                     Use pagination (page=1..{pages}) and page_size={page_size}.\n\
                     {read_block}\
                     Stop searching once you have enough evidence.\n\n\
                     Search query: {query}\n\n\
                     Instructions: {instructions}\n\n\
                     Return ONLY valid JSON (no markdown, no code fences) in this exact shape:\n\
                     {{\n  \"candidates\": [\n    {{\n      \"name\": \"string\",\n      \"provider\": \"string\",\n      \"website_url\": \"https://...\",\n      \"problem_solved\": \"string\",\n      \"who_its_for\": \"string\",\n      \"how_ai_is_used\": \"string\",\n      \"pricing_model\": \"string\",\n      \"why_evergreen\": \"string\",\n      \"replicable_with\": \"string\",\n      \"proof_links\": [\"https://...\"]\n    }}\n  ]\n}}\n",
                    target = self.config.target_web_search_calls.max(1),
                    pages = self.config.max_pages.max(1),
                    page_size = self.config.page_size.max(1),
                    query = t.search_query,
                    instructions = t.instructions,
                )
            } else {
                format!(
                    "Use the `web_search` tool to gather sources and extract key facts.\n\
                     Aim for ~{target} `web_search` calls.\n\
                     Use pagination (page=1..{pages}) and page_size={page_size}.\n\
                     Aim for 2+ distinct query variants (refine queries as you learn).\n\
                     {read_block}\
                     Stop searching once you have enough evidence and then write a concise note.\n\n\
                     Search query: {query}\n\n\
                     Instructions: {instructions}\n\n\
                     Return a short Markdown note with bullet points and cite URLs.\n",
                    target = self.config.target_web_search_calls.max(1),
                    pages = self.config.max_pages.max(1),
                    page_size = self.config.page_size.max(1),
                    query = t.search_query,
                    instructions = t.instructions,
                )
            };
            worker_tasks.push(WorkerTask::new(&t.id, prompt, self.config.worker_max_iterations));
        }

        if worker_tasks.is_empty() {
            if !self.config.best_effort {
                return Err(PlanningError::new("Plan tasks were empty after filtering", ""));
            }
            worker_tasks.push(WorkerTask::new(
                "search",
                format!("Use `web_search` for: {query}. Return key findings with URLs."),
                self.config.worker_max_iterations,
            ));
        }
        Ok(worker_tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_raw_json() {
        let parsed = parse_planner_json(r#"{"tasks": []}"#).unwrap();
        assert!(parsed["tasks"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_parse_code_fenced_json() {
        let content = "```json\n{\"tasks\": [{\"id\": \"a\"}]}\n```";
        let parsed = parse_planner_json(content).unwrap();
        assert_eq!(parsed["tasks"][0]["id"], "a");
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(parse_planner_json("I could not produce a plan.").is_err());
    }

    #[test]
    fn test_extract_fence_requires_closing() {
        assert!(extract_single_code_fence("```json\n{}").is_none());
        assert_eq!(extract_single_code_fence("```\n{}\n```").as_deref(), Some("{}"));
    }

    #[test]
    fn test_validate_plan_filters_and_defaults_ids() {
        let plan = json!({"tasks": [
            {"search_query": "q1", "instructions": "i1"},
            {"id": "named", "search_query": "q2", "instructions": "i2"},
            {"id": "broken", "search_query": "", "instructions": "i3"},
        ]});
        let validated = validate_plan(&plan, 2).unwrap();
        assert_eq!(validated.tasks.len(), 2);
        assert_eq!(validated.tasks[0].id, "task_0");
        assert_eq!(validated.tasks[1].id, "named");
    }

    #[test]
    fn test_validate_plan_enforces_min_tasks() {
        let plan = json!({"tasks": [{"search_query": "q", "instructions": "i"}]});
        assert!(validate_plan(&plan, 3).is_err());
        assert!(validate_plan(&json!({"tasks": "nope"}), 0).is_err());
        assert!(validate_plan(&json!([1, 2]), 0).is_err());
    }

    #[test]
    fn test_validate_plan_caps_at_ten() {
        let tasks: Vec<_> = (0..15)
            .map(|i| json!({"id": format!("t{i}"), "search_query": "q", "instructions": "i"}))
            .collect();
        let validated = validate_plan(&json!({ "tasks": tasks }), 3).unwrap();
        assert_eq!(validated.tasks.len(), 10);
    }

    #[test]
    fn test_fallback_plan_shape() {
        let plan = fallback_plan("widgets");
        let ids: Vec<&str> = plan.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["overview", "comparison", "recent"]);
        assert_eq!(plan.tasks[1].search_query, "widgets comparison");
    }
}
