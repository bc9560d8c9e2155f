//! SubagentRunner - one nested agent loop with allowlists and caps

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::debug;

use crate::llm::{CompletionClient, CompletionRequest, ContentBlock, LlmError, Message};
use crate::tools::ToolRegistry;

use super::agent_loop::complete_with_rate_limit_retry;
use super::trace::{SubagentTrace, ToolCallRecord};

/// Returned instead of output when the iteration budget runs out
pub const MAX_ITERATIONS_SENTINEL: &str = "Subagent exceeded max iterations without a final response.";

/// One task handed to a sub-agent
#[derive(Debug, Clone)]
pub struct SubagentTask {
    pub prompt: String,
    pub agent_name: Option<String>,
    pub max_iterations: u32,
    /// When set, tools outside this list return a synthetic failure
    pub allowed_tools: Option<HashSet<String>>,
    pub max_web_search_calls: Option<u32>,
    pub max_web_extract_calls: Option<u32>,
}

impl SubagentTask {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            agent_name: None,
            max_iterations: 6,
            allowed_tools: None,
            max_web_search_calls: None,
            max_web_extract_calls: None,
        }
    }
}

/// Runs single tasks through a private agent loop, collecting a trace
pub struct SubagentRunner {
    llm: Arc<dyn CompletionClient>,
    registry: Arc<ToolRegistry>,
    /// Base worker system prompt (task framing + exploration guidance)
    system_prompt: String,
    /// Named agent bodies appended to the system prompt when requested
    agent_prompts: HashMap<String, String>,
    temperature: f32,
    max_tokens: u32,
}

impl SubagentRunner {
    pub fn new(llm: Arc<dyn CompletionClient>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            llm,
            registry,
            system_prompt: DEFAULT_WORKER_SYSTEM_PROMPT.to_string(),
            agent_prompts: HashMap::new(),
            temperature: 0.0,
            max_tokens: 4096,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_agent_prompt(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.agent_prompts.insert(name.into(), body.into());
        self
    }

    /// The tool registry this runner executes against
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    fn compose_system_prompt(&self, agent_name: Option<&str>) -> String {
        let mut parts = vec![self.system_prompt.trim().to_string()];
        if let Some(name) = agent_name
            && let Some(body) = self.agent_prompts.get(name)
        {
            parts.push(body.trim().to_string());
        }
        parts.retain(|p| !p.is_empty());
        parts.join("\n\n")
    }

    /// Run one task and return its output text plus the full trace.
    ///
    /// Terminates like the shared loop: a text-only response ends the task;
    /// an empty response ends it with empty output; exhausting the budget
    /// returns the sentinel string so the caller can fail gracefully.
    pub async fn run_task_with_trace(&self, task: &SubagentTask) -> Result<(String, SubagentTrace), LlmError> {
        debug!(max_iterations = task.max_iterations, "SubagentRunner::run_task_with_trace: called");
        let started = Instant::now();
        let mut trace = SubagentTrace::default();

        let mut tools = self.registry.schemas();
        if let Some(allowed) = &task.allowed_tools {
            tools.retain(|t| allowed.contains(&t.name));
        }

        let system_prompt = self.compose_system_prompt(task.agent_name.as_deref());
        let mut messages = vec![Message::user(task.prompt.clone())];

        while trace.iterations < task.max_iterations {
            trace.iterations += 1;

            let request = CompletionRequest {
                system_prompt: Some(system_prompt.clone()),
                messages: messages.clone(),
                tools: tools.clone(),
                tool_choice: if tools.is_empty() { None } else { Some("auto".to_string()) },
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            };

            let response = complete_with_rate_limit_retry(&self.llm, request).await?;

            if !response.tool_calls.is_empty() {
                let mut blocks = Vec::new();
                if let Some(text) = &response.content
                    && !text.is_empty()
                {
                    blocks.push(ContentBlock::text(text));
                }
                for call in &response.tool_calls {
                    blocks.push(ContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.input.clone(),
                    });
                }
                messages.push(Message::assistant_blocks(blocks));

                let mut result_blocks = Vec::new();
                for call in &response.tool_calls {
                    let call_started = Instant::now();
                    let result = self.gated_execute(task, &trace, &call.name, call.input.clone()).await;
                    let duration_ms = call_started.elapsed().as_millis() as u64;

                    if call.name == "web_search" {
                        trace.web_search_calls += 1;
                        trace.absorb_web_search_result(&result);
                    } else if call.name == "web_extract" {
                        trace.web_extract_calls += 1;
                        trace.absorb_web_extract_result(&result);
                    }

                    trace.tool_calls.push(ToolCallRecord {
                        tool_name: call.name.clone(),
                        args: call.input.clone(),
                        result: result.clone(),
                        duration_ms: Some(duration_ms),
                    });

                    result_blocks.push(ContentBlock::tool_result(&call.id, result.to_string(), false));
                }
                messages.push(Message::user_blocks(result_blocks));
                continue;
            }

            trace.duration_ms = Some(started.elapsed().as_millis() as u64);
            match response.content {
                Some(content) if !content.is_empty() => return Ok((content, trace)),
                _ => return Ok((String::new(), trace)),
            }
        }

        trace.duration_ms = Some(started.elapsed().as_millis() as u64);
        Ok((MAX_ITERATIONS_SENTINEL.to_string(), trace))
    }

    /// Apply the allowlist and per-tool caps before touching the registry
    async fn gated_execute(
        &self,
        task: &SubagentTask,
        trace: &SubagentTrace,
        name: &str,
        args: serde_json::Value,
    ) -> serde_json::Value {
        if let Some(allowed) = &task.allowed_tools
            && !allowed.contains(name)
        {
            debug!(tool = name, "SubagentRunner::gated_execute: tool not allowed");
            return json!({
                "success": false,
                "error": format!("Tool not allowed in worker mode: {name}"),
            });
        }

        if name == "web_search"
            && let Some(cap) = task.max_web_search_calls
            && trace.web_search_calls >= cap
        {
            return json!({
                "success": false,
                "error": format!("Max web_search calls reached ({cap})"),
            });
        }

        if name == "web_extract"
            && let Some(cap) = task.max_web_extract_calls
            && trace.web_extract_calls >= cap
        {
            return json!({
                "success": false,
                "error": format!("Max web_extract calls reached ({cap})"),
            });
        }

        self.registry.execute(name, args).await
    }
}

const DEFAULT_WORKER_SYSTEM_PROMPT: &str = "\
You are a focused research worker. Complete exactly the task you are given.
Use the available tools to gather evidence; prefer primary sources.
When you are done, respond with your findings as plain text.";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockClient;
    use crate::llm::{CompletionResponse, StopReason, TokenUsage, ToolCall};
    use crate::tools::{Tool, ToolContext};
    use async_trait::async_trait;
    use serde_json::{Value, json};

    struct FakeSearchTool;

    #[async_trait]
    impl Tool for FakeSearchTool {
        fn name(&self) -> &'static str {
            "web_search"
        }
        fn description(&self) -> &'static str {
            "fake"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _input: Value, _ctx: &ToolContext) -> eyre::Result<Value> {
            Ok(json!({
                "query": "q",
                "page": 1,
                "page_size": 5,
                "has_more": false,
                "results": [
                    {"url": "https://example.com/a", "title": "A", "content": "snippet a"},
                    {"url": "https://example.org/b", "title": "B"}
                ]
            }))
        }
    }

    fn search_call(id: &str) -> CompletionResponse {
        CompletionResponse {
            content: None,
            tool_calls: vec![ToolCall {
                id: id.to_string(),
                name: "web_search".to_string(),
                input: json!({"query": "q"}),
            }],
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage::default(),
        }
    }

    fn runner_with(responses: Vec<CompletionResponse>) -> SubagentRunner {
        let mut registry = ToolRegistry::new(".");
        registry.register(Box::new(FakeSearchTool));
        SubagentRunner::new(Arc::new(MockClient::new(responses)), Arc::new(registry))
    }

    #[tokio::test]
    async fn test_citations_collected_from_search() {
        let runner = runner_with(vec![search_call("c1"), CompletionResponse::text("note")]);
        let mut task = SubagentTask::new("find stuff");
        task.max_web_search_calls = Some(3);

        let (output, trace) = runner.run_task_with_trace(&task).await.unwrap();
        assert_eq!(output, "note");
        assert_eq!(trace.web_search_calls, 1);
        assert_eq!(trace.citations.len(), 2);
        assert_eq!(
            trace.sources.get("https://example.com/a").unwrap().snippet.as_deref(),
            Some("snippet a")
        );
    }

    #[tokio::test]
    async fn test_web_search_cap_returns_synthetic_failure() {
        let runner = runner_with(vec![
            search_call("c1"),
            search_call("c2"),
            CompletionResponse::text("done"),
        ]);
        let mut task = SubagentTask::new("search a lot");
        task.max_web_search_calls = Some(1);

        let (_, trace) = runner.run_task_with_trace(&task).await.unwrap();
        // Both calls recorded, second one synthetic
        assert_eq!(trace.tool_calls.len(), 2);
        let second = &trace.tool_calls[1];
        assert_eq!(second.result["success"], false);
        assert!(second.result["error"].as_str().unwrap().contains("Max web_search calls reached"));
        // The synthetic failure still counts toward the counter
        assert_eq!(trace.web_search_calls, 2);
        // But no new citations came from it
        assert_eq!(trace.citations.len(), 2);
    }

    #[tokio::test]
    async fn test_allowlist_blocks_without_executing() {
        let runner = runner_with(vec![
            CompletionResponse {
                content: None,
                tool_calls: vec![ToolCall {
                    id: "c1".to_string(),
                    name: "web_search".to_string(),
                    input: json!({}),
                }],
                stop_reason: StopReason::ToolUse,
                usage: TokenUsage::default(),
            },
            CompletionResponse::text("done"),
        ]);
        let mut task = SubagentTask::new("blocked");
        task.allowed_tools = Some(["read_file".to_string()].into_iter().collect());

        let (_, trace) = runner.run_task_with_trace(&task).await.unwrap();
        assert_eq!(trace.tool_calls[0].result["success"], false);
        assert!(
            trace.tool_calls[0].result["error"]
                .as_str()
                .unwrap()
                .contains("not allowed")
        );
        assert!(trace.citations.is_empty());
    }

    #[tokio::test]
    async fn test_budget_exhaustion_returns_sentinel() {
        let responses: Vec<CompletionResponse> = (0..4).map(|i| search_call(&format!("c{i}"))).collect();
        let runner = runner_with(responses);
        let mut task = SubagentTask::new("never stops");
        task.max_iterations = 2;

        let (output, trace) = runner.run_task_with_trace(&task).await.unwrap();
        assert_eq!(output, MAX_ITERATIONS_SENTINEL);
        assert_eq!(trace.iterations, 2);
    }
}
