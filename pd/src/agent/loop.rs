//! The tool-calling agent loop
//!
//! Alternates between LLM completion and tool execution until the model
//! emits a terminal text message or the iteration budget runs out. The
//! iteration counter bounds both cost and liveness.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::events::{AgentEvent, EventEmitter};
use crate::llm::{
    CompletionClient, CompletionRequest, CompletionResponse, ContentBlock, LlmError, Message, StreamChunk,
};
use crate::tools::ToolRegistry;

use super::hooks::Hooks;

/// Fixed delay before the single rate-limit retry at the loop boundary
const RATE_LIMIT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Configuration for one agent loop run
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub model: String,
    pub system_prompt: Option<String>,
    pub max_iterations: u32,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
    pub use_tools: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            system_prompt: None,
            max_iterations: 10,
            temperature: 0.0,
            max_tokens: 4096,
            stream: true,
            use_tools: true,
        }
    }
}

/// Outcome of an agent loop run
#[derive(Debug, Clone)]
pub struct LoopResult {
    pub iterations: u32,
    pub final_response: String,
}

/// Complete with a single retry after a fixed delay when rate limited.
///
/// Deeper transient errors surface to the caller.
pub async fn complete_with_rate_limit_retry(
    client: &Arc<dyn CompletionClient>,
    request: CompletionRequest,
) -> Result<CompletionResponse, LlmError> {
    match client.complete(request.clone()).await {
        Ok(response) => Ok(response),
        Err(e) if e.is_rate_limit() => {
            warn!(error = %e, "complete_with_rate_limit_retry: rate limited, retrying once");
            tokio::time::sleep(RATE_LIMIT_RETRY_DELAY).await;
            client.complete(request).await
        }
        Err(e) => Err(e),
    }
}

async fn stream_to_response(
    client: &Arc<dyn CompletionClient>,
    request: CompletionRequest,
    emitter: Option<&EventEmitter>,
) -> Result<CompletionResponse, LlmError> {
    let (tx, mut rx) = mpsc::channel::<StreamChunk>(64);
    let client = client.clone();
    let handle = tokio::spawn(async move { client.stream(request, tx).await });

    while let Some(chunk) = rx.recv().await {
        if let StreamChunk::TextDelta(text) = chunk
            && let Some(emitter) = emitter
        {
            emitter.emit(AgentEvent::AssistantDelta { text });
        }
    }

    handle
        .await
        .map_err(|e| LlmError::InvalidResponse(format!("stream task failed: {e}")))?
}

/// Run the tool-calling loop over a mutable message history.
///
/// Appends assistant turns, tool calls, and tool results to `messages` so
/// the caller keeps the full conversation. Returns the iteration count and
/// the final assistant text (empty if the model produced none).
pub async fn run_loop(
    client: &Arc<dyn CompletionClient>,
    messages: &mut Vec<Message>,
    registry: &ToolRegistry,
    config: &LoopConfig,
    emitter: Option<&EventEmitter>,
    hooks: &Hooks,
) -> Result<LoopResult, LlmError> {
    debug!(model = %config.model, max_iterations = config.max_iterations, "run_loop: called");

    let tools = if config.use_tools { registry.schemas() } else { Vec::new() };
    let mut final_response = String::new();
    let mut iteration = 0;

    while iteration < config.max_iterations {
        iteration += 1;

        if let Some(emitter) = emitter {
            emitter.emit(AgentEvent::AssistantResponseStart { iteration });
        }

        let request = CompletionRequest {
            system_prompt: config.system_prompt.clone(),
            messages: messages.clone(),
            tools: tools.clone(),
            tool_choice: if tools.is_empty() { None } else { Some("auto".to_string()) },
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        };

        let response = if config.stream {
            match stream_to_response(client, request.clone(), emitter).await {
                Ok(r) => r,
                Err(e) if e.is_rate_limit() => {
                    warn!(error = %e, "run_loop: stream rate limited, retrying once");
                    tokio::time::sleep(RATE_LIMIT_RETRY_DELAY).await;
                    stream_to_response(client, request, emitter).await?
                }
                Err(e) => return Err(e),
            }
        } else {
            complete_with_rate_limit_retry(client, request).await?
        };

        if !response.tool_calls.is_empty() {
            debug!(iteration, tool_count = response.tool_calls.len(), "run_loop: executing tool calls");

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
                if let Some(emitter) = emitter {
                    emitter.emit(AgentEvent::ToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        args: call.input.clone(),
                    });
                }

                let result = registry.execute(&call.name, call.input.clone()).await;

                if let Some(emitter) = emitter {
                    emitter.emit(AgentEvent::ToolResult {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        result: result.clone(),
                    });
                }
                if let Some(on_tool_result) = &hooks.on_tool_result {
                    on_tool_result(&call.name, &result);
                }

                result_blocks.push(ContentBlock::tool_result(&call.id, result.to_string(), false));
            }
            messages.push(Message::user_blocks(result_blocks));

            if let Some(on_turn_end) = &hooks.on_turn_end {
                on_turn_end(iteration);
            }
            continue;
        }

        match &response.content {
            Some(content) if !content.is_empty() => {
                debug!(iteration, "run_loop: terminal assistant message");
                final_response = content.clone();
                messages.push(Message::assistant(content.clone()));
                if let Some(emitter) = emitter {
                    emitter.emit(AgentEvent::AssistantMessage {
                        content: content.clone(),
                    });
                }
                if let Some(on_assistant_message) = &hooks.on_assistant_message {
                    on_assistant_message(content);
                }
            }
            _ => debug!(iteration, "run_loop: empty response, terminating"),
        }
        if let Some(on_turn_end) = &hooks.on_turn_end {
            on_turn_end(iteration);
        }
        break;
    }

    Ok(LoopResult {
        iterations: iteration,
        final_response,
    })
}
