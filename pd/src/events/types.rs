//! Event types for prospectd activity streaming
//!
//! These events represent all observable activity across both workflows:
//! - planner output and per-worker completion (deep research)
//! - assistant streaming (response start, deltas, final message)
//! - tool execution (call + result)
//! - documents entering the ingestion pipeline
//! - progress and recoverable errors

use serde::{Deserialize, Serialize};

/// A planned search task as shown to event consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTaskSummary {
    pub id: String,
    pub search_query: String,
    pub instructions: String,
}

/// Core event enum - the vocabulary of prospectd's activity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// Stage-level progress (plan, workers, gap, verify, synthesize, done)
    Progress {
        stage: String,
        current: u64,
        total: Option<u64>,
        message: String,
    },
    /// The planner produced a validated set of search tasks
    ResearchPlan { tasks: Vec<PlannedTaskSummary> },
    /// A research worker finished (successfully or not)
    WorkerCompleted {
        task_id: String,
        success: bool,
        web_search_calls: u32,
        web_extract_calls: u32,
        citations: u64,
        domains: u64,
        evidence: u64,
        duration_ms: Option<u64>,
        error: String,
    },
    /// The assistant started an iteration of the tool loop
    AssistantResponseStart { iteration: u32 },
    /// A streamed text chunk
    AssistantDelta { text: String },
    /// The assistant finished a turn with text content
    AssistantMessage { content: String },
    /// A document entered the ingestion pipeline
    Document {
        doc_id: String,
        title: String,
        source: String,
    },
    /// The model requested a tool invocation
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },
    /// A tool invocation completed
    ToolResult {
        id: String,
        name: String,
        result: serde_json::Value,
    },
    /// A recoverable problem the consumer may want to surface
    Error { message: String, source: Option<String> },
}

impl AgentEvent {
    /// Get the event type name
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::Progress { .. } => "Progress",
            AgentEvent::ResearchPlan { .. } => "ResearchPlan",
            AgentEvent::WorkerCompleted { .. } => "WorkerCompleted",
            AgentEvent::AssistantResponseStart { .. } => "AssistantResponseStart",
            AgentEvent::AssistantDelta { .. } => "AssistantDelta",
            AgentEvent::AssistantMessage { .. } => "AssistantMessage",
            AgentEvent::Document { .. } => "Document",
            AgentEvent::ToolCall { .. } => "ToolCall",
            AgentEvent::ToolResult { .. } => "ToolResult",
            AgentEvent::Error { .. } => "Error",
        }
    }

    /// Shorthand for a progress event
    pub fn progress(stage: &str, current: u64, total: Option<u64>, message: impl Into<String>) -> Self {
        AgentEvent::Progress {
            stage: stage.to_string(),
            current,
            total,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind() {
        let event = AgentEvent::AssistantDelta {
            text: "hello".to_string(),
        };
        assert_eq!(event.kind(), "AssistantDelta");
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = AgentEvent::WorkerCompleted {
            task_id: "overview".to_string(),
            success: true,
            web_search_calls: 2,
            web_extract_calls: 1,
            citations: 5,
            domains: 3,
            evidence: 1,
            duration_ms: Some(1200),
            error: String::new(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"WorkerCompleted\""));

        let parsed: AgentEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind(), "WorkerCompleted");
    }
}
