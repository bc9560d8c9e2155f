//! ProspectD - multi-agent deep research and pain-signal ingestion
//!
//! Two long-running workflows share one tool-calling LLM loop:
//!
//! - **Deep research**: plan web searches, fan them out to bounded parallel
//!   sub-agent workers, select diverse evidence, and synthesize a grounded,
//!   cited Markdown report.
//! - **Ingestion**: seed and score search tasks across content sources,
//!   fetch documents under per-source circuit breakers, extract structured
//!   pain snippets with an LLM, and stop on saturation or budget.
//!
//! # Modules
//!
//! - [`llm`] - completion port (trait + OpenAI-compatible client)
//! - [`tools`] - tool registry and built-in tools (files + web)
//! - [`agent`] - the tool-calling loop, sub-agent runner, worker fan-out
//! - [`research`] - deep-research orchestrator and rendering
//! - [`ingest`] - ingestion scheduler and extraction pipeline
//! - [`events`] - typed event emission for front-ends
//! - [`config`] - YAML configuration and validation

pub mod agent;
pub mod cli;
pub mod config;
pub mod events;
pub mod ingest;
pub mod llm;
pub mod research;
pub mod tools;

pub use agent::{
    Hooks, LoopConfig, LoopResult, ParallelWorkerRunner, SpawnOptions, SubagentRunner, SubagentTrace, ToolCallRecord,
    WorkerPool, WorkerResult, WorkerTask, run_loop,
};
pub use config::{Config, ConfigError, IngestConfig, LlmConfig};
pub use events::{AgentEvent, EventEmitter, PlannedTaskSummary};
pub use llm::{
    CompletionClient, CompletionRequest, CompletionResponse, ContentBlock, LlmError, Message, MessageContent,
    OpenAiClient, Role, StopReason, StreamChunk, TokenUsage, ToolCall, ToolDefinition,
};
pub use research::{
    DeepResearch, PlanningError, ReportType, ResearchConfig, ResearchError, ResearchMemo, ResearchOutcome,
    ResearchRunError, ResearchStrategy, SynthesisError,
};
pub use tools::{Tool, ToolContext, ToolRegistry};
