//! Agent loops and worker fan-out
//!
//! - [`run_loop`] - the bounded tool-calling LLM loop everything builds on
//! - [`SubagentRunner`] - one nested loop with tool allowlists and caps
//! - [`ParallelWorkerRunner`] - bounded-concurrency fan-out with traces,
//!   evidence extraction, and an overall wall-clock timeout

mod hooks;
mod parallel;
mod runner;
mod subagent;
mod trace;

#[path = "loop.rs"]
mod agent_loop;

pub use agent_loop::{LoopConfig, LoopResult, complete_with_rate_limit_retry, run_loop};
pub use hooks::Hooks;
pub use parallel::{
    EvidenceRecord, ParallelWorkerRunner, SearchHit, SpawnOptions, WebExtractCallSummary, WebSearchCallSummary,
    WorkerResult, WorkerTask, domain_for,
};
pub use runner::{ResultCallback, WorkerPool};
pub use subagent::{SubagentRunner, SubagentTask};
pub use trace::{SourceMeta, SubagentTrace, ToolCallRecord};
