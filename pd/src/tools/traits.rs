//! Tool trait definition

use async_trait::async_trait;
use serde_json::Value;

use super::context::ToolContext;

/// A tool that can be called by the LLM.
///
/// Implementations return their payload as a JSON value; the registry wraps
/// it into the `{success, result|error}` envelope the model sees. Errors
/// returned here never propagate past the registry.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (matches the LLM tool-call name)
    fn name(&self) -> &'static str;

    /// Human-readable description
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters
    fn input_schema(&self) -> Value;

    /// Execute the tool
    async fn execute(&self, input: Value, ctx: &ToolContext) -> eyre::Result<Value>;
}
