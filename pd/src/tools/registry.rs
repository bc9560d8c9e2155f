//! ToolRegistry - named, schema-described, callable operations

use std::collections::HashMap;

use serde_json::{Value, json};
use tracing::debug;

use crate::llm::ToolDefinition;

use super::context::ToolContext;
use super::traits::Tool;

/// Maps tool names to implementations and schemas.
///
/// `execute` never raises: implementation failures become
/// `{"success": false, "error": …}` and unknown names become
/// `{"error": "Tool <name> not found"}`, both visible to the model as
/// ordinary tool results.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    ctx: ToolContext,
}

impl ToolRegistry {
    /// Empty registry rooted at `root`
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            tools: HashMap::new(),
            ctx: ToolContext::new(root),
        }
    }

    /// Registry with the research tool set (files + web)
    pub fn with_research_tools(root: impl Into<std::path::PathBuf>) -> Self {
        let mut registry = Self::new(root);
        registry.register(Box::new(super::builtin::ReadFileTool));
        registry.register(Box::new(super::builtin::GrepTool));
        registry.register(Box::new(super::builtin::ListFilesTool));
        registry.register(Box::new(super::builtin::WebSearchTool::new()));
        registry.register(Box::new(super::builtin::WebExtractTool::new()));
        registry
    }

    /// Add a tool, overwriting any existing tool with the same name
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        debug!(tool_name = %tool.name(), "ToolRegistry::register: called");
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Schemas for every registered tool
    pub fn schemas(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition::new(t.name(), t.description(), t.input_schema()))
            .collect()
    }

    /// Check if a tool exists
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Execute a tool by name with a keyword-argument map.
    ///
    /// Always returns a JSON envelope; exceptions stop here.
    pub async fn execute(&self, name: &str, arguments: Value) -> Value {
        debug!(tool_name = %name, "ToolRegistry::execute: called");
        let Some(tool) = self.tools.get(name) else {
            debug!(tool_name = %name, "ToolRegistry::execute: unknown tool");
            return json!({ "error": format!("Tool {name} not found") });
        };

        match tool.execute(arguments, &self.ctx).await {
            Ok(result) => json!({ "success": true, "result": result }),
            Err(e) => {
                debug!(tool_name = %name, error = %e, "ToolRegistry::execute: tool failed");
                json!({ "success": false, "error": e.to_string() })
            }
        }
    }
}
