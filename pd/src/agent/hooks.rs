//! Loop hooks - explicit callback record passed to the agent loop
//!
//! No subclassing, no dynamic dispatch beyond these callbacks: callers that
//! need to observe the loop hand over a `Hooks` value with whatever
//! callbacks they care about.

use serde_json::Value;

/// Optional observation points inside [`crate::agent::run_loop`]
#[derive(Default)]
pub struct Hooks {
    /// Final assistant text for a turn
    pub on_assistant_message: Option<Box<dyn Fn(&str) + Send + Sync>>,

    /// Tool name and wrapped result after each tool execution
    pub on_tool_result: Option<Box<dyn Fn(&str, &Value) + Send + Sync>>,

    /// Iteration number after each completed loop turn
    pub on_turn_end: Option<Box<dyn Fn(u32) + Send + Sync>>,
}

impl Hooks {
    pub fn none() -> Self {
        Self::default()
    }
}
