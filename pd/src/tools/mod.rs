//! Tool system for agent loops
//!
//! Tools are named, schema-described operations the LLM can call. The
//! registry is effectively immutable during a run; workers get a read-only
//! subset ({read_file, grep, list_files, web_search, web_extract}) and a
//! [`ToolContext`] scoped to one root directory.

mod context;
mod registry;
mod traits;

pub mod builtin;

pub use context::ToolContext;
pub use registry::ToolRegistry;
pub use traits::Tool;

/// Tool names a research worker may use when writes are disallowed
pub const WORKER_SAFE_TOOLS: [&str; 5] = ["read_file", "grep", "list_files", "web_search", "web_extract"];
