//! Built-in tools
//!
//! File tools are scoped to the context root; web tools call the Tavily
//! API and require `TAVILY_API_KEY`.

mod grep;
mod list_files;
mod read_file;
mod web_extract;
mod web_search;

pub use grep::GrepTool;
pub use list_files::ListFilesTool;
pub use read_file::ReadFileTool;
pub use web_extract::WebExtractTool;
pub use web_search::WebSearchTool;
