//! LLM completion port
//!
//! A stateless request interface: each call carries the full message list.
//! Concrete providers live behind [`CompletionClient`]; the rest of the
//! crate only sees provider-agnostic types.

mod client;
mod error;
mod openai;
mod types;

pub use client::CompletionClient;
pub use error::LlmError;
pub use openai::OpenAiClient;
pub use types::{
    CompletionRequest, CompletionResponse, ContentBlock, Message, MessageContent, Role, StopReason, StreamChunk,
    TokenUsage, ToolCall, ToolDefinition,
};

#[cfg(test)]
pub use client::mock;
