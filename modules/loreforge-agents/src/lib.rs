//! Agent routing and the tool runtime: a closed set of specialized agents,
//! an LLM-backed router that picks one per user message, and a dispatch-table
//! tool runtime where mutating tools require explicit confirmation.

pub mod registry;
pub mod router;
pub mod tools;

pub use registry::{AgentDescriptor, AgentRegistry, AgentType};
pub use router::{AgentRouter, RoutedAgent};
pub use tools::{Tool, ToolCall, ToolInvocation, ToolResult, ToolRuntime};
