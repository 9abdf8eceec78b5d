//! Provider abstraction and the navigator's function-calling surface.
//!
//! The summarization service sends plain completions through
//! [`LlmProvider`]; the `query` command additionally runs the
//! [`agentic_loop`] with the four navigation tools exposed to the driving
//! agent.
//!
//! ```text
//! query → agentic_loop
//!   ├── LlmProvider (OpenAI-compatible backend per rotated model)
//!   └── ToolExecutor → Navigator
//!         ├── inspect_document_hierarchy
//!         ├── examine_summary_node  ──(leaf + query)──▶ sub-agent spawn
//!         ├── read_neighbor_node
//!         └── search_summaries
//! ```

pub mod agentic_loop;
pub mod executor;
pub mod message;
pub mod provider;
pub mod providers;
pub mod tool;

pub use agentic_loop::agentic_loop as run_agentic_loop;
pub use executor::ToolExecutor;
pub use message::{ChatMessage, ChatRequest, ChatResponse, Role, system_message, user_message};
pub use provider::{LlmProvider, ProviderFactory};
pub use providers::{OpenAiCompatFactory, OpenAiProvider};
pub use tool::{ToolCall, ToolDefinition, ToolResult, ToolSet};
