//! Tool executor that dispatches tool calls to the navigator.
//!
//! Maps tool names onto [`NavigatorOp`] variants and runs them. Malformed
//! arguments and unknown tool names come back as error results for the
//! model to read; navigator operations themselves never fail — their error
//! cases are content strings.

use serde::Deserialize;

use super::tool::{ToolCall, ToolResult};
use crate::navigate::{DEFAULT_SEARCH_LIMIT, Navigator, NavigatorOp};
use crate::storage::Store;
use crate::summarize::SummarizationService;

/// Maximum raw byte length of tool argument JSON from the LLM.
const MAX_TOOL_ARGS_LEN: usize = 100_000;

/// Executes tool calls against the navigator surface.
pub struct ToolExecutor<'a> {
    navigator: Navigator<'a>,
}

impl<'a> ToolExecutor<'a> {
    /// Creates an executor over the given store and summarization service.
    #[must_use]
    pub const fn new(store: &'a dyn Store, service: &'a SummarizationService) -> Self {
        Self {
            navigator: Navigator::new(store, service),
        }
    }

    /// Dispatches one tool call.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        if call.arguments.len() > MAX_TOOL_ARGS_LEN {
            return ToolResult {
                tool_call_id: call.id.clone(),
                content: format!(
                    "tool arguments too large ({} bytes, max {MAX_TOOL_ARGS_LEN})",
                    call.arguments.len()
                ),
                is_error: true,
            };
        }

        match Self::parse_op(&call.name, &call.arguments) {
            Ok(op) => ToolResult {
                tool_call_id: call.id.clone(),
                content: self.navigator.dispatch(op).await,
                is_error: false,
            },
            Err(message) => ToolResult {
                tool_call_id: call.id.clone(),
                content: message,
                is_error: true,
            },
        }
    }

    /// Maps (tool name, JSON arguments) onto the fixed operation set.
    fn parse_op(name: &str, arguments: &str) -> Result<NavigatorOp, String> {
        let arguments = if arguments.trim().is_empty() {
            "{}"
        } else {
            arguments
        };

        match name {
            "inspect_document_hierarchy" => Ok(NavigatorOp::InspectDocumentHierarchy),
            "examine_summary_node" => {
                #[derive(Deserialize)]
                struct Args {
                    node_id: i64,
                    #[serde(default)]
                    query: Option<String>,
                }
                let args: Args = serde_json::from_str(arguments)
                    .map_err(|e| format!("invalid arguments for {name}: {e}"))?;
                Ok(NavigatorOp::ExamineSummaryNode {
                    node_id: args.node_id,
                    query: args.query,
                })
            }
            "read_neighbor_node" => {
                #[derive(Deserialize)]
                struct Args {
                    node_id: i64,
                    direction: String,
                }
                let args: Args = serde_json::from_str(arguments)
                    .map_err(|e| format!("invalid arguments for {name}: {e}"))?;
                let direction = args
                    .direction
                    .parse()
                    .map_err(|e| format!("invalid arguments for {name}: {e}"))?;
                Ok(NavigatorOp::ReadNeighborNode {
                    node_id: args.node_id,
                    direction,
                })
            }
            "search_summaries" => {
                #[derive(Deserialize)]
                struct Args {
                    query: String,
                    #[serde(default)]
                    limit: Option<usize>,
                }
                let args: Args = serde_json::from_str(arguments)
                    .map_err(|e| format!("invalid arguments for {name}: {e}"))?;
                Ok(NavigatorOp::SearchSummaries {
                    query: args.query,
                    limit: args.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
                })
            }
            other => Err(format!("unknown tool: {other}")),
        }
    }
}

impl std::fmt::Debug for ToolExecutor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor").finish_non_exhaustive()
    }
}
