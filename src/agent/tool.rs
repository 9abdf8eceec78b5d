//! Tool type definitions for the navigator's function-calling surface.
//!
//! Provides provider-agnostic types for tool definitions, calls, and
//! results, plus the fixed registry of the four navigation operations the
//! driving agent may invoke. The registry is populated at build time; there
//! is no dynamic tool discovery.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// A tool definition that can be sent to an LLM for function-calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (must match the executor's dispatch table).
    pub name: String,
    /// Human-readable description of what the tool does.
    pub description: String,
    /// JSON Schema object describing the tool's parameters.
    pub parameters: serde_json::Value,
}

/// A tool call requested by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this call (assigned by the provider).
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON-encoded arguments for the tool.
    pub arguments: String,
}

/// The result of executing a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// ID of the tool call this result corresponds to.
    pub tool_call_id: String,
    /// Result content shown to the model.
    pub content: String,
    /// Whether this result represents an error.
    pub is_error: bool,
}

/// A set of tool definitions scoped to an agent role.
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    definitions: Vec<ToolDefinition>,
}

impl ToolSet {
    /// Returns the tool definitions in this set.
    #[must_use]
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Returns `true` if this set contains no tools.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Returns the number of tools in this set.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.definitions.len()
    }

    /// The navigator tool set: `inspect_document_hierarchy`,
    /// `examine_summary_node`, `read_neighbor_node`, `search_summaries`.
    #[must_use]
    pub fn navigator_tools() -> Self {
        Self {
            definitions: vec![
                def_inspect_document_hierarchy(),
                def_examine_summary_node(),
                def_read_neighbor_node(),
                def_search_summaries(),
            ],
        }
    }

    /// Empty tool set (no tools available).
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Tool schema definitions
// ---------------------------------------------------------------------------

/// Defines the `inspect_document_hierarchy` tool.
fn def_inspect_document_hierarchy() -> ToolDefinition {
    ToolDefinition {
        name: "inspect_document_hierarchy".to_string(),
        description: "List the root summary nodes of the document tree, one per line as \
                       (id, text). Use this first to find a starting point."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        }),
    }
}

/// Defines the `examine_summary_node` tool.
fn def_examine_summary_node() -> ToolDefinition {
    ToolDefinition {
        name: "examine_summary_node".to_string(),
        description: "Examine one node. Internal nodes return their children for further \
                       navigation. Leaf nodes hold raw text: pass a question as 'query' and \
                       a sub-agent reads the text and answers; the raw text is never shown \
                       to you."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "node_id": {
                    "type": "integer",
                    "description": "ID of the node to inspect."
                },
                "query": {
                    "type": "string",
                    "description": "Question for the sub-agent. Required when the node is a leaf."
                }
            },
            "required": ["node_id"],
            "additionalProperties": false
        }),
    }
}

/// Defines the `read_neighbor_node` tool.
fn def_read_neighbor_node() -> ToolDefinition {
    ToolDefinition {
        name: "read_neighbor_node".to_string(),
        description: "Move to the adjacent node in the narrative flow: the next or previous \
                       sibling, or the parent. Useful for reading the 'next page' without \
                       climbing back up."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "node_id": {
                    "type": "integer",
                    "description": "ID of the node you are currently looking at."
                },
                "direction": {
                    "type": "string",
                    "enum": ["next", "prev", "parent"],
                    "description": "Which neighbour to read."
                }
            },
            "required": ["node_id", "direction"],
            "additionalProperties": false
        }),
    }
}

/// Defines the `search_summaries` tool.
fn def_search_summaries() -> ToolDefinition {
    ToolDefinition {
        name: "search_summaries".to_string(),
        description: "Case-sensitive substring search across all summary texts. Returns \
                       (id, level, snippet) rows to use as navigation starting points."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Substring to search for."
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of results. Defaults to 10.",
                    "default": 10
                }
            },
            "required": ["query"],
            "additionalProperties": false
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigator_toolset() {
        let ts = ToolSet::navigator_tools();
        assert_eq!(ts.len(), 4);
        let names: Vec<&str> = ts.definitions().iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"inspect_document_hierarchy"));
        assert!(names.contains(&"examine_summary_node"));
        assert!(names.contains(&"read_neighbor_node"));
        assert!(names.contains(&"search_summaries"));
    }

    #[test]
    fn test_toolset_none() {
        let ts = ToolSet::none();
        assert!(ts.is_empty());
        assert_eq!(ts.len(), 0);
    }

    #[test]
    fn test_all_definitions_have_valid_schemas() {
        for def in ToolSet::navigator_tools().definitions() {
            assert!(!def.name.is_empty());
            assert!(!def.description.is_empty());
            assert!(def.parameters.is_object());
            assert_eq!(def.parameters["type"], "object");
        }
    }

    #[test]
    fn test_tool_call_serialization() {
        let call = ToolCall {
            id: "call_123".to_string(),
            name: "read_neighbor_node".to_string(),
            arguments: r#"{"node_id":4,"direction":"next"}"#.to_string(),
        };
        let json = serde_json::to_string(&call).unwrap_or_default();
        assert!(json.contains("call_123"));
        assert!(json.contains("read_neighbor_node"));
    }
}
