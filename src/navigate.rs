//! Navigator tool surface over the persisted summary tree.
//!
//! These are the operations the driving agent calls to inspect, descend,
//! and read. Every operation returns a content string meant for a language
//! model; unknown ids, empty queries, and unreachable neighbours are all
//! reported as content, never raised. Leaf reads are delegated to a
//! disposable sub-agent so the caller's context never sees raw chunk text.

use std::fmt::Write as _;
use std::str::FromStr;

use unicode_segmentation::UnicodeSegmentation;

use crate::storage::Store;
use crate::summarize::SummarizationService;

/// Default result cap for `search_summaries`.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Grapheme count for the node-header snippet.
const HEADER_SNIPPET_LEN: usize = 75;
/// Grapheme count for search result snippets.
const SEARCH_SNIPPET_LEN: usize = 150;

/// Direction for [`Navigator::read_neighbor_node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Next sibling in document order.
    Next,
    /// Previous sibling in document order.
    Prev,
    /// The parent node.
    Parent,
}

impl Direction {
    /// String form used in tool arguments and messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::Prev => "prev",
            Self::Parent => "parent",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "next" => Ok(Self::Next),
            "prev" | "previous" => Ok(Self::Prev),
            "parent" => Ok(Self::Parent),
            other => Err(format!(
                "direction must be one of next, prev, parent (got '{other}')"
            )),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed set of navigation operations, as a tagged union.
///
/// The tool executor maps tool names onto these variants at build time;
/// there is no dynamic discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigatorOp {
    /// List the root summaries.
    InspectDocumentHierarchy,
    /// Examine one node; leaves require a query.
    ExamineSummaryNode {
        /// Node to inspect.
        node_id: i64,
        /// Question for the sub-agent when the node is a leaf.
        query: Option<String>,
    },
    /// Read an adjacent node.
    ReadNeighborNode {
        /// Current node.
        node_id: i64,
        /// Which neighbour to read.
        direction: Direction,
    },
    /// Substring search over summary texts.
    SearchSummaries {
        /// Substring to look for.
        query: String,
        /// Result cap.
        limit: usize,
    },
}

/// Stateless tool surface over a store and the shared summarization
/// service (for sub-agent spawns).
pub struct Navigator<'a> {
    store: &'a dyn Store,
    service: &'a SummarizationService,
}

impl<'a> Navigator<'a> {
    /// Creates a navigator over the given store and service.
    #[must_use]
    pub const fn new(store: &'a dyn Store, service: &'a SummarizationService) -> Self {
        Self { store, service }
    }

    /// Executes one operation.
    pub async fn dispatch(&self, op: NavigatorOp) -> String {
        match op {
            NavigatorOp::InspectDocumentHierarchy => self.inspect_document_hierarchy(),
            NavigatorOp::ExamineSummaryNode { node_id, query } => {
                self.examine_summary_node(node_id, query.as_deref()).await
            }
            NavigatorOp::ReadNeighborNode { node_id, direction } => {
                self.read_neighbor_node(node_id, direction)
            }
            NavigatorOp::SearchSummaries { query, limit } => {
                self.search_summaries(&query, limit)
            }
        }
    }

    /// Returns the top-level (root) summaries, one per line.
    pub fn inspect_document_hierarchy(&self) -> String {
        let roots = match self.store.roots() {
            Ok(roots) => roots,
            Err(e) => return format!("Error: failed to read document structure: {e}"),
        };
        if roots.is_empty() {
            return "No document structure found. The index might be empty.".to_string();
        }

        let mut output = String::from("Document Root Nodes:\n");
        for (id, text) in roots {
            let _ = write!(output, "<id>{id}</id>\n<text>\n{text}\n</text>\n\n");
        }
        output
    }

    /// The primary navigation and analysis operation.
    ///
    /// Internal nodes return their children for further navigation. Leaf
    /// nodes spawn a sub-agent that reads the linked chunk and answers
    /// `query`; without a query the caller gets a diagnostic instead of
    /// raw text.
    pub async fn examine_summary_node(&self, node_id: i64, query: Option<&str>) -> String {
        let node = match self.store.node_metadata(node_id) {
            Ok(Some(node)) => node,
            Ok(None) => return format!("Error: Node ID {node_id} not found."),
            Err(e) => return format!("Error: failed to read node {node_id}: {e}"),
        };

        if node.level > 0 {
            let children = match self.store.children(node_id) {
                Ok(children) => children,
                Err(e) => return format!("Error: failed to read children of {node_id}: {e}"),
            };
            if children.is_empty() {
                return format!("Node {node_id} (Level {}) is empty (no children).", node.level);
            }

            let mut output = format!(
                "Node {node_id}\n<level>{}</level>\n<summary>{}...</summary>\n",
                node.level,
                snippet(&node.text, HEADER_SNIPPET_LEN)
            );
            let _ = write!(output, "Contains {} children.\n<children>\n", children.len());
            for (child_id, child_text) in children {
                let _ = write!(
                    output,
                    "<child_id>{child_id}</child_id>\n<child_summary>\n{child_text}\n</child_summary>\n"
                );
            }
            output.push_str("</children>\n");
            return output;
        }

        // Leaf: never surface raw chunk text to the caller.
        let query = match query {
            Some(q) if !q.trim().is_empty() => q,
            _ => {
                return format!(
                    "Node {node_id} is a Leaf Node containing raw text. To prevent context \
                     overflow, you must provide a specific 'query' argument to analyze this \
                     text. (e.g., examine_summary_node({node_id}, query='What is the \
                     specific date mentioned?'))"
                );
            }
        };

        let chunk_id = match self.store.chunk_id_of(node_id) {
            Ok(Some(chunk_id)) => chunk_id,
            Ok(None) => return format!("Error: Leaf Node {node_id} has no linked raw text chunk."),
            Err(e) => return format!("Error: failed to resolve chunk for {node_id}: {e}"),
        };

        let raw_text = match self.store.chunk_text(chunk_id) {
            Ok(Some(text)) => text,
            Ok(None) => return format!("Error: Could not retrieve text for chunk {chunk_id}."),
            Err(e) => return format!("Error: failed to read chunk {chunk_id}: {e}"),
        };

        self.service.answer_about_chunk(&raw_text, query).await
    }

    /// Navigates to the adjacent node in the narrative flow.
    pub fn read_neighbor_node(&self, node_id: i64, direction: Direction) -> String {
        let adjacent = match self.store.adjacent(node_id) {
            Ok(Some(adjacent)) => adjacent,
            Ok(None) => return format!("Error: Node ID {node_id} not found."),
            Err(e) => return format!("Error: failed to read neighbours of {node_id}: {e}"),
        };

        let target = match direction {
            Direction::Next => adjacent.next,
            Direction::Prev => adjacent.prev,
            Direction::Parent => adjacent.parent,
        };
        let Some(target) = target else {
            return format!(
                "No {direction} node exists for Node {node_id} (it might be the start or \
                 end of the section)."
            );
        };

        let meta = match self.store.node_metadata(target) {
            Ok(Some(meta)) => meta,
            Ok(None) | Err(_) => {
                return format!("Error: Could not retrieve metadata for Node {target}.");
            }
        };

        format!(
            "Navigated {direction} to Node {target} (Level {}).\n<content>\n{}\n</content>",
            meta.level, meta.text
        )
    }

    /// Keyword search through the summary tree.
    pub fn search_summaries(&self, query: &str, limit: usize) -> String {
        let query = query.trim();
        if query.is_empty() {
            return "Error: Query cannot be empty.".to_string();
        }

        let hits = match self.store.search(query, limit) {
            Ok(hits) => hits,
            Err(e) => return format!("Error: search failed: {e}"),
        };
        if hits.is_empty() {
            return format!("No matches found for '{query}'.");
        }

        let mut output = format!("Search Results for '{query}':\n");
        for hit in hits {
            let _ = write!(
                output,
                "- <id>{}</id>\n<level>{}</level>\n<summary_snippet>{}...</summary_snippet>\n",
                hit.id,
                hit.level,
                snippet(&hit.text, SEARCH_SNIPPET_LEN)
            );
        }
        output
    }
}

impl std::fmt::Debug for Navigator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Navigator").finish_non_exhaustive()
    }
}

/// Grapheme-safe prefix of `text`.
fn snippet(text: &str, max_graphemes: usize) -> String {
    text.graphemes(true).take(max_graphemes).collect()
}
