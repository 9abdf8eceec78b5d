//! Persistent store for chunks and summary-tree nodes.
//!
//! The store owns both entities exclusively; every other component passes
//! ids. Two tables back it: `chunks` (raw document slices) and `summaries`
//! (tree nodes with parent/sequence pointers and, for level 0 only, a
//! `chunk_id` linkage).

mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::StorageError;

/// Metadata for a single summary node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMeta {
    /// Tree level (0 = leaf).
    pub level: i64,
    /// Summary text.
    pub text: String,
}

/// Neighbours of a node in the tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdjacentNodes {
    /// Previous sibling under the same parent, if any.
    pub prev: Option<i64>,
    /// Next sibling under the same parent, if any.
    pub next: Option<i64>,
    /// Parent node, if any.
    pub parent: Option<i64>,
}

/// A substring search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    /// Node id.
    pub id: i64,
    /// Tree level.
    pub level: i64,
    /// Full summary text (callers snippet it).
    pub text: String,
}

/// Everything a summarizer needs to regenerate one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContext {
    /// Tree level of the node.
    pub level: i64,
    /// Linked chunk text (level-0 nodes only).
    pub chunk_text: Option<String>,
    /// Child summary texts in sibling order (higher levels only).
    pub child_texts: Vec<String>,
}

/// Summaries classified by sentinel failure mode.
#[derive(Debug, Clone, Default)]
pub struct BrokenSummaries {
    /// Nodes containing a provider-returned-error marker.
    pub provider_error: Vec<(i64, String)>,
    /// Nodes containing model thinking blocks.
    pub control_tokens: Vec<(i64, String)>,
    /// Nodes whose text begins with a code fence.
    pub code_fence: Vec<(i64, String)>,
}

/// Aggregate counts for the `status` command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of stored chunks.
    pub chunks: usize,
    /// Number of summary nodes.
    pub summaries: usize,
    /// Highest observed tree level, if any nodes exist.
    pub max_level: Option<i64>,
}

/// Operations the ingester, repairer, and navigator rely on.
///
/// Implementations serialize writes; callers on the driving thread perform
/// all mutations, so a single connection suffices.
pub trait Store {
    /// Persists a chunk and returns its id.
    fn add_chunk(&self, text: &str, start: usize, end: usize, source: &str)
    -> Result<i64, StorageError>;

    /// Persists a summary node and returns its id.
    fn add_summary(
        &self,
        text: &str,
        level: i64,
        parent_id: Option<i64>,
        sequence_index: i64,
    ) -> Result<i64, StorageError>;

    /// Sets the level-0 chunk linkage. Idempotent.
    fn link_summary_to_chunk(&self, node_id: i64, chunk_id: i64) -> Result<(), StorageError>;

    /// Sets the parent pointer, exactly when previously null.
    ///
    /// Re-setting to the same parent is a no-op; repointing to a different
    /// parent is [`StorageError::ParentAlreadySet`].
    fn update_summary_parent(&self, node_id: i64, parent_id: i64) -> Result<(), StorageError>;

    /// Rewrites a node's text. Used only by repair.
    fn update_summary_text(&self, node_id: i64, text: &str) -> Result<(), StorageError>;

    /// Nodes at the maximum observed level, ordered by sequence index.
    fn roots(&self) -> Result<Vec<(i64, String)>, StorageError>;

    /// Children of a node, ordered by sequence index.
    fn children(&self, parent_id: i64) -> Result<Vec<(i64, String)>, StorageError>;

    /// Previous/next sibling and parent of a node, or `None` if the node
    /// does not exist.
    fn adjacent(&self, node_id: i64) -> Result<Option<AdjacentNodes>, StorageError>;

    /// Level and text of a node, or `None` if unknown.
    fn node_metadata(&self, node_id: i64) -> Result<Option<NodeMeta>, StorageError>;

    /// The chunk linked to a level-0 node, if any.
    fn chunk_id_of(&self, node_id: i64) -> Result<Option<i64>, StorageError>;

    /// Raw text of one chunk.
    fn chunk_text(&self, chunk_id: i64) -> Result<Option<String>, StorageError>;

    /// Raw texts of many chunks, preserving input order.
    fn chunk_texts(&self, chunk_ids: &[i64]) -> Result<Vec<Option<String>>, StorageError>;

    /// Text of one summary node.
    fn summary_text(&self, node_id: i64) -> Result<Option<String>, StorageError>;

    /// Texts of many summary nodes, preserving input order.
    fn summaries_text(&self, node_ids: &[i64]) -> Result<Vec<Option<String>>, StorageError>;

    /// Case-sensitive substring search over summary texts.
    fn search(&self, needle: &str, limit: usize) -> Result<Vec<SearchHit>, StorageError>;

    /// Highest tree level, or `None` when no summaries exist.
    fn max_level(&self) -> Result<Option<i64>, StorageError>;

    /// Nodes at the current maximum level with null parent, in a
    /// deterministic regrouping order.
    fn orphan_summaries(&self) -> Result<Vec<i64>, StorageError>;

    /// Chunks that no level-0 node references, with their texts, in
    /// document order.
    fn chunks_without_summary(&self) -> Result<Vec<(i64, String)>, StorageError>;

    /// Position of a chunk in document order (0-based).
    fn chunk_ordinal(&self, chunk_id: i64) -> Result<i64, StorageError>;

    /// Summaries classified by sentinel failure mode.
    fn broken_summaries(&self) -> Result<BrokenSummaries, StorageError>;

    /// The regeneration inputs for one node, or `None` if unknown.
    fn summary_with_context(&self, node_id: i64) -> Result<Option<NodeContext>, StorageError>;

    /// Aggregate store statistics.
    fn stats(&self) -> Result<StoreStats, StorageError>;
}
