//! Three-phase hierarchical ingestion.
//!
//! Phase A chunks the document and persists the chunks in order. Phase B
//! fans leaf summarization out across the worker pool and stitches results
//! back by input index, so the level-0 sibling order reproduces document
//! order. Phase C groups the current level into batches and synthesizes
//! parents level by level until a single root or the depth cap.
//!
//! Every phase boundary is durable: an interrupted run leaves a store the
//! repairer can finish.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::join_all;
use memmap2::Mmap;
use tracing::{info, warn};

use crate::chunking::{ChunkPiece, Strategy, create_chunker};
use crate::error::IngestError;
use crate::storage::Store;
use crate::summarize::{SummarizationService, build_leaf_prompt, build_synthesis_prompt};
use crate::tokens::TokenMeter;

/// Parameters of one ingestion run.
#[derive(Debug, Clone, Copy)]
pub struct IngestParams {
    /// Token cap per chunk.
    pub max_chunk_tokens: usize,
    /// Children per parent node.
    pub group_size: usize,
    /// Levels to build above the leaves.
    pub max_depth: usize,
    /// Chunking strategy.
    pub strategy: Strategy,
}

impl Default for IngestParams {
    fn default() -> Self {
        Self {
            max_chunk_tokens: 4000,
            group_size: 5,
            max_depth: 1,
            strategy: Strategy::Fixed,
        }
    }
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Chunks persisted.
    pub chunks: usize,
    /// Level-0 nodes created.
    pub leaves: usize,
    /// Hierarchy levels built above the leaves.
    pub levels_built: usize,
    /// Nodes at the top level after the run.
    pub roots: usize,
}

/// Orchestrates chunking, leaf summarization, and hierarchy construction.
pub struct Ingester<'a> {
    store: &'a dyn Store,
    service: &'a SummarizationService,
    meter: &'a dyn TokenMeter,
    params: IngestParams,
    cancel: Arc<AtomicBool>,
}

impl<'a> Ingester<'a> {
    /// Creates the ingester.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::InvalidParameter`] for a zero group size or
    /// token cap.
    pub fn new(
        store: &'a dyn Store,
        service: &'a SummarizationService,
        meter: &'a dyn TokenMeter,
        params: IngestParams,
    ) -> Result<Self, IngestError> {
        if params.group_size == 0 {
            return Err(IngestError::InvalidParameter {
                message: "group_size must be at least 1".to_string(),
            });
        }
        if params.max_chunk_tokens == 0 {
            return Err(IngestError::InvalidParameter {
                message: "max_chunk_tokens must be at least 1".to_string(),
            });
        }
        Ok(Self {
            store,
            service,
            meter,
            params,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Installs a cancellation flag. When set, no new prompts are
    /// submitted; in-flight calls finish and the run exits with
    /// [`IngestError::Interrupted`], leaving durable partial progress.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Ingests a whole file.
    ///
    /// An empty file is not an error: it produces no chunks and no
    /// summaries.
    #[allow(unsafe_code)]
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestReport, IngestError> {
        if !path.exists() {
            return Err(IngestError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        if !path.is_file() {
            return Err(IngestError::NotAFile {
                path: path.to_path_buf(),
            });
        }

        let file = std::fs::File::open(path)?;
        // SAFETY: the mapping is read-only and dropped before this function
        // returns; concurrent truncation of the input is outside our
        // contract, as with any reader.
        let mmap = unsafe { Mmap::map(&file)? };
        let text = std::str::from_utf8(&mmap).map_err(|_| IngestError::InvalidUtf8 {
            path: path.to_path_buf(),
        })?;

        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if text.trim().is_empty() {
            warn!(path = %path.display(), "file is empty, nothing to ingest");
            return Ok(IngestReport::default());
        }

        info!(
            path = %path.display(),
            workers = self.service.worker_count(),
            strategy = %self.params.strategy,
            "indexing file"
        );
        self.ingest_text(text, &source).await
    }

    /// Ingests already-loaded text.
    pub async fn ingest_text(&self, text: &str, source: &str) -> Result<IngestReport, IngestError> {
        if text.trim().is_empty() {
            return Ok(IngestReport::default());
        }

        // Phase A: chunk and persist in document order.
        let mut chunker = create_chunker(
            self.params.strategy,
            text,
            self.params.max_chunk_tokens,
            self.meter,
            self.service,
        )?;
        let mut pieces: Vec<ChunkPiece> = Vec::new();
        let mut chunk_ids: Vec<i64> = Vec::new();
        while let Some(piece) = chunker.next_piece().await {
            let chunk_id = self
                .store
                .add_chunk(&piece.text, piece.start, piece.end, source)?;
            chunk_ids.push(chunk_id);
            pieces.push(piece);
        }
        drop(chunker);
        info!(chunks = chunk_ids.len(), "chunking complete, starting parallel summarization");

        if self.cancelled() {
            return Err(IngestError::Interrupted);
        }

        // Phase B: summarize all chunks in parallel, then write results in
        // input order so sequence_index mirrors the chunk ordinal.
        let prompts: Vec<String> = pieces.iter().map(|p| build_leaf_prompt(&p.text)).collect();
        let summaries = join_all(prompts.iter().map(|p| self.service.summarize(p))).await;

        let mut current_ids = Vec::with_capacity(summaries.len());
        for (sequence_index, summary) in summaries.iter().enumerate() {
            let node_id = self
                .store
                .add_summary(summary, 0, None, sequence_index as i64)?;
            self.store
                .link_summary_to_chunk(node_id, chunk_ids[sequence_index])?;
            current_ids.push(node_id);
        }
        let leaves = current_ids.len();

        // Phase C: levels are sequential, batches within a level parallel.
        let (levels_built, roots) = self.build_hierarchy(current_ids).await?;

        info!(chunks = chunk_ids.len(), leaves, levels_built, roots, "indexing complete");
        Ok(IngestReport {
            chunks: chunk_ids.len(),
            leaves,
            levels_built,
            roots,
        })
    }

    /// Builds parent levels over `current_ids` until one root remains or
    /// the depth cap is reached. Returns (levels built, top-level width).
    pub(crate) async fn build_hierarchy(
        &self,
        mut current_ids: Vec<i64>,
    ) -> Result<(usize, usize), IngestError> {
        let mut current_level: i64 = self.level_of_first(&current_ids)?;
        let mut levels_built = 0_usize;

        while current_ids.len() > 1 && levels_built < self.params.max_depth {
            if self.cancelled() {
                return Err(IngestError::Interrupted);
            }
            info!(
                level = current_level + 1,
                nodes = current_ids.len(),
                "building hierarchy level"
            );

            let batches: Vec<Vec<i64>> = current_ids
                .chunks(self.params.group_size)
                .map(<[i64]>::to_vec)
                .collect();

            let mut prompts = Vec::with_capacity(batches.len());
            for batch in &batches {
                let texts: Vec<String> = self
                    .store
                    .summaries_text(batch)?
                    .into_iter()
                    .flatten()
                    .collect();
                prompts.push(build_synthesis_prompt(&texts));
            }

            let summaries = join_all(prompts.iter().map(|p| self.service.summarize(p))).await;

            let mut next_ids = Vec::with_capacity(summaries.len());
            for (batch_index, summary) in summaries.iter().enumerate() {
                let parent_id =
                    self.store
                        .add_summary(summary, current_level + 1, None, batch_index as i64)?;
                for &child_id in &batches[batch_index] {
                    self.store.update_summary_parent(child_id, parent_id)?;
                }
                next_ids.push(parent_id);
            }

            current_ids = next_ids;
            current_level += 1;
            levels_built += 1;
        }

        if current_ids.len() == 1 {
            info!("tree converged to a single root node");
        }
        Ok((levels_built, current_ids.len()))
    }

    fn level_of_first(&self, ids: &[i64]) -> Result<i64, IngestError> {
        let Some(&first) = ids.first() else {
            return Ok(0);
        };
        Ok(self
            .store
            .node_metadata(first)?
            .map_or(0, |meta| meta.level))
    }
}

impl std::fmt::Debug for Ingester<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingester")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
