//! Store validation and post-hoc repair.
//!
//! Validation scans for sentinel failure modes and structural gaps; repair
//! heals them in four phases: clean polluted texts, regenerate
//! provider-error nodes, fill missing leaves, and extend an unconnected
//! hierarchy. Repair never deletes nodes and never re-chunks; a repaired
//! store is a fixed point of repair.

use std::collections::BTreeMap;

use futures_util::future::join_all;
use tracing::{info, warn};

use crate::error::StorageError;
use crate::storage::Store;
use crate::summarize::{
    SummarizationService, build_leaf_prompt, build_synthesis_prompt, clean_summary_text,
    is_failed_summary,
};

/// Parameters governing hierarchy extension.
#[derive(Debug, Clone, Copy)]
pub struct RepairParams {
    /// Children per parent node.
    pub group_size: usize,
    /// Levels permitted above the leaves.
    pub max_depth: usize,
}

impl Default for RepairParams {
    fn default() -> Self {
        Self {
            group_size: 5,
            max_depth: 1,
        }
    }
}

/// Classification of everything wrong with a store.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Nodes whose text contains a provider-returned-error marker.
    pub provider_error: Vec<(i64, String)>,
    /// Nodes whose text contains model thinking blocks.
    pub control_tokens: Vec<(i64, String)>,
    /// Nodes whose text begins with a code fence.
    pub code_fence: Vec<(i64, String)>,
    /// Chunks with no linked level-0 node.
    pub missing_level_0: Vec<(i64, String)>,
    /// Nodes at the current top of the tree with null parent.
    pub orphan_summary_ids: Vec<i64>,
    /// Highest observed level.
    pub current_max_level: Option<i64>,
}

impl ValidationReport {
    /// `true` when no text is polluted and no chunk lacks a leaf.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.provider_error.is_empty()
            && self.control_tokens.is_empty()
            && self.code_fence.is_empty()
            && self.missing_level_0.is_empty()
    }
}

/// Counts reported by one repair pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairStats {
    /// Texts fixed by the sanitizer alone.
    pub cleaned: usize,
    /// Nodes regenerated through the LLM.
    pub regenerated: usize,
    /// Regenerations that still failed.
    pub failed: usize,
    /// Missing level-0 nodes created.
    pub generated_level_0: usize,
    /// Hierarchy levels built above former orphans.
    pub levels_extended: usize,
}

/// Validates and repairs one store.
pub struct Repairer<'a> {
    store: &'a dyn Store,
    service: &'a SummarizationService,
    params: RepairParams,
}

impl<'a> Repairer<'a> {
    /// Creates the repairer. A zero group size is clamped to one.
    #[must_use]
    pub fn new(
        store: &'a dyn Store,
        service: &'a SummarizationService,
        params: RepairParams,
    ) -> Self {
        Self {
            store,
            service,
            params: RepairParams {
                group_size: params.group_size.max(1),
                max_depth: params.max_depth,
            },
        }
    }

    /// Scans the store and classifies every defect.
    pub fn validate(&self) -> Result<ValidationReport, StorageError> {
        let broken = self.store.broken_summaries()?;
        Ok(ValidationReport {
            provider_error: broken.provider_error,
            control_tokens: broken.control_tokens,
            code_fence: broken.code_fence,
            missing_level_0: self.store.chunks_without_summary()?,
            orphan_summary_ids: self.store.orphan_summaries()?,
            current_max_level: self.store.max_level()?,
        })
    }

    /// Runs the four repair phases. With `dry_run` nothing is mutated and
    /// the counts describe what a real pass would do to the current state.
    pub async fn repair(&self, dry_run: bool) -> Result<RepairStats, StorageError> {
        let report = self.validate()?;
        let mut stats = RepairStats::default();

        // Phase 1: clean (no LLM calls).
        let mut cleanable: BTreeMap<i64, String> = BTreeMap::new();
        for (id, text) in report
            .control_tokens
            .iter()
            .chain(report.code_fence.iter())
        {
            cleanable.entry(*id).or_insert_with(|| text.clone());
        }
        for (id, text) in &cleanable {
            let cleaned = clean_summary_text(text);
            if !cleaned.is_empty() && cleaned != *text {
                if !dry_run {
                    self.store.update_summary_text(*id, &cleaned)?;
                }
                stats.cleaned += 1;
                info!(node = id, "cleaned summary");
            }
        }

        // Phase 2: regenerate provider errors.
        if !report.provider_error.is_empty() {
            if dry_run {
                stats.regenerated = report.provider_error.len();
            } else {
                let (regenerated, failed) = self.regenerate(&report.provider_error).await?;
                stats.regenerated = regenerated;
                stats.failed = failed;
            }
        }

        // Phase 3: fill missing leaves.
        if !report.missing_level_0.is_empty() {
            if dry_run {
                stats.generated_level_0 = report.missing_level_0.len();
            } else {
                stats.generated_level_0 = self.fill_leaves(&report.missing_level_0).await?;
            }
        }

        // Phase 4: extend the hierarchy from the current orphans.
        stats.levels_extended = self.extend_hierarchy(dry_run).await?;

        Ok(stats)
    }

    /// Regenerates nodes through the shared worker pool. Level-0 nodes use
    /// the leaf prompt against their chunk; higher levels use the
    /// synthesis prompt against their children.
    async fn regenerate(&self, items: &[(i64, String)]) -> Result<(usize, usize), StorageError> {
        let mut jobs: Vec<(i64, String)> = Vec::new();
        let mut failed = 0_usize;

        for (id, _) in items {
            match self.store.summary_with_context(*id)? {
                Some(ctx) if ctx.level == 0 => match ctx.chunk_text {
                    Some(chunk_text) => jobs.push((*id, build_leaf_prompt(&chunk_text))),
                    None => failed += 1,
                },
                Some(ctx) if !ctx.child_texts.is_empty() => {
                    jobs.push((*id, build_synthesis_prompt(&ctx.child_texts)));
                }
                _ => failed += 1,
            }
        }

        info!(count = jobs.len(), "regenerating summaries");
        let summaries = join_all(jobs.iter().map(|(_, prompt)| self.service.summarize(prompt))).await;

        let mut regenerated = 0_usize;
        for ((id, _), new_text) in jobs.iter().zip(summaries) {
            if new_text.is_empty() || is_failed_summary(&new_text) {
                warn!(node = id, "failed to regenerate summary");
                failed += 1;
            } else {
                self.store.update_summary_text(*id, &new_text)?;
                regenerated += 1;
                info!(node = id, "regenerated summary");
            }
        }

        Ok((regenerated, failed))
    }

    /// Creates a level-0 node for every uncovered chunk, with a sequence
    /// index equal to the chunk's document-order ordinal so the level-0
    /// sibling ordering keeps reproducing source order.
    async fn fill_leaves(&self, missing: &[(i64, String)]) -> Result<usize, StorageError> {
        info!(count = missing.len(), "filling missing level-0 summaries");
        let prompts: Vec<String> = missing
            .iter()
            .map(|(_, text)| build_leaf_prompt(text))
            .collect();
        let summaries = join_all(prompts.iter().map(|p| self.service.summarize(p))).await;

        let mut generated = 0_usize;
        for ((chunk_id, _), summary) in missing.iter().zip(summaries) {
            let sequence_index = self.store.chunk_ordinal(*chunk_id)?;
            let node_id = self.store.add_summary(&summary, 0, None, sequence_index)?;
            self.store.link_summary_to_chunk(node_id, *chunk_id)?;
            generated += 1;
        }
        Ok(generated)
    }

    /// Repeats the ingester's level-building from the current orphans
    /// until one root remains or the depth cap is hit.
    async fn extend_hierarchy(&self, dry_run: bool) -> Result<usize, StorageError> {
        if dry_run {
            let mut width = self.store.orphan_summaries()?.len();
            let mut level = self.current_height()?;
            let mut extended = 0_usize;
            while width > 1 && level < self.params.max_depth {
                width = width.div_ceil(self.params.group_size);
                level += 1;
                extended += 1;
            }
            return Ok(extended);
        }

        let mut extended = 0_usize;
        loop {
            let orphans = self.store.orphan_summaries()?;
            let level = self.current_height()?;
            if orphans.len() <= 1 || level >= self.params.max_depth {
                break;
            }
            info!(
                orphans = orphans.len(),
                level = level + 1,
                "extending hierarchy"
            );

            let batches: Vec<Vec<i64>> = orphans
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

            let new_level = i64::try_from(level).unwrap_or(i64::MAX - 1) + 1;
            for (batch_index, summary) in summaries.iter().enumerate() {
                let parent_id =
                    self.store
                        .add_summary(summary, new_level, None, batch_index as i64)?;
                for &child_id in &batches[batch_index] {
                    self.store.update_summary_parent(child_id, parent_id)?;
                }
            }
            extended += 1;
        }
        Ok(extended)
    }

    /// Current tree height above the leaves (0 when only leaves exist).
    fn current_height(&self) -> Result<usize, StorageError> {
        Ok(self
            .store
            .max_level()?
            .and_then(|l| usize::try_from(l).ok())
            .unwrap_or(0))
    }
}

impl std::fmt::Debug for Repairer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repairer")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use crate::summarize::FAILED_SUMMARY;
    use crate::summarize::service::testing::{echo_service, mock_service};

    fn setup_store() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store.init().unwrap();
        store
    }

    /// Adds a chunk + linked leaf with the given summary text.
    fn add_leaf(store: &SqliteStore, ordinal: i64, summary: &str) -> (i64, i64) {
        let offset = usize::try_from(ordinal).unwrap() * 10;
        let chunk = store
            .add_chunk(&format!("chunk body {ordinal}"), offset, offset + 10, "doc")
            .unwrap();
        let leaf = store.add_summary(summary, 0, None, ordinal).unwrap();
        store.link_summary_to_chunk(leaf, chunk).unwrap();
        (chunk, leaf)
    }

    #[tokio::test]
    async fn test_code_fence_is_cleaned_not_regenerated() {
        let store = setup_store();
        let (_, leaf) = add_leaf(&store, 0, "```markdown\nA fenced summary\n```");
        let service = mock_service(vec![]);
        let repairer = Repairer::new(&store, &service, RepairParams::default());

        let stats = repairer.repair(false).await.unwrap();
        assert_eq!(stats.cleaned, 1);
        assert_eq!(stats.regenerated, 0);

        let text = store.summary_text(leaf).unwrap().unwrap();
        assert!(!text.starts_with("```"));
        assert_eq!(text, "A fenced summary");
    }

    #[tokio::test]
    async fn test_think_block_is_cleaned() {
        let store = setup_store();
        let (_, leaf) = add_leaf(&store, 0, "<think>hmm</think>Real content");
        let service = mock_service(vec![]);
        let repairer = Repairer::new(&store, &service, RepairParams::default());

        let stats = repairer.repair(false).await.unwrap();
        assert_eq!(stats.cleaned, 1);
        assert_eq!(store.summary_text(leaf).unwrap().unwrap(), "Real content");
    }

    #[tokio::test]
    async fn test_provider_errors_regenerated() {
        let store = setup_store();
        let mut leaves = Vec::new();
        for i in 0..3 {
            let (_, leaf) = add_leaf(&store, i, "Provider returned error");
            leaves.push(leaf);
        }
        let service = mock_service(vec![
            Ok("First regenerated.".to_string()),
            Ok("Second regenerated.".to_string()),
            Ok("Third regenerated.".to_string()),
        ]);
        let repairer = Repairer::new(&store, &service, RepairParams::default());

        let stats = repairer.repair(false).await.unwrap();
        assert_eq!(stats.regenerated, 3);
        assert_eq!(stats.failed, 0);

        for leaf in leaves {
            let text = store.summary_text(leaf).unwrap().unwrap();
            assert!(!text.contains("Provider returned error"), "still broken: {text}");
        }
    }

    #[tokio::test]
    async fn test_regeneration_uses_synthesis_prompt_for_internal_nodes() {
        let store = setup_store();
        let (_, leaf) = add_leaf(&store, 0, "healthy leaf summary");
        let parent = store
            .add_summary("Provider returned error", 1, None, 0)
            .unwrap();
        store.update_summary_parent(leaf, parent).unwrap();

        let (service, requests) =
            crate::summarize::service::testing::capturing_service(vec![Ok(
                "Synthesized parent.".to_string(),
            )]);
        let repairer = Repairer::new(&store, &service, RepairParams::default());
        let stats = repairer.repair(false).await.unwrap();
        assert_eq!(stats.regenerated, 1);

        let user = requests.lock().unwrap()[0].messages[1].content.clone();
        assert!(user.starts_with("Synthesize the following summaries"));
        assert!(user.contains("healthy leaf summary"));
    }

    #[tokio::test]
    async fn test_fill_missing_leaf_restores_document_order() {
        let store = setup_store();
        // 12 chunks; leaves exist for all but ordinal 7.
        for i in 0..12_i64 {
            if i == 7 {
                let offset = usize::try_from(i).unwrap() * 10;
                store
                    .add_chunk(&format!("chunk body {i}"), offset, offset + 10, "doc")
                    .unwrap();
            } else {
                add_leaf(&store, i, &format!("leaf {i}"));
            }
        }

        let service = echo_service(4);
        let repairer = Repairer::new(
            &store,
            &service,
            RepairParams {
                group_size: 5,
                max_depth: 0,
            },
        );
        let stats = repairer.repair(false).await.unwrap();
        assert_eq!(stats.generated_level_0, 1);

        // Coverage restored.
        assert!(store.chunks_without_summary().unwrap().is_empty());
        // The new node slots into position 7 of the level-0 ordering.
        let roots = store.roots().unwrap();
        assert_eq!(roots.len(), 12);
        let missing_chunk_ordinals: Vec<i64> = roots
            .iter()
            .map(|(id, _)| store.chunk_ordinal(store.chunk_id_of(*id).unwrap().unwrap()).unwrap())
            .collect();
        assert_eq!(missing_chunk_ordinals, (0..12).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_crash_after_phase_a_resumes_to_full_tree() {
        let store = setup_store();
        // Scenario: ingestion wrote 12 chunks, then died before Phase B.
        for i in 0..12_usize {
            store
                .add_chunk(&format!("chunk body {i}"), i * 10, i * 10 + 10, "doc")
                .unwrap();
        }

        let service = echo_service(4);
        let repairer = Repairer::new(
            &store,
            &service,
            RepairParams {
                group_size: 5,
                max_depth: 1,
            },
        );
        let stats = repairer.repair(false).await.unwrap();
        assert_eq!(stats.generated_level_0, 12);
        assert_eq!(stats.levels_extended, 1);

        // Same shape a clean ingest would have produced.
        let roots = store.roots().unwrap();
        assert_eq!(roots.len(), 3);
        let widths: Vec<usize> = roots
            .iter()
            .map(|(id, _)| store.children(*id).unwrap().len())
            .collect();
        assert_eq!(widths, vec![5, 5, 2]);
        assert!(store.chunks_without_summary().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_repair_on_fresh_ingest_is_noop() {
        let store = setup_store();
        let service = echo_service(4);
        let meter = CharMeter;
        let ingester = crate::ingest::Ingester::new(
            &store,
            &service,
            &meter,
            crate::ingest::IngestParams {
                max_chunk_tokens: 4,
                group_size: 5,
                max_depth: 1,
                strategy: crate::chunking::Strategy::Fixed,
            },
        )
        .unwrap();
        let text: String = (0..12)
            .map(|i| char::from(b'a' + u8::try_from(i).unwrap()).to_string().repeat(4))
            .collect();
        ingester.ingest_text(&text, "doc").await.unwrap();

        let repairer = Repairer::new(&store, &service, RepairParams::default());
        let stats = repairer.repair(false).await.unwrap();
        assert_eq!(stats, RepairStats::default());
        assert!(repairer.validate().unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_second_repair_pass_changes_nothing() {
        let store = setup_store();
        add_leaf(&store, 0, "```\nfenced\n```");
        add_leaf(&store, 1, "Provider returned error");
        // And one bare chunk.
        store.add_chunk("bare chunk", 100, 110, "doc").unwrap();

        let service = echo_service(4);
        let repairer = Repairer::new(&store, &service, RepairParams::default());

        let first = repairer.repair(false).await.unwrap();
        assert!(first.cleaned > 0 || first.regenerated > 0 || first.generated_level_0 > 0);

        let second = repairer.repair(false).await.unwrap();
        assert_eq!(second, RepairStats::default());
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_mutating() {
        let store = setup_store();
        let (_, fenced) = add_leaf(&store, 0, "```\nfenced\n```");
        add_leaf(&store, 1, "Provider returned error");
        store.add_chunk("bare chunk", 100, 110, "doc").unwrap();

        let service = mock_service(vec![]);
        let repairer = Repairer::new(&store, &service, RepairParams::default());

        let stats = repairer.repair(true).await.unwrap();
        assert_eq!(stats.cleaned, 1);
        assert_eq!(stats.regenerated, 1);
        assert_eq!(stats.generated_level_0, 1);

        // Nothing changed.
        assert!(store.summary_text(fenced).unwrap().unwrap().starts_with("```"));
        assert_eq!(store.chunks_without_summary().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_regeneration_counts_as_failed() {
        let store = setup_store();
        add_leaf(&store, 0, "Provider returned error");
        // Every attempt fails; the sentinel stays.
        let service = mock_service(vec![
            Err("down".to_string()),
            Err("down".to_string()),
            Err("down".to_string()),
        ]);
        let repairer = Repairer::new(&store, &service, RepairParams::default());
        let stats = repairer.repair(false).await.unwrap();
        assert_eq!(stats.regenerated, 0);
        assert_eq!(stats.failed, 1);

        // The validator still sees it next pass (no silent loss).
        let report = repairer.validate().unwrap();
        assert_eq!(report.provider_error.len(), 1);
    }

    #[tokio::test]
    async fn test_validation_reports_orphans_and_level() {
        let store = setup_store();
        add_leaf(&store, 0, "one");
        add_leaf(&store, 1, "two");
        let service = mock_service(vec![]);
        let repairer = Repairer::new(&store, &service, RepairParams::default());

        let report = repairer.validate().unwrap();
        assert_eq!(report.orphan_summary_ids.len(), 2);
        assert_eq!(report.current_max_level, Some(0));
        assert!(report.is_clean());
    }

    #[test]
    fn test_failed_summary_sentinel_detected() {
        assert!(is_failed_summary(FAILED_SUMMARY));
    }

    struct CharMeter;

    impl crate::tokens::TokenMeter for CharMeter {
        fn count(&self, text: &str) -> usize {
            text.chars().count()
        }
    }
}
