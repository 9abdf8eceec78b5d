//! Shared summarization machinery.
//!
//! The ingester, repairer, boundary chunker, and navigator all drive LLM
//! calls through one [`SummarizationService`], which composes the three
//! pieces defined here: a bounded [`CredentialPool`], a round-robin
//! [`ModelRotator`], and the summary [`sanitizer`](clean_summary_text).

pub mod pool;
pub mod rotator;
pub mod sanitize;
pub mod service;

pub use pool::{CredentialPool, CredentialSlot};
pub use rotator::ModelRotator;
pub use sanitize::{
    FAILED_SUMMARY, clean_summary_text, contains_provider_failure, is_failed_summary,
    strip_think_blocks,
};
pub use service::{ServiceOptions, SummarizationService};

/// Builds the leaf summarization prompt for one chunk.
#[must_use]
pub fn build_leaf_prompt(chunk_text: &str) -> String {
    format!(
        "Summarize the following document segment. \
         Identify key topics, entities, and events:\n\n{chunk_text}"
    )
}

/// Builds the synthesis prompt from child summary texts.
///
/// Empty child texts are skipped, matching the leaf writer's behaviour of
/// never persisting empty summaries.
#[must_use]
pub fn build_synthesis_prompt(child_texts: &[String]) -> String {
    let combined = child_texts
        .iter()
        .filter(|t| !t.is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Synthesize the following summaries into a cohesive \
         higher-level summary:\n\n{combined}"
    )
}
