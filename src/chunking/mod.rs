//! Document chunking strategies.
//!
//! Both strategies share one contract: a lazy, finite, single-pass sequence
//! of `(text, start, end)` pieces that cover the document from offset 0 to
//! its end, with every piece inside the token cap. Offsets are byte offsets
//! into the source text and always fall on char boundaries.

mod fixed;
mod llm;

pub use fixed::FixedWindowChunker;
pub use llm::BoundaryChunker;

use std::str::FromStr;

use async_trait::async_trait;

use crate::error::IngestError;
use crate::summarize::SummarizationService;
use crate::tokens::TokenMeter;

/// Character window per token when sizing the raw window handed to the
/// meter. English averages ~4; 6 leaves slack so the window always covers
/// the full token budget.
pub const CHARS_PER_TOKEN_ESTIMATE: usize = 6;

/// Default overlap ratio for the fixed-window strategy.
pub const DEFAULT_OVERLAP_RATIO: f32 = 0.1;

/// Overlap (in chars) used when the boundary model gives no usable
/// next-start.
pub const DEFAULT_OVERLAP_CHARS: usize = 50;

/// One produced chunk: a contiguous slice of the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    /// The chunk text, identical to `source[start..end]`.
    pub text: String,
    /// Byte offset of the chunk start in the source.
    pub start: usize,
    /// Byte offset one past the chunk end.
    pub end: usize,
}

/// Chunking strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Fixed token windows with proportional overlap.
    Fixed,
    /// Model-chosen semantic boundaries.
    Llm,
}

impl Strategy {
    /// The CLI name of this strategy.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Llm => "llm",
        }
    }
}

impl FromStr for Strategy {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(Self::Fixed),
            "llm" => Ok(Self::Llm),
            other => Err(IngestError::UnknownStrategy {
                name: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pull-based chunk producer.
///
/// `next_piece` is async because the LLM-boundary strategy consults a model
/// per step; the fixed strategy resolves immediately. Implementations must
/// terminate on any input and never produce a zero-length piece.
#[async_trait]
pub trait Chunker: Send {
    /// Produces the next chunk, or `None` when the document is exhausted.
    async fn next_piece(&mut self) -> Option<ChunkPiece>;
}

/// Builds the chunker for a strategy.
///
/// # Errors
///
/// Returns [`IngestError::InvalidParameter`] for a zero token budget.
pub fn create_chunker<'a>(
    strategy: Strategy,
    text: &'a str,
    max_tokens: usize,
    meter: &'a dyn TokenMeter,
    service: &'a SummarizationService,
) -> Result<Box<dyn Chunker + 'a>, IngestError> {
    match strategy {
        Strategy::Fixed => Ok(Box::new(FixedWindowChunker::new(
            text,
            meter,
            max_tokens,
            DEFAULT_OVERLAP_RATIO,
        )?)),
        Strategy::Llm => Ok(Box::new(BoundaryChunker::new(
            text, meter, max_tokens, service,
        )?)),
    }
}

/// Largest char boundary at or below `index`.
pub(crate) fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}
