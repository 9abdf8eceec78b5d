//! Fixed-window chunking with proportional overlap.
//!
//! Cuts each chunk to the token cap via the meter, then advances by the
//! chunk length minus the overlap. Start offsets are strictly increasing
//! and the last chunk always ends at the document end.

use async_trait::async_trait;

use super::{CHARS_PER_TOKEN_ESTIMATE, ChunkPiece, Chunker, floor_char_boundary};
use crate::error::IngestError;
use crate::tokens::TokenMeter;

/// Chunker producing token-capped windows with a constant overlap ratio.
pub struct FixedWindowChunker<'a> {
    text: &'a str,
    meter: &'a dyn TokenMeter,
    max_tokens: usize,
    overlap_ratio: f32,
    cursor: usize,
}

impl<'a> FixedWindowChunker<'a> {
    /// Creates the chunker.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::InvalidParameter`] when `max_tokens` is zero
    /// or `overlap_ratio` is outside `[0, 1)`.
    pub fn new(
        text: &'a str,
        meter: &'a dyn TokenMeter,
        max_tokens: usize,
        overlap_ratio: f32,
    ) -> Result<Self, IngestError> {
        if max_tokens == 0 {
            return Err(IngestError::InvalidParameter {
                message: "max_chunk_tokens must be at least 1".to_string(),
            });
        }
        if !(0.0..1.0).contains(&overlap_ratio) {
            return Err(IngestError::InvalidParameter {
                message: format!("overlap_ratio must be in [0, 1), got {overlap_ratio}"),
            });
        }
        Ok(Self {
            text,
            meter,
            max_tokens,
            overlap_ratio,
            cursor: 0,
        })
    }

    /// Produces the next piece synchronously.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn step(&mut self) -> Option<ChunkPiece> {
        if self.cursor >= self.text.len() {
            return None;
        }

        // A char window generously larger than the token budget, trimmed to
        // the exact cap by the meter.
        let window_cap = self
            .cursor
            .saturating_add(self.max_tokens.saturating_mul(CHARS_PER_TOKEN_ESTIMATE));
        let window_end = floor_char_boundary(self.text, window_cap.min(self.text.len()));
        let window = &self.text[self.cursor..window_end];

        let fitted = self.meter.truncate_to(window, self.max_tokens);
        let mut piece_len = fitted.len();
        if piece_len == 0 {
            // A single char over budget; emit it anyway so the pass
            // always makes progress.
            piece_len = window.chars().next().map_or(0, char::len_utf8);
            if piece_len == 0 {
                self.cursor = self.text.len();
                return None;
            }
        }

        let end = self.cursor + piece_len;
        let piece = ChunkPiece {
            text: self.text[self.cursor..end].to_string(),
            start: self.cursor,
            end,
        };

        if end >= self.text.len() {
            self.cursor = self.text.len();
        } else {
            let overlap = (piece_len as f32 * self.overlap_ratio) as usize;
            let mut next = floor_char_boundary(self.text, end - overlap);
            if next <= self.cursor {
                next = end;
            }
            self.cursor = next;
        }

        Some(piece)
    }
}

#[async_trait]
impl Chunker for FixedWindowChunker<'_> {
    async fn next_piece(&mut self) -> Option<ChunkPiece> {
        self.step()
    }
}

impl std::fmt::Debug for FixedWindowChunker<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowChunker")
            .field("max_tokens", &self.max_tokens)
            .field("overlap_ratio", &self.overlap_ratio)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}
