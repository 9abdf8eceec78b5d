//! LLM-chosen semantic boundary chunking.
//!
//! Each step offers the model a token-capped window and asks for two
//! indices into it: where the chunk should end and where the next chunk
//! should start. Violations are clamped and counted; on a model or parse
//! failure the step falls back to fixed-window behaviour, so a valid chunk
//! is emitted either way and the pass always terminates.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    CHARS_PER_TOKEN_ESTIMATE, ChunkPiece, Chunker, DEFAULT_OVERLAP_CHARS, floor_char_boundary,
};
use crate::error::IngestError;
use crate::summarize::{SummarizationService, strip_think_blocks};
use crate::tokens::TokenMeter;

/// Maximum characters of the window shown in the boundary prompt.
const MAX_PROMPT_CHARS: usize = 2000;

/// System prompt for the boundary model.
const BOUNDARY_SYSTEM_PROMPT: &str =
    "You segment documents at natural topic boundaries. Reply with strict JSON only, \
     no prose and no code fences.";

#[allow(clippy::expect_used)]
static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^{}]*\}").expect("static pattern compiles"));

/// The model's answer: char indices into the analyzed window.
#[derive(Debug, Clone, Copy, Deserialize)]
struct CutPoint {
    cut_index: i64,
    next_chunk_start_index: i64,
}

/// Chunker that asks the model where to cut.
pub struct BoundaryChunker<'a> {
    text: &'a str,
    meter: &'a dyn TokenMeter,
    max_tokens: usize,
    service: &'a SummarizationService,
    cursor: usize,
    clamp_events: u64,
}

impl<'a> BoundaryChunker<'a> {
    /// Creates the chunker.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::InvalidParameter`] when `max_tokens` is zero.
    pub fn new(
        text: &'a str,
        meter: &'a dyn TokenMeter,
        max_tokens: usize,
        service: &'a SummarizationService,
    ) -> Result<Self, IngestError> {
        if max_tokens == 0 {
            return Err(IngestError::InvalidParameter {
                message: "max_chunk_tokens must be at least 1".to_string(),
            });
        }
        Ok(Self {
            text,
            meter,
            max_tokens,
            service,
            cursor: 0,
            clamp_events: 0,
        })
    }

    /// How many times a model answer had to be clamped. A high rate
    /// suggests the window prompt and the model disagree about indexing.
    #[must_use]
    pub const fn clamp_events(&self) -> u64 {
        self.clamp_events
    }

    fn build_prompt(window: &str) -> String {
        // Show the tail, where the stopping point lives.
        let display_start =
            floor_char_boundary(window, window.len().saturating_sub(MAX_PROMPT_CHARS));
        let display_text = &window[display_start..];
        format!(
            "Analyze this text segment.\n\
             1. Identify the best semantic stopping point (end of a topic/paragraph) \
             near the end.\n\
             2. Identify where the next chunk should start to maintain context (overlap).\n\
             Text length: {} chars.\n\n\
             Text:\n{display_text}\n\n\
             Return JSON: {{ \"cut_index\": <int>, \"next_chunk_start_index\": <int> }}",
            window.chars().count()
        )
    }

    /// Extracts the cut-point JSON from a model reply.
    fn parse_cut(content: &str) -> Option<CutPoint> {
        let content = strip_think_blocks(content);
        let mut candidate = content.trim();

        if let Some(rest) = candidate.split("```json").nth(1) {
            candidate = rest.split("```").next().unwrap_or(rest).trim();
        } else if candidate.contains("```") {
            if let Some(inner) = candidate.split("```").nth(1) {
                candidate = inner.trim();
            }
        }

        if let Ok(cut) = serde_json::from_str::<CutPoint>(candidate) {
            return Some(cut);
        }

        // Last resort: first {...} object anywhere in the reply.
        JSON_OBJECT
            .find(candidate)
            .and_then(|m| serde_json::from_str::<CutPoint>(m.as_str()).ok())
    }

    /// Asks the model for a cut point; errors propagate to the fallback.
    async fn find_cut(&self, window: &str) -> Option<CutPoint> {
        let prompt = Self::build_prompt(window);
        match self.service.complete_raw(BOUNDARY_SYSTEM_PROMPT, &prompt).await {
            Ok(reply) => {
                let parsed = Self::parse_cut(&reply);
                if parsed.is_none() {
                    warn!("boundary model reply was not parseable JSON");
                }
                parsed
            }
            Err(e) => {
                warn!(error = %e, "boundary model call failed");
                None
            }
        }
    }

    /// Clamps the model's answer into a valid `(cut, next_start)` pair of
    /// char indices, `1 <= cut <= window_chars`, `1 <= next_start <= cut`.
    fn clamp_cut(&mut self, cut: CutPoint, window_chars: usize) -> (usize, usize) {
        let mut clamped = false;

        let cut_chars = match usize::try_from(cut.cut_index) {
            Ok(n) if (1..=window_chars).contains(&n) => n,
            _ => {
                clamped = true;
                window_chars
            }
        };

        let next_chars = match usize::try_from(cut.next_chunk_start_index) {
            Ok(n) if n < cut_chars => n,
            _ => {
                clamped = true;
                cut_chars.saturating_sub(DEFAULT_OVERLAP_CHARS)
            }
        };
        // Progress: the next window must start past the current one.
        let next_chars = next_chars.clamp(1, cut_chars);

        if clamped {
            self.clamp_events += 1;
            warn!(
                cut_index = cut.cut_index,
                next_chunk_start_index = cut.next_chunk_start_index,
                window_chars,
                "boundary answer out of range, clamped"
            );
        }

        (cut_chars, next_chars)
    }
}

#[async_trait]
impl Chunker for BoundaryChunker<'_> {
    async fn next_piece(&mut self) -> Option<ChunkPiece> {
        if self.cursor >= self.text.len() {
            return None;
        }

        let window_cap = self
            .cursor
            .saturating_add(self.max_tokens.saturating_mul(CHARS_PER_TOKEN_ESTIMATE));
        let window_end = floor_char_boundary(self.text, window_cap.min(self.text.len()));
        let raw_window = &self.text[self.cursor..window_end];

        // Trim to the strict token cap before offering it to the model.
        let fitted = self.meter.truncate_to(raw_window, self.max_tokens);
        let window: &str = if fitted.is_empty() {
            // One oversized char; emit it as its own chunk.
            let first = raw_window.chars().next().map_or(0, char::len_utf8);
            &raw_window[..first]
        } else {
            &raw_window[..fitted.len()]
        };
        let window_chars = window.chars().count();
        if window_chars == 0 {
            self.cursor = self.text.len();
            return None;
        }

        let (cut_chars, next_chars) = match self.find_cut(window).await {
            Some(cut) => self.clamp_cut(cut, window_chars),
            // Fixed-window behaviour for this step.
            None => (
                window_chars,
                window_chars
                    .saturating_sub(DEFAULT_OVERLAP_CHARS)
                    .clamp(1, window_chars),
            ),
        };

        let cut_bytes = byte_index_of_char(window, cut_chars);
        let next_bytes = byte_index_of_char(window, next_chars);

        let end = self.cursor + cut_bytes;
        let piece = ChunkPiece {
            text: self.text[self.cursor..end].to_string(),
            start: self.cursor,
            end,
        };
        debug!(start = piece.start, end = piece.end, "boundary chunk emitted");

        if end >= self.text.len() {
            self.cursor = self.text.len();
        } else {
            self.cursor += next_bytes.max(1);
        }

        Some(piece)
    }
}

impl std::fmt::Debug for BoundaryChunker<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundaryChunker")
            .field("max_tokens", &self.max_tokens)
            .field("cursor", &self.cursor)
            .field("clamp_events", &self.clamp_events)
            .finish_non_exhaustive()
    }
}

/// Byte offset of the `char_idx`-th char, or the string length past the
/// end.
fn byte_index_of_char(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map_or(s.len(), |(i, _)| i)
}
