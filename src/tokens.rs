//! Token counting and token-bounded truncation.
//!
//! The chunkers work in character windows but must respect a token budget,
//! so they need a mapping between the two. [`TokenMeter`] is the seam: the
//! production implementation wraps the cl100k_base BPE from `tiktoken-rs`,
//! and tests substitute cheap deterministic meters.

use std::borrow::Cow;

use tiktoken_rs::CoreBPE;

use crate::error::CommandError;

/// Maps text to token counts for a fixed tokenizer.
///
/// Implementations are stateless and safe to share across workers.
pub trait TokenMeter: Send + Sync {
    /// Counts the tokens in `text`. Empty input counts as zero.
    fn count(&self, text: &str) -> usize;

    /// Returns the longest prefix of `text` whose token count is at most
    /// `max_tokens`.
    ///
    /// If `text` already fits it is returned borrowed, byte-identical.
    /// The result always ends on a char boundary.
    fn truncate_to<'a>(&self, text: &'a str, max_tokens: usize) -> Cow<'a, str> {
        if self.count(text) <= max_tokens {
            return Cow::Borrowed(text);
        }
        if max_tokens == 0 {
            return Cow::Owned(String::new());
        }

        // Binary search over char boundaries for the longest fitting prefix.
        // Token counts are monotone in prefix length for BPE tokenizers.
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();

        let mut lo = 0usize; // boundaries[lo] always fits
        let mut hi = boundaries.len() - 1;
        while lo < hi {
            let mid = lo + (hi - lo).div_ceil(2);
            if self.count(&text[..boundaries[mid]]) <= max_tokens {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        Cow::Owned(text[..boundaries[lo]].to_string())
    }
}

/// Token meter backed by the `cl100k_base` BPE.
pub struct Cl100kMeter {
    bpe: CoreBPE,
}

impl Cl100kMeter {
    /// Builds the meter, loading the embedded cl100k vocabulary.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Tokenizer`] if the vocabulary fails to load.
    pub fn new() -> Result<Self, CommandError> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| CommandError::Tokenizer {
            message: e.to_string(),
        })?;
        Ok(Self { bpe })
    }
}

impl TokenMeter for Cl100kMeter {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_with_special_tokens(text).len()
    }
}

impl std::fmt::Debug for Cl100kMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cl100kMeter").finish_non_exhaustive()
    }
}
