//! Summary text sanitizer and sentinel failure detection.
//!
//! Every summary passes through [`clean_summary_text`] before persistence:
//! model thinking blocks, code-fence wrappers, and stray heading marks are
//! stripped. Sentinel detection recognises provider failures that arrive as
//! ordinary-looking reply text.

use std::sync::LazyLock;

use regex::Regex;

/// Sentinel stored when every retry attempt failed.
pub const FAILED_SUMMARY: &str = "Error generating summary.";

/// Reply substrings that mean the provider failed even though the HTTP
/// call succeeded.
const PROVIDER_FAILURE_MARKERS: [&str; 2] = ["Provider returned error", "No endpoints found"];

#[allow(clippy::expect_used)]
static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think>.*?</think>").expect("static pattern compiles"));

/// Returns `true` if the reply carries a provider failure sentinel.
#[must_use]
pub fn contains_provider_failure(text: &str) -> bool {
    PROVIDER_FAILURE_MARKERS
        .iter()
        .any(|marker| text.contains(marker))
}

/// Returns `true` if the text is (or contains) any failure sentinel,
/// including the local [`FAILED_SUMMARY`] marker.
#[must_use]
pub fn is_failed_summary(text: &str) -> bool {
    text.contains(FAILED_SUMMARY) || contains_provider_failure(text)
}

/// Strips model `<think>…</think>` blocks (multi-line, case-insensitive).
#[must_use]
pub fn strip_think_blocks(text: &str) -> String {
    THINK_BLOCK.replace_all(text, "").into_owned()
}

/// Cleans one summary text: strips `<think>` blocks, leading/trailing code
/// fences, and stray heading marks, then trims whitespace.
///
/// Applying it twice is the same as applying it once; the repairer's
/// convergence depends on that.
#[must_use]
pub fn clean_summary_text(text: &str) -> String {
    let without_think = THINK_BLOCK.replace_all(text, "");
    let mut cleaned = without_think.trim().to_string();

    if cleaned.starts_with("```") {
        // Drop the fence line itself (possibly "```json" etc.).
        cleaned = cleaned
            .lines()
            .skip(1)
            .collect::<Vec<_>>()
            .join("\n");
    }
    cleaned = cleaned.trim_end().to_string();
    if cleaned.ends_with("```") {
        cleaned.truncate(cleaned.len() - 3);
    }

    cleaned.replace("###", "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_clean_passthrough() {
        assert_eq!(clean_summary_text("A plain summary."), "A plain summary.");
    }

    #[test]
    fn test_strips_think_block() {
        let input = "<think>\nlet me reason\n</think>\nThe treaty was signed in 1648.";
        assert_eq!(clean_summary_text(input), "The treaty was signed in 1648.");
    }

    #[test]
    fn test_strips_think_block_case_insensitive() {
        let input = "<THINK>reasoning</THINK>Actual content";
        assert_eq!(clean_summary_text(input), "Actual content");
    }

    #[test]
    fn test_strips_multiple_think_blocks() {
        let input = "<think>a</think>keep<think>b</think> this";
        assert_eq!(clean_summary_text(input), "keep this");
    }

    #[test_case("```json\n{\"topic\": \"war\"}\n```", "{\"topic\": \"war\"}"; "json fence")]
    #[test_case("```\nfenced summary\n```", "fenced summary"; "bare fence")]
    #[test_case("```markdown\ntext\n```", "text"; "markdown fence")]
    fn test_strips_code_fences(input: &str, expected: &str) {
        assert_eq!(clean_summary_text(input), expected);
    }

    #[test]
    fn test_strips_heading_marks() {
        assert_eq!(
            clean_summary_text("### Key points\nIt rained."),
            "Key points\nIt rained."
        );
    }

    #[test]
    fn test_trims_whitespace() {
        assert_eq!(clean_summary_text("  \n padded \n  "), "padded");
    }

    #[test]
    fn test_clean_is_idempotent() {
        let inputs = [
            "<think>x</think>```json\n### data\n```",
            "plain",
            "```\nfence only\n```",
            "  spaced  ",
        ];
        for input in inputs {
            let once = clean_summary_text(input);
            assert_eq!(clean_summary_text(&once), once, "not idempotent on {input:?}");
        }
    }

    #[test]
    fn test_provider_failure_detection() {
        assert!(contains_provider_failure("Provider returned error: 429"));
        assert!(contains_provider_failure("No endpoints found for model"));
        assert!(!contains_provider_failure("A fine summary about errors."));
    }

    #[test]
    fn test_is_failed_summary_includes_local_sentinel() {
        assert!(is_failed_summary(FAILED_SUMMARY));
        assert!(is_failed_summary("Provider returned error"));
        assert!(!is_failed_summary("Summarized content."));
    }
}
