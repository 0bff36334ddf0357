//! Post-processing: deterministic cleanup of model output before assembly.
//!
//! Even with a strict prompt the model occasionally wraps its answer in a
//! code fence, uses bare CR line endings, or emits zero-width characters
//! copied from the source. These passes remove that noise without touching
//! content, so the line classifier in [`crate::pipeline::assemble`] sees clean
//! lines. Trimming and blank-line handling belong to the classifier.
//!
//! ## Rule Order
//!
//! Line endings and invisible characters are handled before fence detection,
//! so a fence line hidden behind a BOM or a CR is still recognised.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to raw model text.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF / CR → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Drop code-fence lines, matched or not (a reply cut off at the token
///    limit leaves only the opening fence)
pub fn clean_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    drop_fence_lines(&s)
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ──────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Drop code-fence lines ────────────────────────────────────────────

static RE_FENCE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:`{3,}|~{3,})[A-Za-z0-9_+.-]*[ \t]*(?:\n|$)")
        .expect("valid fence regex")
});

fn drop_fence_lines(input: &str) -> String {
    RE_FENCE_LINE.replace_all(input, "").into_owned()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_matched_fence() {
        assert_eq!(drop_fence_lines("```markdown\n# Hello\nWorld\n```"), "# Hello\nWorld\n");
        assert_eq!(drop_fence_lines("```\n# Hello\nWorld\n```\n"), "# Hello\nWorld\n");
    }

    #[test]
    fn test_strip_unclosed_fence() {
        assert_eq!(drop_fence_lines("```markdown\n# Vitals\nBP 120/80"), "# Vitals\nBP 120/80");
    }

    #[test]
    fn test_strip_fence_before_trailing_text() {
        assert_eq!(
            drop_fence_lines("```\n# Plan\nRest\n```\nLet me know if you need more."),
            "# Plan\nRest\nLet me know if you need more."
        );
    }

    #[test]
    fn test_inline_backticks_are_kept() {
        assert_eq!(drop_fence_lines("dose ```x``` daily"), "dose ```x``` daily");
        assert_eq!(drop_fence_lines("~~ not a fence"), "~~ not a fence");
    }

    #[test]
    fn test_no_fence_passthrough() {
        assert_eq!(clean_text("# Hello\nWorld"), "# Hello\nWorld");
    }

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_remove_invisible() {
        let input = "hello\u{200B}world\u{FEFF}foo\u{00AD}bar";
        assert_eq!(remove_invisible_chars(input), "helloworldfoobar");
    }

    #[test]
    fn test_clean_text_full_pipeline() {
        let input = "\u{FEFF}```\r\n# Diagnosis\r\n\u{200B}Fever\rPlan\r\n```";
        assert_eq!(clean_text(input), "# Diagnosis\nFever\nPlan\n");
    }

    #[test]
    fn test_clean_text_is_idempotent() {
        let once = clean_text("```md\nA\r\n\nB\n```\ntail");
        assert_eq!(clean_text(&once), once);
    }
}
