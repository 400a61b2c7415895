// src/checks.rs

//! Output comparison and display helpers.
//!
//! This module is responsible for:
//! - Deciding whether a program's output matches the expected output
//! - Bounding diagnostic text before it is shown to a user
//!
//! Comparison trims leading and trailing whitespace on both sides and nothing
//! else: internal whitespace, line breaks between tokens and letter case are
//! all significant.

/// Maximum bytes of stdout / stderr / messages surfaced for display.
pub const DISPLAY_LIMIT_BYTES: usize = 8 * 1024;

/// Trim-only equality between expected and produced output.
pub fn outputs_match(expected: &str, produced: &str) -> bool {
    expected.trim() == produced.trim()
}

/// Truncate `text` to at most `limit` bytes on a char boundary, marking the
/// cut so a reader knows output was omitted.
pub fn truncate_for_display(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }

    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }

    format!(
        "{}\n... [truncated {} bytes]",
        &text[..end],
        text.len() - end
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_newline_is_ignored() {
        assert!(outputs_match("5\n", "5"));
        assert!(outputs_match("  5", "5\r\n"));
    }

    #[test]
    fn internal_whitespace_is_significant() {
        assert!(!outputs_match("5 6", "5  6"));
        assert!(!outputs_match("5\n6", "5 6"));
    }

    #[test]
    fn empty_matches_whitespace_only() {
        assert!(outputs_match("", "\n\n  \t"));
    }

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_for_display("abc", 10), "abc");
    }

    #[test]
    fn long_text_is_cut_on_char_boundary() {
        let text = "é".repeat(10); // 20 bytes
        let out = truncate_for_display(&text, 5);
        assert!(out.starts_with("éé\n"));
        assert!(out.ends_with("[truncated 16 bytes]"));
    }
}
