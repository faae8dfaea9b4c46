//! Small, deterministic string helpers.

use std::sync::LazyLock;

use regex::Regex;

static NON_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("static slug regex"));

/// Lowercase `text`, collapse every non-alphanumeric run into `-`, and bound
/// the result to `max_len` characters. Returns `fallback` if nothing is left.
pub fn slugify(text: &str, max_len: usize, fallback: &str) -> String {
    let lowered = text.to_lowercase();
    let collapsed = NON_SLUG.replace_all(&lowered, "-");
    let trimmed = collapsed.trim_matches('-');
    let bounded: String = trimmed.chars().take(max_len).collect();
    let bounded = bounded.trim_end_matches('-');
    if bounded.is_empty() {
        fallback.to_string()
    } else {
        bounded.to_string()
    }
}

/// Return at most `max_chars` characters of `text`, never splitting a char.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Keep the head and tail of `text` when it exceeds `max_chars`.
pub fn truncate_middle(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let half = max_chars / 2;
    let head: String = text.chars().take(half).collect();
    let tail: String = text.chars().skip(total - half).collect();
    format!("{head}\n...[truncated]...\n{tail}")
}

/// Last non-blank line, trimmed.
pub fn last_non_empty_line<S: AsRef<str>>(lines: &[S]) -> Option<&str> {
    lines
        .iter()
        .rev()
        .map(|line| line.as_ref().trim())
        .find(|line| !line.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_edge_cases() {
        assert_eq!(slugify("  Hello, World!  ", 30, "session"), "hello-world");
        assert_eq!(slugify("___", 30, "session"), "session");
        assert_eq!(slugify(&"A".repeat(40), 30, "session"), "a".repeat(30));
        assert_eq!(slugify("Fix flaky test", 30, "session"), "fix-flaky-test");
    }

    #[test]
    fn slugify_does_not_end_with_dash_after_cut() {
        assert_eq!(slugify("abcd efgh", 5, "x"), "abcd");
    }

    #[test]
    fn truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn truncate_middle_keeps_head_and_tail() {
        let text = format!("{}{}", "a".repeat(10), "b".repeat(10));
        let out = truncate_middle(&text, 10);
        assert!(out.starts_with("aaaaa\n"));
        assert!(out.ends_with("\nbbbbb"));
        assert_eq!(truncate_middle("short", 10), "short");
    }

    #[test]
    fn last_non_empty_line_skips_blanks() {
        let lines = vec!["first".to_string(), "  last  ".to_string(), "   ".to_string()];
        assert_eq!(last_non_empty_line(&lines), Some("last"));
        let empty: Vec<String> = Vec::new();
        assert_eq!(last_non_empty_line(&empty), None);
    }
}
