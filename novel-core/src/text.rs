//! Small text helpers shared by the context budget and reconciliation code.
//!
//! Everything here measures text in chars (Unicode scalar values), never
//! bytes, so CJK manuscripts get the same budgets as Latin ones.

/// Derived word count: non-whitespace chars.
///
/// Serial fiction platforms count CJK text per character; counting
/// non-whitespace chars gives that number and stays stable for Latin text
/// edits that only touch spacing.
pub fn word_count(text: &str) -> u32 {
    text.chars().filter(|c| !c.is_whitespace()).count() as u32
}

/// Length in chars.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Keep at most `max_chars` chars. A cut text ends in an ellipsis that
/// counts toward the limit.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.char_indices().nth(max_chars).is_none() {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let keep = byte_offset(text, max_chars - 1);
    format!("{}…", &text[..keep])
}

/// Convert a char offset into a byte offset, clamped to the end of `text`.
pub fn byte_offset(text: &str, char_offset: usize) -> usize {
    text.char_indices()
        .nth(char_offset)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

/// Replace the char range `[start, end)` of `text` with `replacement`.
pub fn replace_char_range(text: &str, start: usize, end: usize, replacement: &str) -> String {
    let start_byte = byte_offset(text, start);
    let end_byte = byte_offset(text, end.max(start));
    let mut out = String::with_capacity(text.len() + replacement.len());
    out.push_str(&text[..start_byte]);
    out.push_str(replacement);
    out.push_str(&text[end_byte..]);
    out
}

/// Whether `needle` occurs in `haystack`. Empty needles never match, so an
/// untitled record cannot earn a mention bonus.
pub fn mentions(haystack: &str, needle: &str) -> bool {
    let needle = needle.trim();
    !needle.is_empty() && haystack.contains(needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_count_ignores_whitespace() {
        assert_eq!(word_count("ab c\n d"), 4);
        assert_eq!(word_count("林风 走进 了 雨里"), 7);
        assert_eq!(word_count(""), 0);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 5), "hello");
        assert_eq!(truncate_chars("hello world", 5), "hell…");
        assert_eq!(truncate_chars("雨夜长街", 2), "雨…");
        assert_eq!(truncate_chars("hello", 1), "…");
        assert_eq!(truncate_chars("hello", 0), "");
    }

    #[test]
    fn test_truncate_chars_never_exceeds_limit() {
        let text = "x".repeat(50);
        for max in 0..60 {
            assert!(char_len(&truncate_chars(&text, max)) <= max);
        }
    }

    #[test]
    fn test_replace_char_range_multibyte() {
        assert_eq!(replace_char_range("雨夜长街", 1, 3, "X"), "雨X街");
        assert_eq!(replace_char_range("abc", 3, 3, "d"), "abcd");
    }

    #[test]
    fn test_mentions() {
        assert!(mentions("Lin meets the Abbot", "Abbot"));
        assert!(!mentions("Lin meets the Abbot", ""));
        assert!(!mentions("Lin meets the Abbot", "   "));
        assert!(!mentions("Lin", "Lin Feng"));
    }
}
