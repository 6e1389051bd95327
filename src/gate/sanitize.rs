//! Input sanitizer.
//!
//! Normalizes raw user text before any matcher sees it:
//! - control and zero-width characters are dropped,
//! - whitespace runs (including newlines and tabs) collapse to one space,
//! - leading/trailing whitespace is trimmed,
//! - the result is truncated to `max_chars` characters (not bytes).
//!
//! The sanitizer never fails; empty input yields an empty string.

pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 2000;

#[derive(Debug, Clone, Copy)]
pub struct Sanitizer {
    max_chars: usize,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_LENGTH)
    }
}

impl Sanitizer {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn sanitize(&self, raw: &str) -> String {
        sanitize(raw, self.max_chars)
    }
}

/// Characters that render as nothing but can be used to split trigger words.
fn is_invisible(ch: char) -> bool {
    matches!(
        ch,
        '\u{00AD}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}'
    )
}

/// Single-pass sanitize; see module docs for the rules.
pub fn sanitize(raw: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(raw.len().min(max_chars.saturating_mul(4)));
    let mut count = 0usize;
    let mut pending_space = false;

    for ch in raw.chars() {
        if ch.is_whitespace() {
            // Leading whitespace is dropped; inner runs become one space.
            pending_space = count > 0;
            continue;
        }
        if ch.is_control() || is_invisible(ch) {
            continue;
        }
        let needed = if pending_space { 2 } else { 1 };
        if count + needed > max_chars {
            break;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(ch);
        count += needed;
    }
    out
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_trims() {
        let s = sanitize("  How do I\n\n verify\tmy   webhook?  ", 100);
        assert_eq!(s, "How do I verify my webhook?");
    }

    #[test]
    fn strips_control_and_zero_width() {
        let s = sanitize("ig\u{200B}nore\u{0007} prev\u{FEFF}ious", 100);
        assert_eq!(s, "ignore previous");
    }

    #[test]
    fn truncates_by_chars_not_bytes() {
        let s = sanitize("ééééé", 3);
        assert_eq!(s, "ééé");
        assert_eq!(s.chars().count(), 3);
    }

    #[test]
    fn truncation_never_leaves_trailing_space() {
        let s = sanitize("abc def", 4);
        assert_eq!(s, "abc");
    }

    #[test]
    fn empty_and_blank_inputs() {
        assert_eq!(sanitize("", 10), "");
        assert_eq!(sanitize(" \n\t ", 10), "");
        assert_eq!(sanitize("anything", 0), "");
    }

    #[test]
    fn is_idempotent() {
        let once = sanitize("  a \u{200D} b\r\nc  ", 50);
        assert_eq!(sanitize(&once, 50), once);
    }

    #[test]
    fn truncate_chars_on_boundary() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
