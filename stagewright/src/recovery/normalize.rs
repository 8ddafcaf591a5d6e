//! Text normalization applied before the "cleaned" parse of each strategy.
//!
//! All passes are string-literal aware: nothing inside a quoted string is
//! treated as a comment or separator.

use regex::Regex;
use std::sync::LazyLock;

static FENCE_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n?(.*?)\r?\n?```").expect("fence block regex")
});

static FENCE_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json|JSON)?").expect("fence marker regex"));

/// Returns the trimmed contents of the first fenced block.
#[must_use]
pub fn fenced_block(text: &str) -> Option<&str> {
    FENCE_BLOCK_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Removes every fence marker from the text.
#[must_use]
pub fn strip_fences(text: &str) -> String {
    FENCE_MARKER_RE.replace_all(text, "").trim().to_string()
}

/// Applies every normalizing pass.
#[must_use]
pub fn normalize(text: &str) -> String {
    strip_trailing_separators(&strip_comments_and_controls(text))
}

/// Drops `//` and `/* */` comments outside strings, escapes bare line breaks
/// and tabs inside strings, and removes other control characters.
#[must_use]
pub fn strip_comments_and_controls(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(ch) = chars.next() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(ch);
                continue;
            }
            match ch {
                '\\' => {
                    escaped = true;
                    out.push(ch);
                }
                '"' => {
                    in_string = false;
                    out.push(ch);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if c.is_control() => {}
                c => out.push(c),
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '/' if chars.peek() == Some(&'/') => {
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            '\n' | '\r' | '\t' => out.push(ch),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }

    out
}

/// Removes separators that directly precede a closing bracket.
#[must_use]
pub fn strip_trailing_separators(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            out.push(ch);
            continue;
        }

        if ch == '"' {
            in_string = true;
        } else if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}' | ']')) {
                continue;
            }
        }
        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_block() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nThanks!";
        assert_eq!(fenced_block(text), Some("{\"a\": 1}"));
        assert_eq!(fenced_block("no fences"), None);
    }

    #[test]
    fn test_fenced_block_without_language() {
        assert_eq!(fenced_block("```\n[1, 2]\n```"), Some("[1, 2]"));
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[test]
    fn test_trailing_separators() {
        assert_eq!(strip_trailing_separators("{\"a\": [1, 2,], }"), "{\"a\": [1, 2] }");
    }

    #[test]
    fn test_trailing_separator_inside_string_kept() {
        let text = r#"{"a": "x,]"}"#;
        assert_eq!(strip_trailing_separators(text), text);
    }

    #[test]
    fn test_comments_removed() {
        let text = "{\n  // the score\n  \"score\": 7, /* inline */ \"n\": 1\n}";
        let cleaned = strip_comments_and_controls(text);
        assert!(!cleaned.contains("the score"));
        assert!(!cleaned.contains("inline"));
        assert!(cleaned.contains("\"score\": 7"));
    }

    #[test]
    fn test_url_in_string_is_not_a_comment() {
        let text = r#"{"url": "https://example.com/a"}"#;
        assert_eq!(strip_comments_and_controls(text), text);
    }

    #[test]
    fn test_bare_newline_in_string_escaped() {
        let cleaned = normalize("{\"a\": \"line one\nline two\"}");
        let value: serde_json::Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(value["a"], "line one\nline two");
    }

    #[test]
    fn test_control_characters_dropped() {
        let cleaned = normalize("{\"a\": \"x\u{0007}y\"}\u{0001}");
        assert_eq!(cleaned, "{\"a\": \"xy\"}");
    }
}
