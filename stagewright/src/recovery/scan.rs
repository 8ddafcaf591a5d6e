//! String-aware bracket scanning: balanced spans, truncation repair and the
//! largest-parseable-substring search.

use serde_json::Value;

use super::{normalize::normalize, parse_structured};

/// Upper bound on how many trailing elements truncation repair may discard.
const MAX_REPAIR_CUTS: usize = 8;

/// Tracks string-literal state while scanning byte by byte.
#[derive(Debug, Default)]
struct Lexer {
    in_string: bool,
    escaped: bool,
}

impl Lexer {
    /// Feeds one byte; returns true if it is structural (outside a string).
    fn structural(&mut self, byte: u8) -> bool {
        if self.escaped {
            self.escaped = false;
            return false;
        }
        if self.in_string {
            match byte {
                b'\\' => self.escaped = true,
                b'"' => self.in_string = false,
                _ => {}
            }
            return false;
        }
        if byte == b'"' {
            self.in_string = true;
            return false;
        }
        true
    }
}

/// Returns the end (exclusive) of the span opened at `start`, if it closes.
fn matching_close(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut lexer = Lexer::default();
    let mut depth = 0usize;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if !lexer.structural(byte) {
            continue;
        }
        match byte {
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Returns the first balanced object or array span in the text.
#[must_use]
pub fn first_balanced_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let end = matching_close(text, start)?;
    Some(&text[start..end])
}

/// Closes an unterminated string, drops a dangling separator or key, and
/// appends closers for every unmatched bracket in nesting order.
#[must_use]
pub fn close_truncated(text: &str) -> String {
    let mut lexer = Lexer::default();
    let mut stack: Vec<u8> = Vec::new();

    for &byte in text.as_bytes() {
        if !lexer.structural(byte) {
            continue;
        }
        match byte {
            b'{' => stack.push(b'}'),
            b'[' => stack.push(b']'),
            b'}' | b']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut repaired = text.trim_end().to_string();
    if lexer.in_string {
        if lexer.escaped {
            repaired.pop();
        }
        repaired.push('"');
    }

    loop {
        let trimmed = repaired.trim_end();
        if let Some(rest) = trimmed.strip_suffix(',') {
            repaired = rest.to_string();
        } else if let Some(rest) = trimmed.strip_suffix(':') {
            repaired = drop_trailing_key(rest).to_string();
        } else {
            repaired.truncate(trimmed.len());
            break;
        }
    }

    while let Some(closer) = stack.pop() {
        repaired.push(char::from(closer));
    }
    repaired
}

/// Removes a trailing quoted key from text that ended in `"key":`.
fn drop_trailing_key(text: &str) -> &str {
    let trimmed = text.trim_end();
    let Some(body) = trimmed.strip_suffix('"') else {
        return trimmed;
    };
    match body.rfind('"') {
        Some(open) => &body[..open],
        None => trimmed,
    }
}

/// Returns the byte offset of the last separator outside strings.
fn last_separator(text: &str) -> Option<usize> {
    let mut lexer = Lexer::default();
    let mut last = None;
    for (i, &byte) in text.as_bytes().iter().enumerate() {
        if lexer.structural(byte) && byte == b',' {
            last = Some(i);
        }
    }
    last
}

/// Repairs text truncated mid-value, starting at its first opening bracket.
///
/// When closing as-is does not parse, trailing elements are discarded one
/// separator at a time.
#[must_use]
pub fn auto_close(text: &str) -> Option<Value> {
    let start = text.find(['{', '['])?;
    let cleaned = normalize(&text[start..]);
    let mut candidate = cleaned.as_str();

    for _ in 0..=MAX_REPAIR_CUTS {
        if let Some(value) = parse_structured(&close_truncated(candidate)) {
            return Some(value);
        }
        let cut = last_separator(candidate)?;
        candidate = &candidate[..cut];
    }
    None
}

/// Tries every opening brace and keeps the longest balanced span that parses.
#[must_use]
pub fn largest_object(text: &str) -> Option<Value> {
    let mut best: Option<(usize, Value)> = None;

    for (start, _) in text.match_indices('{') {
        let Some(end) = matching_close(text, start) else {
            continue;
        };
        let len = end - start;
        if best.as_ref().is_some_and(|(best_len, _)| *best_len >= len) {
            continue;
        }
        let candidate = &text[start..end];
        let parsed = parse_structured(candidate).or_else(|| parse_structured(&normalize(candidate)));
        if let Some(value) = parsed {
            best = Some((len, value));
        }
    }

    best.map(|(_, value)| value)
}
