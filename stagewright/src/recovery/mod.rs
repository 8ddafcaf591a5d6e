//! Structured output recovery.
//!
//! Generation responses are asked for one JSON value but arrive wrapped in
//! prose, fenced, truncated or slightly invalid. [`Recoverer`] runs an ordered
//! list of pure strategies, cheapest and most precise first, and returns the
//! first structured value any of them produces. An optional field-salvage
//! floor extracts a bare score and rationale when nothing structural parses.
//!
//! ```rust,ignore
//! use stagewright::recovery::recover;
//!
//! let recovered = recover("Sure! ```json\n{\"score\": 7,}\n```")?;
//! assert_eq!(recovered.value["score"], 7);
//! ```

mod normalize;
mod salvage;
mod scan;

pub use normalize::{fenced_block, normalize, strip_fences};
pub use salvage::{SalvageFields, Score, DEFAULT_SALVAGED_RATIONALE, PARTIAL_MARKER};
pub use scan::{auto_close, close_truncated, first_balanced_span, largest_object};

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use tracing::{debug, warn};

use crate::errors::RecoveryError;

/// Characters of the raw text kept in an unparseable error.
pub const PREVIEW_CHARS: usize = 500;

/// A strategy that turns raw text into a structured value, or declines.
pub type StrategyFn = fn(&str) -> Option<Value>;

/// Identifies the strategy that produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Contents of the first fenced block, as-is.
    FencedRaw,
    /// Contents of the first fenced block, normalized.
    FencedCleaned,
    /// Whole text with fence markers stripped, as-is.
    UnfencedRaw,
    /// Whole text with fence markers stripped, normalized.
    UnfencedCleaned,
    /// First balanced bracket span, as-is.
    BalancedSpanRaw,
    /// First balanced bracket span, normalized.
    BalancedSpanCleaned,
    /// Entire text, as-is.
    WholeRaw,
    /// Entire text, normalized.
    WholeCleaned,
    /// Truncation repair.
    AutoClosed,
    /// Longest parseable brace span.
    LargestSubstring,
    /// Pattern-extracted score and rationale.
    FieldSalvage,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FencedRaw => "fenced_raw",
            Self::FencedCleaned => "fenced_cleaned",
            Self::UnfencedRaw => "unfenced_raw",
            Self::UnfencedCleaned => "unfenced_cleaned",
            Self::BalancedSpanRaw => "balanced_span_raw",
            Self::BalancedSpanCleaned => "balanced_span_cleaned",
            Self::WholeRaw => "whole_raw",
            Self::WholeCleaned => "whole_cleaned",
            Self::AutoClosed => "auto_closed",
            Self::LargestSubstring => "largest_substring",
            Self::FieldSalvage => "field_salvage",
        };
        f.write_str(name)
    }
}

/// The structural strategies, in the order they are tried.
pub const STRATEGIES: &[(Strategy, StrategyFn)] = &[
    (Strategy::FencedRaw, fenced_raw),
    (Strategy::FencedCleaned, fenced_cleaned),
    (Strategy::UnfencedRaw, unfenced_raw),
    (Strategy::UnfencedCleaned, unfenced_cleaned),
    (Strategy::BalancedSpanRaw, balanced_raw),
    (Strategy::BalancedSpanCleaned, balanced_cleaned),
    (Strategy::WholeRaw, parse_structured),
    (Strategy::WholeCleaned, parse_cleaned),
    (Strategy::AutoClosed, auto_closed),
    (Strategy::LargestSubstring, largest_object),
];

fn fenced_raw(text: &str) -> Option<Value> {
    fenced_block(text).and_then(parse_structured)
}

fn fenced_cleaned(text: &str) -> Option<Value> {
    fenced_block(text).and_then(parse_cleaned)
}

fn unfenced_raw(text: &str) -> Option<Value> {
    parse_structured(&strip_fences(text))
}

fn unfenced_cleaned(text: &str) -> Option<Value> {
    parse_cleaned(&strip_fences(text))
}

fn balanced_raw(text: &str) -> Option<Value> {
    first_balanced_span(text).and_then(parse_structured)
}

fn balanced_cleaned(text: &str) -> Option<Value> {
    first_balanced_span(text).and_then(parse_cleaned)
}

fn auto_closed(text: &str) -> Option<Value> {
    auto_close(&strip_fences(text))
}

/// Parses text as JSON, accepting only objects and arrays.
#[must_use]
pub fn parse_structured(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
        _ => None,
    }
}

fn parse_cleaned(text: &str) -> Option<Value> {
    parse_structured(&normalize(text))
}

/// A value recovered from raw text.
#[derive(Debug, Clone, PartialEq)]
pub struct Recovered {
    /// The structured value.
    pub value: Value,
    /// The strategy that produced it.
    pub strategy: Strategy,
    /// True if only the salvage floor succeeded.
    pub partial: bool,
}

/// Runs the recovery cascade.
#[derive(Debug, Clone, Default)]
pub struct Recoverer {
    salvage: Option<SalvageFields>,
}

impl Recoverer {
    /// Creates a recoverer with structural strategies only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a recoverer for scoring responses, with the default salvage floor.
    #[must_use]
    pub fn scoring() -> Self {
        Self::new().with_salvage(SalvageFields::default())
    }

    /// Sets the salvage floor.
    #[must_use]
    pub fn with_salvage(mut self, fields: SalvageFields) -> Self {
        self.salvage = Some(fields);
        self
    }

    /// Recovers a structured value from raw text.
    pub fn recover(&self, text: &str) -> Result<Recovered, RecoveryError> {
        for (strategy, attempt) in STRATEGIES {
            if let Some(value) = attempt(text) {
                if matches!(strategy, Strategy::AutoClosed | Strategy::LargestSubstring) {
                    warn!(strategy = %strategy, "Recovered structured output with a permissive strategy");
                } else {
                    debug!(strategy = %strategy, "Recovered structured output");
                }
                return Ok(Recovered {
                    value,
                    strategy: *strategy,
                    partial: false,
                });
            }
        }

        if let Some(value) = self.salvage.as_ref().and_then(|fields| fields.extract(text)) {
            warn!("Recovered score via field salvage");
            return Ok(Recovered {
                value,
                strategy: Strategy::FieldSalvage,
                partial: true,
            });
        }

        let preview: String = text.chars().take(PREVIEW_CHARS).collect();
        warn!(chars = text.len(), "All structured output recovery strategies failed");
        Err(RecoveryError::Unparseable { preview })
    }

    /// Recovers and deserializes into `T`.
    pub fn recover_as<T: DeserializeOwned>(&self, text: &str) -> Result<T, RecoveryError> {
        let recovered = self.recover(text)?;
        serde_json::from_value(recovered.value).map_err(|e| RecoveryError::Shape(e.to_string()))
    }
}

/// Recovers with structural strategies only.
pub fn recover(text: &str) -> Result<Recovered, RecoveryError> {
    Recoverer::new().recover(text)
}

/// Recovers with structural strategies and deserializes into `T`.
pub fn recover_as<T: DeserializeOwned>(text: &str) -> Result<T, RecoveryError> {
    Recoverer::new().recover_as(text)
}

/// Reports every required top-level field missing from a value.
pub fn validate_required(value: &Value, fields: &[&str]) -> Result<(), RecoveryError> {
    let missing: Vec<String> = fields
        .iter()
        .filter(|field| value.get(**field).is_none())
        .map(|field| (*field).to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(RecoveryError::MissingFields { missing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[test]
    fn test_clean_value_uses_first_cheap_strategy() {
        let recovered = recover(r#"{"a": 1}"#).unwrap();
        assert_eq!(recovered.value, json!({"a": 1}));
        assert_eq!(recovered.strategy, Strategy::UnfencedRaw);
        assert!(!recovered.partial);
    }

    #[test]
    fn test_fenced_with_commentary() {
        let text = "Here is the analysis you asked for:\n\n```json\n{\"score\": 7, \"tags\": [\"a\"]}\n```\n\nLet me know if you need more.";
        let recovered = recover(text).unwrap();
        assert_eq!(recovered.value, json!({"score": 7, "tags": ["a"]}));
        assert_eq!(recovered.strategy, Strategy::FencedRaw);
    }

    #[test]
    fn test_trailing_separators() {
        let recovered = recover("{\"a\": [1, 2, 3,], \"b\": {\"c\": true,},}").unwrap();
        assert_eq!(recovered.value, json!({"a": [1, 2, 3], "b": {"c": true}}));
        assert_eq!(recovered.strategy, Strategy::UnfencedCleaned);
    }

    #[test]
    fn test_truncated_mid_string() {
        let recovered = recover(r#"{"summary": "Demand is strong", "detail": "Regional employers report shorta"#).unwrap();
        assert_eq!(
            recovered.value,
            json!({"summary": "Demand is strong", "detail": "Regional employers report shorta"})
        );
        assert_eq!(recovered.strategy, Strategy::AutoClosed);
    }

    #[test]
    fn test_truncated_mid_array() {
        let recovered = recover("```json\n{\"occupations\": [{\"code\": \"15-1212\"}, {\"code\": \"15-1244\"}, ").unwrap();
        assert_eq!(
            recovered.value,
            json!({"occupations": [{"code": "15-1212"}, {"code": "15-1244"}]})
        );
        assert_eq!(recovered.strategy, Strategy::AutoClosed);
    }

    #[test]
    fn test_comment_annotated() {
        let text = "{\n  \"score\": 6, // moderate\n  /* sourced from postings */\n  \"source\": \"https://example.com\"\n}";
        let recovered = recover(text).unwrap();
        assert_eq!(recovered.value, json!({"score": 6, "source": "https://example.com"}));
    }

    #[test]
    fn test_two_candidates_only_second_valid() {
        let text = r#"I considered {score: high} but the final answer is {"score": 9, "scoreRationale": "ok"} as shown."#;
        let recovered = recover(text).unwrap();
        assert_eq!(recovered.value, json!({"score": 9, "scoreRationale": "ok"}));
        assert_eq!(recovered.strategy, Strategy::LargestSubstring);
    }

    #[test]
    fn test_bare_array() {
        let recovered = recover("Results:\n[{\"id\": 1}, {\"id\": 2}]\nDone.").unwrap();
        assert_eq!(recovered.value, json!([{"id": 1}, {"id": 2}]));
    }

    #[test]
    fn test_salvage_only_without_structure() {
        let text = r#"The "score": 4 seems right and "scoreRationale": "thin evidence" but {oops"#;
        assert!(recover(text).is_err());

        let recovered = Recoverer::scoring().recover(text).unwrap();
        assert!(recovered.partial);
        assert_eq!(recovered.strategy, Strategy::FieldSalvage);
        assert_eq!(recovered.value["score"], 4);
        assert_eq!(recovered.value["scoreRationale"], "thin evidence");
    }

    #[test]
    fn test_structure_preferred_over_salvage() {
        let recovered = Recoverer::scoring().recover(r#"{"score": 3, "scoreRationale": "x"}"#).unwrap();
        assert!(!recovered.partial);
        assert!(recovered.value.get(PARTIAL_MARKER).is_none());
    }

    #[test]
    fn test_unparseable_carries_preview() {
        let text = "no structure here ".repeat(50);
        let err = recover(&text).unwrap_err();
        match err {
            RecoveryError::Unparseable { preview } => assert_eq!(preview.chars().count(), PREVIEW_CHARS),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_scalars_are_not_structured() {
        assert!(recover("42").is_err());
        assert!(recover("\"just a string\"").is_err());
    }

    #[test]
    fn test_round_trip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Section {
            title: String,
            score: Option<f64>,
            bullets: Vec<String>,
        }

        let original = Section {
            title: "Labor \"market\" {outlook}".to_string(),
            score: Some(7.5),
            bullets: vec!["line one\nline two".to_string(), "// not a comment".to_string()],
        };
        let text = serde_json::to_string_pretty(&original).unwrap();
        let recovered: Section = recover_as(&text).unwrap();
        assert_eq!(recovered, original);
    }

    #[test]
    fn test_recover_as_shape_error() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Needs {
            count: u32,
        }
        let err = recover_as::<Needs>(r#"{"count": "many"}"#).unwrap_err();
        assert!(matches!(err, RecoveryError::Shape(_)));
    }

    #[test]
    fn test_validate_required() {
        let value = json!({"score": 1, "summary": "x"});
        assert!(validate_required(&value, &["score", "summary"]).is_ok());

        let err = validate_required(&value, &["score", "risks", "sources"]).unwrap_err();
        match err {
            RecoveryError::MissingFields { missing } => assert_eq!(missing, vec!["risks", "sources"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_each_strategy_is_independent() {
        let (_, fenced) = STRATEGIES[0];
        assert_eq!(fenced("```json\n[1]\n```"), Some(json!([1])));
        assert_eq!(fenced("[1]"), None);
    }
}
