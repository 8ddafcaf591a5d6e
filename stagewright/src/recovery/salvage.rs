//! Field-salvage floor for scoring responses, and the explicit score type.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::errors::RecoveryError;

/// Rationale used when only the score could be salvaged.
pub const DEFAULT_SALVAGED_RATIONALE: &str = "Score extracted from partial response";

/// Marker key added to salvaged values.
pub const PARTIAL_MARKER: &str = "_partialParse";

/// A numeric score that may be genuinely absent.
///
/// Absence is never replaced with a mid-scale number.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Option<f64>", into = "Option<f64>")]
pub enum Score {
    /// A numeric score was produced.
    Present(f64),
    /// No usable score was produced.
    #[default]
    Absent,
}

impl From<Option<f64>> for Score {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Self::Absent, Self::Present)
    }
}

impl From<Score> for Option<f64> {
    fn from(score: Score) -> Self {
        score.value()
    }
}

impl Score {
    /// Reads a numeric field from a recovered value.
    ///
    /// Numeric strings are accepted; anything else is absent.
    #[must_use]
    pub fn from_field(value: &Value, field: &str) -> Self {
        match value.get(field) {
            Some(Value::Number(n)) => n.as_f64().filter(|f| f.is_finite()).into(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()).into(),
            _ => Self::Absent,
        }
    }

    /// Returns the score, if present.
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Present(v) => Some(*v),
            Self::Absent => None,
        }
    }

    /// Returns true if a score was produced.
    #[must_use]
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }
}

/// Names of the fields the salvage floor extracts.
#[derive(Debug, Clone)]
pub struct SalvageFields {
    score: String,
    rationale: String,
    patterns: Option<(Regex, Regex)>,
}

impl Default for SalvageFields {
    fn default() -> Self {
        Self::new("score", "scoreRationale")
    }
}

impl SalvageFields {
    /// Creates a salvage rule for the given field names.
    ///
    /// If the names cannot form a pattern, the rule extracts nothing.
    #[must_use]
    pub fn new(score: impl Into<String>, rationale: impl Into<String>) -> Self {
        let score = score.into();
        let rationale = rationale.into();
        let patterns = match field_patterns(&score, &rationale) {
            Ok(patterns) => Some(patterns),
            Err(e) => {
                warn!(score = %score, rationale = %rationale, error = %e, "Salvage disabled");
                None
            }
        };
        Self {
            score,
            rationale,
            patterns,
        }
    }

    /// Creates a salvage rule, failing if the names cannot form a pattern.
    pub fn try_new(score: impl Into<String>, rationale: impl Into<String>) -> Result<Self, RecoveryError> {
        let score = score.into();
        let rationale = rationale.into();
        let patterns = field_patterns(&score, &rationale)?;
        Ok(Self {
            score,
            rationale,
            patterns: Some(patterns),
        })
    }

    /// Pattern-extracts the score and rationale. Requires a score.
    #[must_use]
    pub fn extract(&self, text: &str) -> Option<Value> {
        let (score_re, rationale_re) = self.patterns.as_ref()?;
        let raw_score = score_re.captures(text)?.get(1)?.as_str();
        let score = match raw_score.parse::<i64>() {
            Ok(n) => json!(n),
            Err(_) => json!(raw_score.parse::<f64>().ok()?),
        };

        let rationale = rationale_re
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| unescape(m.as_str()))
            .unwrap_or_else(|| DEFAULT_SALVAGED_RATIONALE.to_string());

        let mut value = serde_json::Map::new();
        value.insert(self.score.clone(), score);
        value.insert(self.rationale.clone(), Value::String(rationale));
        value.insert(PARTIAL_MARKER.to_string(), Value::Bool(true));
        Some(Value::Object(value))
    }
}

fn field_patterns(score: &str, rationale: &str) -> Result<(Regex, Regex), RecoveryError> {
    let score_re = Regex::new(&format!(r#""{}"\s*:\s*"?(-?\d+(?:\.\d+)?)"#, regex::escape(score)))
        .map_err(|e| RecoveryError::Pattern(e.to_string()))?;
    let rationale_re = Regex::new(&format!(r#""{}"\s*:\s*"((?:[^"\\]|\\.)*)""#, regex::escape(rationale)))
        .map_err(|e| RecoveryError::Pattern(e.to_string()))?;
    Ok((score_re, rationale_re))
}

fn unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{raw}\"")).unwrap_or_else(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_score_and_rationale() {
        let text = r#"{"score": 8, "scoreRationale": "Strong \"local\" demand", "details": {"broken"#;
        let value = SalvageFields::default().extract(text).unwrap();

        assert_eq!(value["score"], 8);
        assert_eq!(value["scoreRationale"], "Strong \"local\" demand");
        assert_eq!(value[PARTIAL_MARKER], true);
    }

    #[test]
    fn test_extract_default_rationale() {
        let value = SalvageFields::default().extract(r#"garbage "score": 6.5 more"#).unwrap();
        assert_eq!(value["score"], 6.5);
        assert_eq!(value["scoreRationale"], DEFAULT_SALVAGED_RATIONALE);
    }

    #[test]
    fn test_extract_requires_score() {
        assert!(SalvageFields::default().extract(r#""scoreRationale": "x""#).is_none());
    }

    #[test]
    fn test_custom_fields() {
        let fields = SalvageFields::new("rating", "why");
        let value = fields.extract(r#"{"rating": 3, "why": "thin"#).unwrap();
        assert_eq!(value["rating"], 3);
        assert_eq!(value["why"], DEFAULT_SALVAGED_RATIONALE);
    }

    #[test]
    fn test_field_names_are_matched_literally() {
        let fields = SalvageFields::try_new("score(1-10)", "why?").unwrap();
        let value = fields.extract(r#"{"score(1-10)": 4, "why?": "few openings"#).unwrap();
        assert_eq!(value["score(1-10)"], 4);
        assert!(fields.extract(r#"{"score1-10": 4"#).is_none());
    }

    #[test]
    fn test_rule_without_patterns_extracts_nothing() {
        let fields = SalvageFields {
            score: "score".to_string(),
            rationale: "scoreRationale".to_string(),
            patterns: None,
        };
        assert!(fields.extract(r#"{"score": 8"#).is_none());
    }

    #[test]
    fn test_score_from_field() {
        let value = json!({"a": 7, "b": "4.5", "c": "n/a", "d": null});
        assert_eq!(Score::from_field(&value, "a"), Score::Present(7.0));
        assert_eq!(Score::from_field(&value, "b"), Score::Present(4.5));
        assert_eq!(Score::from_field(&value, "c"), Score::Absent);
        assert_eq!(Score::from_field(&value, "d"), Score::Absent);
        assert_eq!(Score::from_field(&value, "missing"), Score::Absent);
    }

    #[test]
    fn test_score_serializes_absent_as_null() {
        assert_eq!(serde_json::to_value(Score::Absent).unwrap(), Value::Null);
        assert_eq!(serde_json::to_value(Score::Present(5.0)).unwrap(), json!(5.0));
        let parsed: Score = serde_json::from_str("null").unwrap();
        assert_eq!(parsed, Score::Absent);
    }
}
