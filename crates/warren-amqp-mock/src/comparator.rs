//! Request body comparators.
//!
//! An expectation carries exactly one comparator, chosen at creation time:
//! exact JSON, partial (subset) JSON, or an unanchored regular expression
//! over the raw payload bytes.

use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while constructing a comparator.
#[derive(Debug, Error)]
pub enum ComparatorError {
    #[error("invalid json body")]
    InvalidJsonBody(#[source] serde_json::Error),
    #[error("failed to compile regex: {0}")]
    InvalidRegex(#[from] regex::Error),
}

/// How a JSON body comparator interprets its pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    /// Structural equality with the incoming payload.
    #[default]
    Exact,
    /// The pattern must be a structural subset of the incoming payload.
    Partial,
}

/// Decides membership of a raw byte payload.
///
/// Comparators are immutable once built and safe to share across tasks.
#[derive(Debug, Clone)]
pub enum BodyComparator {
    Json(JsonBody),
    Regex(RegexBody),
}

impl BodyComparator {
    pub fn matches(&self, payload: &[u8]) -> bool {
        match self {
            BodyComparator::Json(json) => json.matches(payload),
            BodyComparator::Regex(regex) => regex.matches(payload),
        }
    }
}

/// JSON comparator, exact or partial.
#[derive(Debug, Clone)]
pub struct JsonBody {
    body: Value,
    match_type: MatchType,
}

impl JsonBody {
    /// Builds a JSON comparator from a raw pattern. The pattern itself must
    /// parse as valid JSON.
    pub fn new(raw: &[u8], match_type: MatchType) -> Result<Self, ComparatorError> {
        let body = serde_json::from_slice(raw).map_err(ComparatorError::InvalidJsonBody)?;
        Ok(Self { body, match_type })
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn match_type(&self) -> MatchType {
        self.match_type
    }

    /// Payloads that do not parse as JSON never match.
    pub fn matches(&self, payload: &[u8]) -> bool {
        let Ok(actual) = serde_json::from_slice::<Value>(payload) else {
            return false;
        };

        match self.match_type {
            MatchType::Exact => actual == self.body,
            MatchType::Partial => json_subset(&self.body, &actual),
        }
    }
}

/// True when every path in `expected` exists in `actual` with an equal value.
/// Objects in `actual` may carry extra keys at any depth; arrays are compared
/// element-wise and must have equal length.
fn json_subset(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(expected), Value::Object(actual)) => expected
            .iter()
            .all(|(key, value)| actual.get(key).is_some_and(|a| json_subset(value, a))),
        (Value::Array(expected), Value::Array(actual)) => {
            expected.len() == actual.len()
                && expected.iter().zip(actual).all(|(e, a)| json_subset(e, a))
        }
        _ => expected == actual,
    }
}

/// Unanchored regular-expression comparator over the raw payload bytes.
#[derive(Debug, Clone)]
pub struct RegexBody {
    regex: Regex,
}

impl RegexBody {
    pub fn new(pattern: &str) -> Result<Self, ComparatorError> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    pub fn matches(&self, payload: &[u8]) -> bool {
        self.regex.is_match(payload)
    }
}
