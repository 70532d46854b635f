use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::QuestionId;

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum AnswerError {
    #[error("answer number must be finite, got {0}")]
    NonFiniteNumber(f64),
}

/// A recorded answer value.
///
/// Text questions produce `Text`, the numeric scale produces `Number`, and
/// multiple choice produces an ordered `List` of choice values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl AnswerValue {
    /// Whether the value counts as an actual answer: a non-empty list, a
    /// string with non-whitespace content, or any number.
    #[must_use]
    pub fn is_present(&self) -> bool {
        !self.is_blank()
    }

    /// Empty list or empty/whitespace-only string. Numbers are never blank.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::List(items) => items.is_empty(),
            Self::Text(text) => text.trim().is_empty(),
            Self::Number(_) => false,
        }
    }

    /// Numeric reading used by the `gt`/`lt` operators.
    ///
    /// Lists are never numeric; text must parse completely once trimmed.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        let n = match self {
            Self::Number(n) => *n,
            Self::Text(text) => text.trim().parse::<f64>().ok()?,
            Self::List(_) => return None,
        };
        n.is_finite().then_some(n)
    }

    /// Structural equality against a JSON comparison value.
    ///
    /// Numbers compare by `f64` value so `9` and `9.0` are equal; a number
    /// never equals a string.
    #[must_use]
    pub fn equals_json(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Text(a), Value::String(b)) => a == b,
            (Self::Number(a), Value::Number(b)) => b.as_f64() == Some(*a),
            (Self::List(a), Value::Array(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|(x, y)| y.as_str().is_some_and(|y| x == y))
            }
            _ => false,
        }
    }

    /// JSON form of the value, as kept in a stored answer cell.
    ///
    /// # Errors
    ///
    /// Returns `AnswerError::NonFiniteNumber` for NaN or infinite numbers,
    /// which have no JSON representation.
    pub fn to_json(&self) -> Result<Value, AnswerError> {
        match self {
            Self::Number(n) if !n.is_finite() => Err(AnswerError::NonFiniteNumber(*n)),
            Self::Number(n) => Ok(Value::from(*n)),
            Self::Text(text) => Ok(Value::from(text.as_str())),
            Self::List(items) => Ok(Value::from(items.clone())),
        }
    }

    /// Reads a JSON value back into an answer.
    ///
    /// Array elements that are not strings are kept in their JSON text form;
    /// objects, booleans and null become text.
    #[must_use]
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(text) => Self::Text(text),
            Value::Number(n) => match n.as_f64() {
                Some(n) => Self::Number(n),
                None => Self::Text(n.to_string()),
            },
            Value::Array(items) => Self::List(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(text) => text,
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            other => Self::Text(other.to_string()),
        }
    }

    /// Decodes stored answer text.
    ///
    /// Only text that looks like JSON (leading `"`, `[` or `{`) is decoded.
    /// Anything else is taken verbatim, as are JSON objects and text that
    /// fails to decode.
    #[must_use]
    pub fn from_stored(raw: &str) -> Self {
        if !raw.starts_with(['"', '[', '{']) {
            return Self::Text(raw.to_owned());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(_)) | Err(_) => Self::Text(raw.to_owned()),
            Ok(decoded) => Self::from_json(decoded),
        }
    }
}

impl From<&str> for AnswerValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for AnswerValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for AnswerValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for AnswerValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<Vec<String>> for AnswerValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

impl From<Vec<&str>> for AnswerValue {
    fn from(value: Vec<&str>) -> Self {
        Self::List(value.into_iter().map(str::to_owned).collect())
    }
}

/// An answer as persisted for a response: keyed by question id, not uid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAnswer {
    pub question_id: QuestionId,
    pub value: AnswerValue,
}

impl StoredAnswer {
    #[must_use]
    pub fn new(question_id: impl Into<QuestionId>, value: impl Into<AnswerValue>) -> Self {
        Self {
            question_id: question_id.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_and_present_are_complements() {
        let cases = [
            AnswerValue::from(""),
            AnswerValue::from("   \t"),
            AnswerValue::from("ok"),
            AnswerValue::List(vec![]),
            AnswerValue::from(vec!["a"]),
            AnswerValue::from(0),
        ];
        for value in cases {
            assert_ne!(value.is_blank(), value.is_present(), "{value:?}");
        }
        assert!(AnswerValue::from(" ").is_blank());
        assert!(!AnswerValue::from(0).is_blank());
    }

    #[test]
    fn numeric_reading() {
        assert_eq!(AnswerValue::from(" 7 ").as_number(), Some(7.0));
        assert_eq!(AnswerValue::from(3.5).as_number(), Some(3.5));
        assert_eq!(AnswerValue::from("seven").as_number(), None);
        assert_eq!(AnswerValue::from(vec!["5"]).as_number(), None);
        assert_eq!(AnswerValue::from("NaN").as_number(), None);
    }

    #[test]
    fn equals_json_is_structural() {
        assert!(AnswerValue::from("poor").equals_json(&json!("poor")));
        assert!(AnswerValue::from(9).equals_json(&json!(9)));
        assert!(!AnswerValue::from(9).equals_json(&json!("9")));
        assert!(AnswerValue::from(vec!["a", "b"]).equals_json(&json!(["a", "b"])));
        assert!(!AnswerValue::from(vec!["a", "b"]).equals_json(&json!(["b", "a"])));
    }

    #[test]
    fn stored_encoding_decodes_back() {
        for value in [
            AnswerValue::from("hello"),
            AnswerValue::from("[not a list]"),
            AnswerValue::from(vec!["x", "y"]),
        ] {
            let stored = value.to_json().unwrap().to_string();
            assert_eq!(AnswerValue::from_stored(&stored), value);
        }
    }

    #[test]
    fn plain_stored_text_is_never_reinterpreted() {
        assert_eq!(AnswerValue::from_stored("42"), AnswerValue::from("42"));
        assert_eq!(AnswerValue::from_stored("true"), AnswerValue::from("true"));
        assert_eq!(
            AnswerValue::from_stored("plain words"),
            AnswerValue::from("plain words")
        );
        assert_eq!(
            AnswerValue::from_stored("{\"nested\": true}"),
            AnswerValue::from("{\"nested\": true}")
        );
        assert_eq!(AnswerValue::from_stored("[broken"), AnswerValue::from("[broken"));
    }

    #[test]
    fn stored_arrays_keep_non_string_items_as_text() {
        assert_eq!(
            AnswerValue::from_stored("[1,2]"),
            AnswerValue::from(vec!["1", "2"])
        );
        assert_eq!(
            AnswerValue::from_json(json!(["a", 3.5, null])),
            AnswerValue::from(vec!["a", "3.5", "null"])
        );
    }

    #[test]
    fn non_finite_numbers_are_not_encodable() {
        assert_eq!(
            AnswerValue::from(f64::INFINITY).to_json(),
            Err(AnswerError::NonFiniteNumber(f64::INFINITY))
        );
        assert!(AnswerValue::from(f64::NAN).to_json().is_err());
        assert_eq!(AnswerValue::from(8).to_json().unwrap(), json!(8.0));
        assert_eq!(AnswerValue::from_json(json!(8)), AnswerValue::from(8));
    }
}
