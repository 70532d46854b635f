use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::model::{AnswerValue, QuestionId};

/// Semantic tag describing why the question flow ended.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExitKey(String);

impl ExitKey {
    /// Key reported when linear progression runs past the last question.
    pub const SUCCESS: &'static str = "success";

    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn success() -> Self {
        Self(Self::SUCCESS.to_owned())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExitKey {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Predicate operator of a branching rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleOperator {
    #[serde(rename = "eq")]
    Equals,
    #[serde(rename = "neq")]
    NotEquals,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not_in")]
    NotIn,
    #[serde(rename = "gt")]
    GreaterThan,
    #[serde(rename = "lt")]
    LessThan,
    #[serde(rename = "is_empty")]
    IsEmpty,
    #[serde(rename = "is_not_empty")]
    IsNotEmpty,
}

impl RuleOperator {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equals => "eq",
            Self::NotEquals => "neq",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::GreaterThan => "gt",
            Self::LessThan => "lt",
            Self::IsEmpty => "is_empty",
            Self::IsNotEmpty => "is_not_empty",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "eq" => Self::Equals,
            "neq" => Self::NotEquals,
            "in" => Self::In,
            "not_in" => Self::NotIn,
            "gt" => Self::GreaterThan,
            "lt" => Self::LessThan,
            "is_empty" => Self::IsEmpty,
            "is_not_empty" => Self::IsNotEmpty,
            _ => return None,
        })
    }

    /// Evaluate against the current answer of the rule's source question.
    ///
    /// A missing answer only ever matches `IsEmpty`. Operands that cannot be
    /// compared (non-numeric for `gt`/`lt`, non-list for `in`/`not_in`)
    /// never match.
    #[must_use]
    pub fn evaluate(self, answer: Option<&AnswerValue>, expected: &Value) -> bool {
        let Some(answer) = answer else {
            return self == Self::IsEmpty;
        };

        match self {
            Self::Equals => answer.equals_json(expected),
            Self::NotEquals => !answer.equals_json(expected),
            Self::In => expected
                .as_array()
                .is_some_and(|set| set.iter().any(|v| answer.equals_json(v))),
            Self::NotIn => expected
                .as_array()
                .is_some_and(|set| !set.iter().any(|v| answer.equals_json(v))),
            Self::GreaterThan => numeric_pair(answer, expected).is_some_and(|(a, b)| a > b),
            Self::LessThan => numeric_pair(answer, expected).is_some_and(|(a, b)| a < b),
            Self::IsEmpty => answer.is_blank(),
            Self::IsNotEmpty => !answer.is_blank(),
        }
    }
}

fn numeric_pair(answer: &AnswerValue, expected: &Value) -> Option<(f64, f64)> {
    let lhs = answer.as_number()?;
    let rhs = match expected {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    rhs.is_finite().then_some((lhs, rhs))
}

/// Conditional edge from a source question to a target question or an exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchingRule {
    #[serde(default)]
    pub id: Option<String>,
    pub question_id: QuestionId,
    pub operator: RuleOperator,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub target_question_id: Option<QuestionId>,
    #[serde(default)]
    pub exit_key: Option<ExitKey>,
    pub order: i32,
}

impl BranchingRule {
    #[must_use]
    pub fn new(
        question_id: impl Into<QuestionId>,
        operator: RuleOperator,
        value: Value,
        order: i32,
    ) -> Self {
        Self {
            id: None,
            question_id: question_id.into(),
            operator,
            value,
            target_question_id: None,
            exit_key: None,
            order,
        }
    }

    #[must_use]
    pub fn goto(mut self, target: impl Into<QuestionId>) -> Self {
        self.target_question_id = Some(target.into());
        self
    }

    #[must_use]
    pub fn exit(mut self, exit_key: impl Into<ExitKey>) -> Self {
        self.target_question_id = None;
        self.exit_key = Some(exit_key.into());
        self
    }

    #[must_use]
    pub fn matches(&self, answer: Option<&AnswerValue>) -> bool {
        self.operator.evaluate(answer, &self.value)
    }

    /// Decode a comparison value that arrived as JSON text.
    ///
    /// Only strings that look like JSON (leading `"`, `[` or `{`) are
    /// decoded; on failure the raw string is kept.
    pub(crate) fn decode_value(&mut self) {
        let Value::String(raw) = &self.value else {
            return;
        };
        if !raw.starts_with(['"', '[', '{']) {
            return;
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(decoded) => self.value = decoded,
            Err(err) => {
                tracing::warn!(
                    question_id = %self.question_id,
                    raw = %raw,
                    error = %err,
                    "Keeping undecodable rule value as text"
                );
            }
        }
    }
}
