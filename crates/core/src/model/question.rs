use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::{FormVersionId, QuestionId, QuestionUid};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("question id cannot be empty")]
    EmptyId,
    #[error("question uid cannot be empty")]
    EmptyUid,
    #[error("unknown question type: {0}")]
    UnknownType(String),
}

/// How a question collects its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    ShortText,
    LongText,
    SingleChoice,
    MultipleChoice,
    /// Numeric scale (net promoter style, 0..=10 unless settings say otherwise).
    Nps,
}

impl QuestionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ShortText => "short_text",
            Self::LongText => "long_text",
            Self::SingleChoice => "single_choice",
            Self::MultipleChoice => "multiple_choice",
            Self::Nps => "nps",
        }
    }

    /// Parses the storage name of a question type.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError::UnknownType` for names outside the closed set.
    pub fn parse(raw: &str) -> Result<Self, QuestionError> {
        match raw {
            "short_text" => Ok(Self::ShortText),
            "long_text" => Ok(Self::LongText),
            "single_choice" => Ok(Self::SingleChoice),
            "multiple_choice" => Ok(Self::MultipleChoice),
            "nps" => Ok(Self::Nps),
            other => Err(QuestionError::UnknownType(other.to_owned())),
        }
    }

    #[must_use]
    pub fn has_choices(self) -> bool {
        matches!(self, Self::SingleChoice | Self::MultipleChoice)
    }
}

/// A selectable option; `value` is what gets recorded, `label` what is shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    pub label: String,
    pub value: String,
    pub order: i32,
    #[serde(default)]
    pub is_default: bool,
}

/// One catalog entry. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    id: QuestionId,
    uid: QuestionUid,
    #[serde(default)]
    form_version_id: Option<FormVersionId>,
    label: String,
    #[serde(rename = "type")]
    kind: QuestionType,
    #[serde(default)]
    required: bool,
    order: i32,
    #[serde(default)]
    settings: Value,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    choices: Vec<Choice>,
}

impl Question {
    /// Build a question with no choices, settings or version link.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` when the id or uid is blank.
    pub fn new(
        id: impl Into<QuestionId>,
        uid: impl Into<QuestionUid>,
        label: impl Into<String>,
        kind: QuestionType,
        required: bool,
        order: i32,
    ) -> Result<Self, QuestionError> {
        let id = id.into();
        let uid = uid.into();
        if id.as_str().trim().is_empty() {
            return Err(QuestionError::EmptyId);
        }
        if uid.as_str().trim().is_empty() {
            return Err(QuestionError::EmptyUid);
        }
        Ok(Self {
            id,
            uid,
            form_version_id: None,
            label: label.into(),
            kind,
            required,
            order,
            settings: Value::Null,
            archived: false,
            choices: Vec::new(),
        })
    }

    /// Attach choices, kept sorted by their `order`.
    #[must_use]
    pub fn with_choices(mut self, mut choices: Vec<Choice>) -> Self {
        choices.sort_by_key(|c| c.order);
        self.choices = choices;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_form_version(mut self, version: FormVersionId) -> Self {
        self.form_version_id = Some(version);
        self
    }

    #[must_use]
    pub fn with_archived(mut self, archived: bool) -> Self {
        self.archived = archived;
        self
    }

    #[must_use]
    pub fn id(&self) -> &QuestionId {
        &self.id
    }

    #[must_use]
    pub fn uid(&self) -> &QuestionUid {
        &self.uid
    }

    #[must_use]
    pub fn form_version_id(&self) -> Option<&FormVersionId> {
        self.form_version_id.as_ref()
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn kind(&self) -> QuestionType {
        self.kind
    }

    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }

    #[must_use]
    pub fn order(&self) -> i32 {
        self.order
    }

    #[must_use]
    pub fn settings(&self) -> &Value {
        &self.settings
    }

    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.archived
    }

    #[must_use]
    pub fn choices(&self) -> &[Choice] {
        &self.choices
    }

    /// Label for a recorded choice value.
    #[must_use]
    pub fn choice_label(&self, value: &str) -> Option<&str> {
        self.choices
            .iter()
            .find(|c| c.value == value)
            .map(|c| c.label.as_str())
    }

    /// Scale bounds for numeric-scale questions, read from settings
    /// (`min`/`max`), defaulting to 0..=10.
    #[must_use]
    pub fn scale_bounds(&self) -> Option<(i64, i64)> {
        if self.kind != QuestionType::Nps {
            return None;
        }
        let min = self.settings.get("min").and_then(Value::as_i64).unwrap_or(0);
        let max = self.settings.get("max").and_then(Value::as_i64).unwrap_or(10);
        Some((min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn choice(value: &str, order: i32) -> Choice {
        Choice {
            id: format!("c-{value}"),
            label: value.to_uppercase(),
            value: value.to_owned(),
            order,
            is_default: false,
        }
    }

    #[test]
    fn rejects_blank_uid() {
        let err = Question::new("q1", " ", "Label", QuestionType::ShortText, false, 1).unwrap_err();
        assert_eq!(err, QuestionError::EmptyUid);
    }

    #[test]
    fn choices_are_ordered() {
        let q = Question::new("q1", "fruit", "Fruit", QuestionType::SingleChoice, true, 1)
            .unwrap()
            .with_choices(vec![choice("pear", 2), choice("apple", 1)]);
        let values: Vec<_> = q.choices().iter().map(|c| c.value.as_str()).collect();
        assert_eq!(values, ["apple", "pear"]);
        assert_eq!(q.choice_label("pear"), Some("PEAR"));
    }

    #[test]
    fn type_names_round_trip() {
        for kind in [
            QuestionType::ShortText,
            QuestionType::LongText,
            QuestionType::SingleChoice,
            QuestionType::MultipleChoice,
            QuestionType::Nps,
        ] {
            assert_eq!(QuestionType::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(QuestionType::parse("slider").is_err());
    }

    #[test]
    fn scale_bounds_from_settings() {
        let q = Question::new("q", "score", "Score", QuestionType::Nps, false, 1)
            .unwrap()
            .with_settings(json!({ "min": 1, "max": 5 }));
        assert_eq!(q.scale_bounds(), Some((1, 5)));

        let text = Question::new("t", "text", "Text", QuestionType::ShortText, false, 2).unwrap();
        assert_eq!(text.scale_bounds(), None);
    }

    #[test]
    fn deserializes_wire_shape() {
        let q: Question = serde_json::from_value(json!({
            "id": "q1",
            "uid": "mood",
            "label": "Mood?",
            "type": "multiple_choice",
            "required": true,
            "order": 3
        }))
        .unwrap();
        assert_eq!(q.kind(), QuestionType::MultipleChoice);
        assert!(q.is_required());
        assert!(q.choices().is_empty());
    }
}
