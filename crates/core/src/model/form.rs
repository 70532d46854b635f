use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

use crate::model::{ExitKey, FormId, FormVersionId, ResponseId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FormError {
    #[error("form slug cannot be empty")]
    EmptySlug,
    #[error("unknown status: {0}")]
    UnknownStatus(String),
    #[error("progress must be between 0 and 100, got {0}")]
    ProgressOutOfRange(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormStatus {
    Draft,
    Published,
    Archived,
}

impl FormStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
        }
    }

    /// # Errors
    ///
    /// Returns `FormError::UnknownStatus` for names outside the closed set.
    pub fn parse(raw: &str) -> Result<Self, FormError> {
        match raw {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            "archived" => Ok(Self::Archived),
            other => Err(FormError::UnknownStatus(other.to_owned())),
        }
    }
}

/// A questionnaire and the pointer to its live version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Form {
    pub id: FormId,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: FormStatus,
    /// Display label per exit key, used by the completion screen.
    #[serde(default)]
    pub exit_map: HashMap<String, String>,
    #[serde(default)]
    pub active_version_id: Option<FormVersionId>,
}

impl Form {
    /// # Errors
    ///
    /// Returns `FormError::EmptySlug` when the slug is blank.
    pub fn new(
        id: impl Into<FormId>,
        slug: impl Into<String>,
        title: impl Into<String>,
        status: FormStatus,
    ) -> Result<Self, FormError> {
        let slug = slug.into().trim().to_owned();
        if slug.is_empty() {
            return Err(FormError::EmptySlug);
        }
        Ok(Self {
            id: id.into(),
            slug,
            title: title.into(),
            description: None,
            status,
            exit_map: HashMap::new(),
            active_version_id: None,
        })
    }

    #[must_use]
    pub fn is_published(&self) -> bool {
        self.status == FormStatus::Published
    }

    /// Resolve an exit key to its configured label.
    ///
    /// Falls back to the `success` entry when no key was reported.
    #[must_use]
    pub fn exit_label(&self, exit_key: Option<&ExitKey>) -> Option<&str> {
        let key = exit_key.map_or(ExitKey::SUCCESS, ExitKey::as_str);
        self.exit_map.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormVersion {
    pub id: FormVersionId,
    pub form_id: FormId,
    pub version: u32,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Draft,
    Completed,
    Abandoned,
}

impl ResponseStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }

    /// # Errors
    ///
    /// Returns `FormError::UnknownStatus` for names outside the closed set.
    pub fn parse(raw: &str) -> Result<Self, FormError> {
        match raw {
            "draft" => Ok(Self::Draft),
            "completed" => Ok(Self::Completed),
            "abandoned" => Ok(Self::Abandoned),
            other => Err(FormError::UnknownStatus(other.to_owned())),
        }
    }
}

/// Free-form JSON attributes attached to a response, such as UTM parameters.
pub type FieldMap = Map<String, Value>;

/// One user's pass through a form version; owns the saved answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: ResponseId,
    pub form_version_id: FormVersionId,
    pub user_id: String,
    pub status: ResponseStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub progress_pct: u8,
    /// Campaign parameters captured when the response was opened.
    #[serde(default)]
    pub utm: FieldMap,
    #[serde(default)]
    pub hidden: FieldMap,
}

impl Response {
    /// A fresh draft response at 0% progress.
    #[must_use]
    pub fn start(
        form_version_id: FormVersionId,
        user_id: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ResponseId::generate(),
            form_version_id,
            user_id: user_id.into(),
            status: ResponseStatus::Draft,
            started_at,
            completed_at: None,
            progress_pct: 0,
            utm: FieldMap::new(),
            hidden: FieldMap::new(),
        }
    }

    #[must_use]
    pub fn with_utm(mut self, utm: FieldMap) -> Self {
        self.utm = utm;
        self
    }

    /// # Errors
    ///
    /// Returns `FormError::ProgressOutOfRange` above 100.
    pub fn set_progress(&mut self, pct: u8) -> Result<(), FormError> {
        if pct > 100 {
            return Err(FormError::ProgressOutOfRange(pct));
        }
        self.progress_pct = pct;
        Ok(())
    }

    pub fn complete(&mut self, at: DateTime<Utc>) {
        self.status = ResponseStatus::Completed;
        self.completed_at = Some(at);
        self.progress_pct = 100;
    }

    pub fn abandon(&mut self) {
        self.status = ResponseStatus::Abandoned;
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == ResponseStatus::Draft
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn exit_label_defaults_to_success() {
        let mut form = Form::new("f1", "demo", "Demo", FormStatus::Published).unwrap();
        form.exit_map.insert("success".into(), "Thank you!".into());
        form.exit_map.insert("high_risk".into(), "Please reach out".into());

        assert_eq!(form.exit_label(None), Some("Thank you!"));
        assert_eq!(
            form.exit_label(Some(&ExitKey::from("high_risk"))),
            Some("Please reach out")
        );
        assert_eq!(form.exit_label(Some(&ExitKey::from("other"))), None);
    }

    #[test]
    fn blank_slug_rejected() {
        assert_eq!(
            Form::new("f1", "  ", "Demo", FormStatus::Draft).unwrap_err(),
            FormError::EmptySlug
        );
    }

    #[test]
    fn response_lifecycle() {
        let mut response = Response::start(FormVersionId::from("v1"), "user", fixed_now());
        assert!(response.is_open());
        response.set_progress(40).unwrap();
        assert!(response.set_progress(101).is_err());

        response.complete(fixed_now());
        assert_eq!(response.status, ResponseStatus::Completed);
        assert_eq!(response.progress_pct, 100);
        assert_eq!(response.completed_at, Some(fixed_now()));
    }

    #[test]
    fn utm_defaults_to_empty_when_absent() {
        let mut utm = FieldMap::new();
        utm.insert("utm_source".into(), "newsletter".into());
        let response =
            Response::start(FormVersionId::from("v1"), "user", fixed_now()).with_utm(utm.clone());
        assert_eq!(response.utm, utm);
        assert!(response.hidden.is_empty());

        let mut raw = serde_json::to_value(&response).unwrap();
        raw.as_object_mut().unwrap().remove("utm");
        let decoded: Response = serde_json::from_value(raw).unwrap();
        assert!(decoded.utm.is_empty());
    }

    #[test]
    fn status_names_round_trip() {
        for status in [
            ResponseStatus::Draft,
            ResponseStatus::Completed,
            ResponseStatus::Abandoned,
        ] {
            assert_eq!(ResponseStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(FormStatus::parse("live").is_err());
    }
}
