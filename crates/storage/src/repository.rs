use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flow_core::model::{
    BranchingRule, Catalog, FieldMap, Form, FormId, FormVersion, FormVersionId, Question,
    Response, ResponseId, StoredAnswer,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Everything needed to run one form version: its questions (with choices)
/// and its branching rules.
#[derive(Debug, Clone, PartialEq)]
pub struct FormVersionBundle {
    pub version: FormVersion,
    pub questions: Vec<Question>,
    pub rules: Vec<BranchingRule>,
}

impl FormVersionBundle {
    #[must_use]
    pub fn into_catalog(self) -> Catalog {
        Catalog::new(self.questions, self.rules)
    }
}

/// Loader for forms and their question catalogs.
#[async_trait]
pub trait FormRepository: Send + Sync {
    /// Fetch a published form by slug.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures; a missing or unpublished
    /// form is `Ok(None)`.
    async fn published_form_by_slug(&self, slug: &str) -> Result<Option<Form>, StorageError>;

    /// Load a version with its questions and rules.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the version does not exist.
    async fn load_version(&self, id: &FormVersionId) -> Result<FormVersionBundle, StorageError>;

    /// Insert or replace a form together with one of its versions.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the bundle belongs to another form.
    async fn install_form(&self, form: &Form, bundle: &FormVersionBundle)
        -> Result<(), StorageError>;
}

/// Lifecycle of response sessions.
#[async_trait]
pub trait ResponseRepository: Send + Sync {
    /// Create a new draft response, recording any UTM parameters it was
    /// opened with.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the response cannot be stored.
    async fn create_response(
        &self,
        form_version_id: &FormVersionId,
        user_id: &str,
        utm: Option<FieldMap>,
        started_at: DateTime<Utc>,
    ) -> Result<Response, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for unknown responses.
    async fn get_response(&self, id: ResponseId) -> Result<Response, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for unknown responses.
    async fn update_progress(&self, id: ResponseId, progress_pct: u8) -> Result<(), StorageError>;

    /// Mark completed at 100% progress.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for unknown responses.
    async fn complete_response(
        &self,
        id: ResponseId,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for unknown responses.
    async fn abandon_response(&self, id: ResponseId) -> Result<(), StorageError>;

    /// Answers saved so far, for resuming a session.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn answers_for_response(&self, id: ResponseId)
        -> Result<Vec<StoredAnswer>, StorageError>;
}

/// Durable store for answers, consumed by the answer cache.
#[async_trait]
pub trait AnswerPersistence: Send + Sync {
    /// Upsert every `(question_id, value)` pair for the response as one unit.
    ///
    /// Saving the same pair twice leaves the same state behind.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the batch was not stored; partial success is
    /// not reported.
    async fn save_answers_batch(
        &self,
        response_id: ResponseId,
        answers: &[StoredAnswer],
    ) -> Result<(), StorageError>;
}

#[derive(Default)]
struct MemoryState {
    forms: HashMap<FormId, Form>,
    versions: HashMap<FormVersionId, FormVersionBundle>,
    responses: HashMap<ResponseId, Response>,
    answers: HashMap<ResponseId, Vec<StoredAnswer>>,
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut MemoryState) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        f(&mut guard)
    }

    fn with_response(
        &self,
        id: ResponseId,
        f: impl FnOnce(&mut Response),
    ) -> Result<(), StorageError> {
        self.with_state(|state| {
            let response = state.responses.get_mut(&id).ok_or(StorageError::NotFound)?;
            f(response);
            Ok(())
        })
    }
}

#[async_trait]
impl FormRepository for InMemoryRepository {
    async fn published_form_by_slug(&self, slug: &str) -> Result<Option<Form>, StorageError> {
        self.with_state(|state| {
            Ok(state
                .forms
                .values()
                .find(|f| f.slug == slug && f.is_published())
                .cloned())
        })
    }

    async fn load_version(&self, id: &FormVersionId) -> Result<FormVersionBundle, StorageError> {
        self.with_state(|state| state.versions.get(id).cloned().ok_or(StorageError::NotFound))
    }

    async fn install_form(
        &self,
        form: &Form,
        bundle: &FormVersionBundle,
    ) -> Result<(), StorageError> {
        if bundle.version.form_id != form.id {
            return Err(StorageError::Conflict);
        }
        self.with_state(|state| {
            state.forms.insert(form.id.clone(), form.clone());
            state
                .versions
                .insert(bundle.version.id.clone(), bundle.clone());
            Ok(())
        })
    }
}

#[async_trait]
impl ResponseRepository for InMemoryRepository {
    async fn create_response(
        &self,
        form_version_id: &FormVersionId,
        user_id: &str,
        utm: Option<FieldMap>,
        started_at: DateTime<Utc>,
    ) -> Result<Response, StorageError> {
        let response = Response::start(form_version_id.clone(), user_id, started_at)
            .with_utm(utm.unwrap_or_default());
        self.with_state(|state| {
            state.responses.insert(response.id, response.clone());
            Ok(response)
        })
    }

    async fn get_response(&self, id: ResponseId) -> Result<Response, StorageError> {
        self.with_state(|state| state.responses.get(&id).cloned().ok_or(StorageError::NotFound))
    }

    async fn update_progress(&self, id: ResponseId, progress_pct: u8) -> Result<(), StorageError> {
        self.with_response(id, |r| r.progress_pct = progress_pct.min(100))
    }

    async fn complete_response(
        &self,
        id: ResponseId,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.with_response(id, |r| r.complete(completed_at))
    }

    async fn abandon_response(&self, id: ResponseId) -> Result<(), StorageError> {
        self.with_response(id, Response::abandon)
    }

    async fn answers_for_response(
        &self,
        id: ResponseId,
    ) -> Result<Vec<StoredAnswer>, StorageError> {
        self.with_state(|state| Ok(state.answers.get(&id).cloned().unwrap_or_default()))
    }
}

#[async_trait]
impl AnswerPersistence for InMemoryRepository {
    async fn save_answers_batch(
        &self,
        response_id: ResponseId,
        answers: &[StoredAnswer],
    ) -> Result<(), StorageError> {
        self.with_state(|state| {
            if !state.responses.contains_key(&response_id) {
                return Err(StorageError::NotFound);
            }
            let saved = state.answers.entry(response_id).or_default();
            for answer in answers {
                match saved.iter_mut().find(|s| s.question_id == answer.question_id) {
                    Some(existing) => existing.value = answer.value.clone(),
                    None => saved.push(answer.clone()),
                }
            }
            Ok(())
        })
    }
}

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub forms: Arc<dyn FormRepository>,
    pub responses: Arc<dyn ResponseRepository>,
    pub answers: Arc<dyn AnswerPersistence>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let forms: Arc<dyn FormRepository> = Arc::new(repo.clone());
        let responses: Arc<dyn ResponseRepository> = Arc::new(repo.clone());
        let answers: Arc<dyn AnswerPersistence> = Arc::new(repo);
        Self {
            forms,
            responses,
            answers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::model::{AnswerValue, FormStatus, QuestionId, QuestionType};
    use flow_core::time::fixed_now;

    fn bundle(form_id: &str) -> (Form, FormVersionBundle) {
        let mut form = Form::new(form_id, "demo", "Demo", FormStatus::Published).unwrap();
        form.active_version_id = Some(FormVersionId::from("v1"));
        let bundle = FormVersionBundle {
            version: FormVersion {
                id: FormVersionId::from("v1"),
                form_id: FormId::from(form_id),
                version: 1,
                label: "v1".into(),
            },
            questions: vec![
                Question::new("q1", "name", "Name", QuestionType::ShortText, true, 1).unwrap(),
            ],
            rules: vec![],
        };
        (form, bundle)
    }

    #[tokio::test]
    async fn installs_and_loads_published_form() {
        let repo = InMemoryRepository::new();
        let (form, bundle) = bundle("f1");
        repo.install_form(&form, &bundle).await.unwrap();

        let found = repo.published_form_by_slug("demo").await.unwrap().unwrap();
        assert_eq!(found.id, form.id);
        let loaded = repo.load_version(&FormVersionId::from("v1")).await.unwrap();
        assert_eq!(loaded.questions[0].id(), &QuestionId::from("q1"));
        assert!(repo.published_form_by_slug("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_bundle_of_other_form() {
        let repo = InMemoryRepository::new();
        let (form, _) = bundle("f1");
        let (_, foreign) = bundle("f2");
        let err = repo.install_form(&form, &foreign).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
    }

    #[tokio::test]
    async fn batch_save_overwrites_by_question() {
        let repo = InMemoryRepository::new();
        let response = repo
            .create_response(&FormVersionId::from("v1"), "u1", None, fixed_now())
            .await
            .unwrap();

        repo.save_answers_batch(response.id, &[StoredAnswer::new("q1", "first")])
            .await
            .unwrap();
        repo.save_answers_batch(
            response.id,
            &[StoredAnswer::new("q1", "second"), StoredAnswer::new("q2", 5)],
        )
        .await
        .unwrap();

        let saved = repo.answers_for_response(response.id).await.unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].value, AnswerValue::from("second"));
    }

    #[tokio::test]
    async fn batch_save_for_unknown_response_fails() {
        let repo = InMemoryRepository::new();
        let err = repo
            .save_answers_batch(ResponseId::generate(), &[StoredAnswer::new("q1", "x")])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
    }

    #[tokio::test]
    async fn response_lifecycle_updates() {
        let repo = InMemoryRepository::new();
        let response = repo
            .create_response(&FormVersionId::from("v1"), "u1", None, fixed_now())
            .await
            .unwrap();
        repo.update_progress(response.id, 50).await.unwrap();
        assert_eq!(repo.get_response(response.id).await.unwrap().progress_pct, 50);

        repo.complete_response(response.id, fixed_now()).await.unwrap();
        let done = repo.get_response(response.id).await.unwrap();
        assert_eq!(done.progress_pct, 100);
        assert!(!done.is_open());
    }
}
