use std::sync::Arc;

use flow_core::model::{FieldMap, Form, FormVersionId, ResponseId};
use flow_core::{Clock, NavigationEngine};
use storage::repository::{AnswerPersistence, FormRepository, ResponseRepository, Storage};

use super::service::FormSession;
use crate::answers::{AnswerCache, AutosaveConfig};
use crate::error::FormSessionError;

/// Starts and resumes form sessions against the repositories.
#[derive(Clone)]
pub struct FormSessionService {
    clock: Clock,
    forms: Arc<dyn FormRepository>,
    responses: Arc<dyn ResponseRepository>,
    answers: Arc<dyn AnswerPersistence>,
    config: AutosaveConfig,
}

impl FormSessionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        forms: Arc<dyn FormRepository>,
        responses: Arc<dyn ResponseRepository>,
        answers: Arc<dyn AnswerPersistence>,
        config: AutosaveConfig,
    ) -> Self {
        Self {
            clock,
            forms,
            responses,
            answers,
            config,
        }
    }

    #[must_use]
    pub fn from_storage(clock: Clock, storage: &Storage, config: AutosaveConfig) -> Self {
        Self::new(
            clock,
            Arc::clone(&storage.forms),
            Arc::clone(&storage.responses),
            Arc::clone(&storage.answers),
            config,
        )
    }

    /// Look up a published form and its active version.
    ///
    /// # Errors
    ///
    /// Returns `FormSessionError::FormNotFound` or
    /// `FormSessionError::NoActiveVersion`, or storage failures.
    pub async fn published_form(
        &self,
        slug: &str,
    ) -> Result<(Form, FormVersionId), FormSessionError> {
        let form = self
            .forms
            .published_form_by_slug(slug)
            .await?
            .ok_or_else(|| FormSessionError::FormNotFound(slug.to_owned()))?;
        let version_id = form
            .active_version_id
            .clone()
            .ok_or_else(|| FormSessionError::NoActiveVersion(form.id.clone()))?;
        Ok((form, version_id))
    }

    /// Open a new draft response on the form's active version, positioned on
    /// the first question. `utm` is stored on the response as given.
    ///
    /// # Errors
    ///
    /// Returns `FormSessionError` when the form cannot be resolved or storage
    /// fails.
    pub async fn start_by_slug(
        &self,
        slug: &str,
        user_id: &str,
        utm: Option<FieldMap>,
    ) -> Result<FormSession, FormSessionError> {
        let (form, version_id) = self.published_form(slug).await?;
        let catalog = self.forms.load_version(&version_id).await?.into_catalog();
        let response = self
            .responses
            .create_response(&version_id, user_id, utm, self.clock.now())
            .await?;

        tracing::info!(
            response_id = %response.id,
            form = %form.slug,
            version = %version_id,
            questions = catalog.len(),
            "Form session started"
        );

        let engine = NavigationEngine::new(catalog, &[]);
        let cache = self.new_cache(response.id);
        Ok(FormSession::new(
            form,
            response,
            engine,
            cache,
            Arc::clone(&self.responses),
            self.clock,
        ))
    }

    /// Reopen a draft response with its saved answers, positioned on the
    /// first unanswered question along the branching path.
    ///
    /// # Errors
    ///
    /// Returns `FormSessionError::ResponseClosed` for completed or abandoned
    /// responses, `FormSessionError::FormMismatch` when the response was
    /// opened on another form, or storage failures.
    pub async fn resume(
        &self,
        form: Form,
        response_id: ResponseId,
    ) -> Result<FormSession, FormSessionError> {
        let response = self.responses.get_response(response_id).await?;
        if !response.is_open() {
            return Err(FormSessionError::ResponseClosed(response_id));
        }
        let bundle = self.forms.load_version(&response.form_version_id).await?;
        if bundle.version.form_id != form.id {
            return Err(FormSessionError::FormMismatch {
                form_id: form.id,
                response_id,
            });
        }
        let catalog = bundle.into_catalog();
        let stored = self.responses.answers_for_response(response_id).await?;

        let engine = NavigationEngine::new(catalog, &stored);
        let cache = self.new_cache(response.id);
        cache.initialize_answers(stored.into_iter().filter_map(|answer| {
            let uid = engine.question_by_id(&answer.question_id)?.uid().clone();
            Some((uid, answer.question_id, answer.value))
        }));

        tracing::info!(
            response_id = %response.id,
            form = %form.slug,
            restored = cache.all_answers().len(),
            "Form session resumed"
        );

        Ok(FormSession::new(
            form,
            response,
            engine,
            cache,
            Arc::clone(&self.responses),
            self.clock,
        ))
    }

    fn new_cache(&self, response_id: ResponseId) -> AnswerCache {
        AnswerCache::new(response_id, self.config, Arc::clone(&self.answers), self.clock)
    }
}
