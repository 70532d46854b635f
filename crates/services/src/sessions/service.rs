use std::sync::Arc;

use flow_core::Clock;
use flow_core::model::{AnswerValue, ExitKey, Form, Question, QuestionUid, Response, ResponseId};
use flow_core::{NavigationEngine, NextAction};
use storage::repository::ResponseRepository;

use super::progress::FormProgress;
use crate::answers::{AnswerCache, SaveState};
use crate::error::FormSessionError;

/// Outcome of asking for the next question.
#[derive(Debug, Clone, PartialEq)]
pub enum Step<'a> {
    Question(&'a Question),
    Finished { exit_key: Option<ExitKey> },
}

/// Result of finishing a form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub response_id: ResponseId,
    pub exit_key: Option<ExitKey>,
    /// Resolved through the form's exit map.
    pub exit_label: Option<String>,
}

/// One user's pass through a form.
///
/// Every edit goes to both the navigation engine and the answer cache; the
/// cache persists it in the background.
pub struct FormSession {
    form: Form,
    response: Response,
    engine: NavigationEngine,
    cache: AnswerCache,
    responses: Arc<dyn ResponseRepository>,
    clock: Clock,
    current: Option<QuestionUid>,
    exit_key: Option<ExitKey>,
    finished: bool,
    closed: bool,
}

impl FormSession {
    pub(crate) fn new(
        form: Form,
        response: Response,
        engine: NavigationEngine,
        cache: AnswerCache,
        responses: Arc<dyn ResponseRepository>,
        clock: Clock,
    ) -> Self {
        let mut session = Self {
            form,
            response,
            engine,
            cache,
            responses,
            clock,
            current: None,
            exit_key: None,
            finished: false,
            closed: false,
        };
        session.position();
        session
    }

    /// Walk the flow from the start through already answered questions and
    /// stop at the first unanswered one.
    fn position(&mut self) {
        let mut current: Option<QuestionUid> = None;
        for _ in 0..=self.engine.catalog().len() {
            match self.engine.next_action(current.as_ref()) {
                NextAction::Question(id) => {
                    let Some(question) = self.engine.question_by_id(&id) else {
                        break;
                    };
                    let uid = question.uid().clone();
                    let answered = self.engine.answer(&uid).is_some_and(AnswerValue::is_present);
                    current = Some(uid);
                    if !answered {
                        break;
                    }
                }
                NextAction::Exit { exit_key } => {
                    if current.is_none() {
                        self.finished = true;
                        self.exit_key = exit_key;
                    }
                    break;
                }
            }
        }
        self.current = current;
    }

    #[must_use]
    pub fn form(&self) -> &Form {
        &self.form
    }

    #[must_use]
    pub fn response(&self) -> &Response {
        &self.response
    }

    #[must_use]
    pub fn response_id(&self) -> ResponseId {
        self.response.id
    }

    #[must_use]
    pub fn engine(&self) -> &NavigationEngine {
        &self.engine
    }

    #[must_use]
    pub fn cache(&self) -> &AnswerCache {
        &self.cache
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        self.current
            .as_ref()
            .and_then(|uid| self.engine.question_by_uid(uid))
    }

    #[must_use]
    pub fn current_answer(&self) -> Option<&AnswerValue> {
        self.current.as_ref().and_then(|uid| self.engine.answer(uid))
    }

    /// The flow reached an exit; see [`FormSession::exit_key`].
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[must_use]
    pub fn exit_key(&self) -> Option<&ExitKey> {
        self.exit_key.as_ref()
    }

    /// Completed or abandoned; no further edits are accepted.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<(), FormSessionError> {
        if self.closed {
            Err(FormSessionError::SessionClosed)
        } else {
            Ok(())
        }
    }

    /// Answer the current question.
    ///
    /// # Errors
    ///
    /// Returns `FormSessionError::SessionClosed` after finish or abandon and
    /// `FormSessionError::NoCurrentQuestion` when nothing is shown.
    pub fn answer(&mut self, value: impl Into<AnswerValue>) -> Result<(), FormSessionError> {
        self.ensure_open()?;
        let question = self
            .current_question()
            .ok_or(FormSessionError::NoCurrentQuestion)?;
        let uid = question.uid().clone();
        let question_id = question.id().clone();
        let value = value.into();

        self.engine.update_answer(uid.clone(), value.clone());
        self.cache.update_answer(uid, question_id, value);
        Ok(())
    }

    /// Whether "next" is allowed: optional questions always, required ones
    /// once answered.
    #[must_use]
    pub fn can_proceed(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|uid| self.engine.can_proceed(uid))
    }

    #[must_use]
    pub fn progress(&self) -> FormProgress {
        FormProgress {
            percent: self.engine.calculate_progress(self.current.as_ref()),
            answered: self.engine.answered_questions().len(),
            total: self.engine.catalog().len(),
            is_complete: self.engine.is_complete(),
        }
    }

    #[must_use]
    pub fn save_state(&self) -> SaveState {
        self.cache.save_state()
    }

    /// Flush pending answers now.
    pub async fn save(&self) -> bool {
        self.cache.save_all().await
    }

    /// Move to the next question, or to the exit chosen by the branching
    /// rules.
    ///
    /// # Errors
    ///
    /// Returns `FormSessionError::AnswerRequired` when the current question
    /// is required and unanswered, `FormSessionError::SessionClosed` after
    /// finish or abandon.
    pub async fn next(&mut self) -> Result<Step<'_>, FormSessionError> {
        self.ensure_open()?;
        if let Some(uid) = &self.current
            && !self.engine.can_proceed(uid)
        {
            return Err(FormSessionError::AnswerRequired(uid.clone()));
        }

        let action = self.engine.next_action(self.current.as_ref());
        let target = action
            .next_question_id()
            .and_then(|id| self.engine.question_by_id(id))
            .map(|question| question.uid().clone());

        match target {
            Some(uid) => {
                tracing::debug!(
                    response_id = %self.response.id,
                    from = ?self.current,
                    to = %uid,
                    "Advancing to next question"
                );
                self.current = Some(uid);
                self.finished = false;
                self.exit_key = None;
                self.report_progress().await;
                let question = self
                    .current_question()
                    .ok_or(FormSessionError::NoCurrentQuestion)?;
                Ok(Step::Question(question))
            }
            None => {
                let exit_key = action.exit_key().cloned();
                tracing::debug!(
                    response_id = %self.response.id,
                    from = ?self.current,
                    exit_key = ?exit_key,
                    "Flow reached an exit"
                );
                self.finished = true;
                self.exit_key.clone_from(&exit_key);
                Ok(Step::Finished { exit_key })
            }
        }
    }

    /// Step back to the linear predecessor of the current question.
    pub fn back(&mut self) -> Option<&Question> {
        if self.closed {
            return None;
        }
        let previous = self
            .current
            .as_ref()
            .and_then(|uid| self.engine.previous_question(uid))
            .map(|question| question.uid().clone())?;
        self.current = Some(previous);
        self.finished = false;
        self.exit_key = None;
        self.current_question()
    }

    async fn report_progress(&self) {
        let percent = self.engine.calculate_progress(self.current.as_ref());
        if let Err(err) = self.responses.update_progress(self.response.id, percent).await {
            tracing::warn!(
                response_id = %self.response.id,
                percent,
                error = %err,
                "Progress update failed"
            );
        }
    }

    /// Persist the last edits, mark the response completed and tear down
    /// the cache.
    ///
    /// The cache is only destroyed once the response is completed, so a
    /// failed call leaves the session fully usable and can be retried.
    ///
    /// # Errors
    ///
    /// Returns `FormSessionError::SaveFailed` when the final flush is
    /// rejected and `FormSessionError::Storage` if the response cannot be
    /// completed.
    pub async fn finish(
        &mut self,
        exit_key: Option<ExitKey>,
    ) -> Result<Completion, FormSessionError> {
        self.ensure_open()?;
        if !self.cache.save_all().await {
            return Err(FormSessionError::SaveFailed);
        }

        let completed_at = self.clock.now();
        self.responses
            .complete_response(self.response.id, completed_at)
            .await?;
        self.response.complete(completed_at);
        self.closed = true;
        if !self.cache.save_and_destroy().await {
            tracing::warn!(
                response_id = %self.response.id,
                "Final flush after completion failed"
            );
        }

        tracing::info!(
            response_id = %self.response.id,
            form = %self.form.slug,
            exit_key = ?exit_key,
            "Form completed"
        );

        Ok(Completion {
            response_id: self.response.id,
            exit_label: self.form.exit_label(exit_key.as_ref()).map(str::to_owned),
            exit_key,
        })
    }

    /// Mark the response abandoned and drop unsaved edits.
    ///
    /// # Errors
    ///
    /// Returns `FormSessionError::Storage` if the response cannot be updated;
    /// the session and its pending edits are left as they were.
    pub async fn abandon(&mut self) -> Result<(), FormSessionError> {
        self.ensure_open()?;
        self.responses.abandon_response(self.response.id).await?;
        self.response.abandon();
        self.closed = true;
        self.cache.destroy();
        tracing::info!(
            response_id = %self.response.id,
            form = %self.form.slug,
            "Form abandoned"
        );
        Ok(())
    }
}

impl std::fmt::Debug for FormSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormSession")
            .field("form", &self.form)
            .field("response", &self.response)
            .field("engine", &self.engine)
            .field("clock", &self.clock)
            .field("current", &self.current)
            .field("exit_key", &self.exit_key)
            .field("finished", &self.finished)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
