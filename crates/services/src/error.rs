//! Shared error types for the services crate.

use thiserror::Error;

use flow_core::model::{FormId, QuestionUid, ResponseId};
use storage::repository::StorageError;

/// Errors emitted by `FormSessionService` and `FormSession`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FormSessionError {
    #[error("no published form with slug {0}")]
    FormNotFound(String),
    #[error("form {0} has no active version")]
    NoActiveVersion(FormId),
    #[error("response {0} is no longer open")]
    ResponseClosed(ResponseId),
    #[error("response {response_id} does not belong to form {form_id}")]
    FormMismatch {
        form_id: FormId,
        response_id: ResponseId,
    },
    #[error("no question is currently shown")]
    NoCurrentQuestion,
    #[error("question {0} requires an answer")]
    AnswerRequired(QuestionUid),
    #[error("session already finished")]
    SessionClosed,
    #[error("answers could not be saved")]
    SaveFailed,
    #[error(transparent)]
    Storage(#[from] StorageError),
}
