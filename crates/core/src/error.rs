use thiserror::Error;

use crate::model::{AnswerError, FormError, QuestionError};

/// Any validation failure raised by the domain model.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Question(#[from] QuestionError),
    #[error(transparent)]
    Form(#[from] FormError),
    #[error(transparent)]
    Answer(#[from] AnswerError),
}
