mod answer;
mod catalog;
mod form;
mod ids;
mod question;
mod rule;

pub use ids::{FormId, FormVersionId, ParseIdError, QuestionId, QuestionUid, ResponseId};

pub use answer::{AnswerError, AnswerValue, StoredAnswer};
pub use catalog::Catalog;
pub use form::{FieldMap, Form, FormError, FormStatus, FormVersion, Response, ResponseStatus};
pub use question::{Choice, Question, QuestionError, QuestionType};
pub use rule::{BranchingRule, ExitKey, RuleOperator};
