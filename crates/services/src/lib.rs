#![forbid(unsafe_code)]

pub mod answers;
pub mod error;
pub mod sessions;

pub use flow_core::Clock;

pub use answers::{AnswerCache, AnswerRecord, AutosaveConfig, SaveState, SubscriptionId};
pub use error::FormSessionError;
pub use sessions::{Completion, FormProgress, FormSession, FormSessionService, Step};
