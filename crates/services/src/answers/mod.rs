//! Session answer cache: dirty tracking, coalesced batch saves and save-state
//! observers.

mod cache;
mod config;
mod events;
mod record;

pub use cache::AnswerCache;
pub use config::{AutosaveConfig, DEFAULT_AUTOSAVE_INTERVAL_MS};
pub use events::{SaveState, SubscriptionId};
pub use record::AnswerRecord;
