use std::sync::{Arc, Mutex, PoisonError};

use flow_core::model::{AnswerValue, QuestionUid};
use serde::Serialize;

/// Aggregate save indicators across every record in a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveState {
    pub is_saving: bool,
    pub has_unsaved: bool,
}

/// Handle returned by observer registration; pass it to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

pub(crate) type AnswerListener = dyn Fn(&QuestionUid, &AnswerValue) + Send + Sync;
pub(crate) type SaveStateListener = dyn Fn(SaveState) + Send + Sync;

/// Registered callbacks for one event. Callers snapshot the list and invoke
/// it after releasing every other lock.
pub(crate) struct Subscribers<F: ?Sized> {
    entries: Mutex<Vec<(SubscriptionId, Arc<F>)>>,
}

impl<F: ?Sized> Default for Subscribers<F> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<F: ?Sized> Subscribers<F> {
    pub(crate) fn add(&self, id: SubscriptionId, listener: Arc<F>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<F>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
