use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use flow_core::Clock;
use flow_core::model::{AnswerValue, QuestionId, QuestionUid, ResponseId, StoredAnswer};
use storage::repository::AnswerPersistence;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::time::{Instant, MissedTickBehavior};

use super::config::AutosaveConfig;
use super::events::{AnswerListener, SaveState, SaveStateListener, SubscriptionId, Subscribers};
use super::record::AnswerRecord;

#[derive(Default)]
struct CacheState {
    records: HashMap<QuestionUid, AnswerRecord>,
    revision: u64,
    destroyed: bool,
}

impl CacheState {
    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn save_state(&self) -> SaveState {
        SaveState {
            is_saving: self.records.values().any(|r| r.is_saving),
            has_unsaved: self.records.values().any(|r| r.is_dirty),
        }
    }
}

struct Inner {
    response_id: ResponseId,
    persistence: Arc<dyn AnswerPersistence>,
    clock: Clock,
    state: Mutex<CacheState>,
    // Held for the whole of a batch request; at most one is ever in flight.
    flush_gate: AsyncMutex<()>,
    next_subscription: AtomicU64,
    answer_listeners: Subscribers<AnswerListener>,
    save_state_listeners: Subscribers<SaveStateListener>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_save_state(&self, state: SaveState) {
        for listener in self.save_state_listeners.snapshot() {
            listener(state);
        }
    }

    async fn save_all(&self) -> bool {
        let _gate = self.flush_gate.lock().await;
        self.flush().await
    }

    async fn autosave_tick(&self) {
        let Ok(_gate) = self.flush_gate.try_lock() else {
            tracing::trace!(response_id = %self.response_id, "Save in flight, skipping tick");
            return;
        };
        if !self.state().save_state().has_unsaved {
            return;
        }
        self.flush().await;
    }

    /// Sends every dirty record as one batch. The caller holds the flush gate.
    async fn flush(&self) -> bool {
        let (snapshot, batch, pending) = {
            let mut state = self.state();
            if state.destroyed {
                return true;
            }
            let mut snapshot = Vec::new();
            let mut batch = Vec::new();
            for record in state.records.values_mut().filter(|r| r.is_dirty) {
                record.is_saving = true;
                snapshot.push((record.uid.clone(), record.revision()));
                batch.push(StoredAnswer::new(
                    record.question_id.clone(),
                    record.value.clone(),
                ));
            }
            if batch.is_empty() {
                return true;
            }
            (snapshot, batch, state.save_state())
        };
        self.notify_save_state(pending);

        let result = self
            .persistence
            .save_answers_batch(self.response_id, &batch)
            .await;
        let saved_at = self.clock.now();

        let settled = {
            let mut state = self.state();
            if state.destroyed {
                tracing::debug!(
                    response_id = %self.response_id,
                    "Cache destroyed while a batch was in flight"
                );
                return result.is_ok();
            }
            for (uid, revision) in &snapshot {
                let Some(record) = state.records.get_mut(uid) else {
                    continue;
                };
                match &result {
                    Ok(()) => record.mark_saved(*revision, saved_at),
                    Err(err) => record.mark_failed(&err.to_string()),
                }
            }
            state.save_state()
        };

        match &result {
            Ok(()) => tracing::info!(
                response_id = %self.response_id,
                count = batch.len(),
                still_dirty = settled.has_unsaved,
                "Saved answer batch"
            ),
            Err(err) => tracing::error!(
                response_id = %self.response_id,
                count = batch.len(),
                error = %err,
                "Answer batch failed; will retry"
            ),
        }
        self.notify_save_state(settled);
        result.is_ok()
    }
}

async fn run_autosave(inner: Weak<Inner>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.autosave_tick().await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!("Autosave task stopped");
}

/// Authoritative in-session copy of a response's answers.
///
/// Edits land here first and are flushed to the `AnswerPersistence` in
/// batches, either by the background autosave task or by an explicit
/// [`AnswerCache::save_all`]. Dropping the cache stops the autosave task
/// without waiting for it.
pub struct AnswerCache {
    inner: Arc<Inner>,
    config: AutosaveConfig,
    shutdown: watch::Sender<bool>,
}

impl AnswerCache {
    /// Build a cache for one response. When autosave is enabled the flush
    /// task is spawned on the current tokio runtime.
    #[must_use]
    pub fn new(
        response_id: ResponseId,
        config: AutosaveConfig,
        persistence: Arc<dyn AnswerPersistence>,
        clock: Clock,
    ) -> Self {
        let inner = Arc::new(Inner {
            response_id,
            persistence,
            clock,
            state: Mutex::new(CacheState::default()),
            flush_gate: AsyncMutex::new(()),
            next_subscription: AtomicU64::new(1),
            answer_listeners: Subscribers::default(),
            save_state_listeners: Subscribers::default(),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);

        if let Some(period) = config.interval() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(run_autosave(Arc::downgrade(&inner), period, shutdown_rx));
                }
                Err(_) => tracing::warn!(
                    response_id = %response_id,
                    "No tokio runtime available; autosave disabled"
                ),
            }
        }

        Self {
            inner,
            config,
            shutdown,
        }
    }

    #[must_use]
    pub fn response_id(&self) -> ResponseId {
        self.inner.response_id
    }

    #[must_use]
    pub fn config(&self) -> AutosaveConfig {
        self.config
    }

    /// Load previously saved answers as clean records.
    pub fn initialize_answers<I>(&self, existing: I)
    where
        I: IntoIterator<Item = (QuestionUid, QuestionId, AnswerValue)>,
    {
        let now = self.inner.clock.now();
        let settled = {
            let mut state = self.inner.state();
            if state.destroyed {
                return;
            }
            for (uid, question_id, value) in existing {
                let revision = state.next_revision();
                state.records.insert(
                    uid.clone(),
                    AnswerRecord::clean(uid, question_id, value, now, revision),
                );
            }
            state.save_state()
        };
        self.inner.notify_save_state(settled);
    }

    /// Record a local edit. The answer-change observers run before this
    /// returns.
    pub fn update_answer(&self, uid: QuestionUid, question_id: QuestionId, value: AnswerValue) {
        let settled = {
            let mut state = self.inner.state();
            if state.destroyed {
                tracing::warn!(
                    response_id = %self.inner.response_id,
                    uid = %uid,
                    "Ignoring answer update on a destroyed cache"
                );
                return;
            }
            let revision = state.next_revision();
            state
                .records
                .entry(uid.clone())
                .and_modify(|record| record.overwrite(question_id.clone(), value.clone(), revision))
                .or_insert_with(|| {
                    AnswerRecord::dirty(uid.clone(), question_id, value.clone(), revision)
                });
            state.save_state()
        };

        for listener in self.inner.answer_listeners.snapshot() {
            listener(&uid, &value);
        }
        self.inner.notify_save_state(settled);
    }

    #[must_use]
    pub fn answer(&self, uid: &QuestionUid) -> Option<AnswerValue> {
        self.inner
            .state()
            .records
            .get(uid)
            .map(|record| record.value.clone())
    }

    #[must_use]
    pub fn record(&self, uid: &QuestionUid) -> Option<AnswerRecord> {
        self.inner.state().records.get(uid).cloned()
    }

    #[must_use]
    pub fn all_answers(&self) -> HashMap<QuestionUid, AnswerValue> {
        self.inner
            .state()
            .records
            .iter()
            .map(|(uid, record)| (uid.clone(), record.value.clone()))
            .collect()
    }

    #[must_use]
    pub fn unsaved_answers(&self) -> Vec<AnswerRecord> {
        self.inner
            .state()
            .records
            .values()
            .filter(|record| record.is_dirty)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn save_state(&self) -> SaveState {
        self.inner.state().save_state()
    }

    #[must_use]
    pub fn has_unsaved_changes(&self) -> bool {
        self.save_state().has_unsaved
    }

    #[must_use]
    pub fn is_saving(&self) -> bool {
        self.save_state().is_saving
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.state().destroyed
    }

    fn next_subscription(&self) -> SubscriptionId {
        SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed))
    }

    pub fn on_answer_change<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&QuestionUid, &AnswerValue) + Send + Sync + 'static,
    {
        let id = self.next_subscription();
        self.inner.answer_listeners.add(id, Arc::new(listener));
        id
    }

    pub fn on_save_state_change<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(SaveState) + Send + Sync + 'static,
    {
        let id = self.next_subscription();
        self.inner.save_state_listeners.add(id, Arc::new(listener));
        id
    }

    /// Returns `false` if the id was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.answer_listeners.remove(id) || self.inner.save_state_listeners.remove(id)
    }

    /// Flush every dirty record now.
    ///
    /// Waits for an in-flight batch first, so two requests never overlap.
    /// Returns `false` when the store rejected the batch; the records stay
    /// dirty and carry the error text. Nothing to send counts as success.
    pub async fn save_all(&self) -> bool {
        self.inner.save_all().await
    }

    /// Final flush, then [`AnswerCache::destroy`].
    pub async fn save_and_destroy(&self) -> bool {
        let saved = self.inner.save_all().await;
        self.destroy();
        saved
    }

    /// Stop autosave, drop every record and detach observers. Idempotent.
    ///
    /// A batch already in flight is not cancelled; its outcome is discarded.
    pub fn destroy(&self) {
        self.shutdown.send_replace(true);
        let was_destroyed = {
            let mut state = self.inner.state();
            let was_destroyed = state.destroyed;
            state.destroyed = true;
            state.records.clear();
            was_destroyed
        };
        self.inner.answer_listeners.clear();
        self.inner.save_state_listeners.clear();
        if !was_destroyed {
            tracing::debug!(response_id = %self.inner.response_id, "Answer cache destroyed");
        }
    }
}

impl Drop for AnswerCache {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}
