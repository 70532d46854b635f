use chrono::{DateTime, Utc};
use flow_core::model::{AnswerValue, QuestionId, QuestionUid};
use serde::Serialize;

/// Session copy of one answer and its save state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerRecord {
    pub uid: QuestionUid,
    pub question_id: QuestionId,
    pub value: AnswerValue,
    /// Changed locally and not yet confirmed by the store.
    pub is_dirty: bool,
    /// Part of a batch that is currently in flight.
    pub is_saving: bool,
    pub last_saved: Option<DateTime<Utc>>,
    pub error: Option<String>,
    #[serde(skip)]
    revision: u64,
}

impl AnswerRecord {
    pub(crate) fn dirty(
        uid: QuestionUid,
        question_id: QuestionId,
        value: AnswerValue,
        revision: u64,
    ) -> Self {
        Self {
            uid,
            question_id,
            value,
            is_dirty: true,
            is_saving: false,
            last_saved: None,
            error: None,
            revision,
        }
    }

    pub(crate) fn clean(
        uid: QuestionUid,
        question_id: QuestionId,
        value: AnswerValue,
        saved_at: DateTime<Utc>,
        revision: u64,
    ) -> Self {
        Self {
            is_dirty: false,
            last_saved: Some(saved_at),
            ..Self::dirty(uid, question_id, value, revision)
        }
    }

    /// Local edit. `is_saving` is left alone so an in-flight batch stays
    /// visible.
    pub(crate) fn overwrite(&mut self, question_id: QuestionId, value: AnswerValue, revision: u64) {
        self.question_id = question_id;
        self.value = value;
        self.is_dirty = true;
        self.error = None;
        self.revision = revision;
    }

    /// Bumped on every local edit; a batch only cleans records whose revision
    /// it captured.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn mark_saved(&mut self, snapshot_revision: u64, at: DateTime<Utc>) {
        self.is_saving = false;
        if self.revision == snapshot_revision {
            self.is_dirty = false;
            self.last_saved = Some(at);
            self.error = None;
        }
    }

    pub(crate) fn mark_failed(&mut self, error: &str) {
        self.is_saving = false;
        self.error = Some(error.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::time::fixed_now;

    fn record(revision: u64) -> AnswerRecord {
        AnswerRecord::dirty(
            QuestionUid::from("mood"),
            QuestionId::from("q1"),
            AnswerValue::from("ok"),
            revision,
        )
    }

    #[test]
    fn overwrite_keeps_saving_flag_and_clears_error() {
        let mut rec = record(1);
        rec.is_saving = true;
        rec.error = Some("boom".into());
        rec.overwrite(QuestionId::from("q1"), AnswerValue::from("great"), 2);
        assert!(rec.is_saving);
        assert!(rec.is_dirty);
        assert!(rec.error.is_none());
        assert_eq!(rec.revision(), 2);
    }

    #[test]
    fn stale_snapshot_does_not_clean_newer_edit() {
        let mut rec = record(1);
        rec.is_saving = true;
        rec.overwrite(QuestionId::from("q1"), AnswerValue::from("newer"), 2);
        rec.mark_saved(1, fixed_now());
        assert!(rec.is_dirty);
        assert!(!rec.is_saving);
        assert!(rec.last_saved.is_none());
    }

    #[test]
    fn failure_keeps_record_dirty() {
        let mut rec = record(1);
        rec.is_saving = true;
        rec.mark_failed("offline");
        assert!(rec.is_dirty);
        assert_eq!(rec.error.as_deref(), Some("offline"));
    }

    #[test]
    fn clean_record_is_stamped() {
        let rec = AnswerRecord::clean(
            QuestionUid::from("mood"),
            QuestionId::from("q1"),
            AnswerValue::from("ok"),
            fixed_now(),
            1,
        );
        assert!(!rec.is_dirty);
        assert_eq!(rec.last_saved, Some(fixed_now()));
    }
}
