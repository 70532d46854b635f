use std::collections::HashMap;

use chrono::{DateTime, Utc};
use flow_core::model::{
    AnswerValue, BranchingRule, Choice, ExitKey, FieldMap, Form, FormId, FormStatus, FormVersion,
    FormVersionId, Question, QuestionId, QuestionType, Response, ResponseId, ResponseStatus,
    RuleOperator, StoredAnswer,
};
use serde_json::Value;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn bool_from_i64(field: &'static str, v: i64) -> Result<bool, StorageError> {
    match v {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(StorageError::Serialization(format!(
            "invalid {field} flag: {other}"
        ))),
    }
}

fn i32_from_i64(field: &'static str, v: i64) -> Result<i32, StorageError> {
    i32::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn map_form_row(row: &SqliteRow) -> Result<Form, StorageError> {
    let status: String = row.try_get("status").map_err(ser)?;
    let exit_map: String = row.try_get("exit_map").map_err(ser)?;

    let mut form = Form::new(
        FormId::new(row.try_get::<String, _>("id").map_err(ser)?),
        row.try_get::<String, _>("slug").map_err(ser)?,
        row.try_get::<String, _>("title").map_err(ser)?,
        FormStatus::parse(&status).map_err(ser)?,
    )
    .map_err(ser)?;
    form.description = row.try_get("description").map_err(ser)?;
    form.exit_map = serde_json::from_str::<HashMap<String, String>>(&exit_map).map_err(ser)?;
    form.active_version_id = row
        .try_get::<Option<String>, _>("active_version_id")
        .map_err(ser)?
        .map(FormVersionId::new);
    Ok(form)
}

pub(crate) fn map_version_row(row: &SqliteRow) -> Result<FormVersion, StorageError> {
    let version: i64 = row.try_get("version").map_err(ser)?;
    Ok(FormVersion {
        id: FormVersionId::new(row.try_get::<String, _>("id").map_err(ser)?),
        form_id: FormId::new(row.try_get::<String, _>("form_id").map_err(ser)?),
        version: u32::try_from(version)
            .map_err(|_| StorageError::Serialization(format!("invalid version: {version}")))?,
        label: row.try_get("label").map_err(ser)?,
    })
}

/// Maps a choice row, returning the owning question id alongside it.
pub(crate) fn map_choice_row(row: &SqliteRow) -> Result<(QuestionId, Choice), StorageError> {
    let question_id = QuestionId::new(row.try_get::<String, _>("question_id").map_err(ser)?);
    let choice = Choice {
        id: row.try_get("id").map_err(ser)?,
        label: row.try_get("label").map_err(ser)?,
        value: row.try_get("value").map_err(ser)?,
        order: i32_from_i64("sort_order", row.try_get("sort_order").map_err(ser)?)?,
        is_default: bool_from_i64("is_default", row.try_get("is_default").map_err(ser)?)?,
    };
    Ok((question_id, choice))
}

pub(crate) fn map_question_row(
    row: &SqliteRow,
    choices: &mut HashMap<QuestionId, Vec<Choice>>,
) -> Result<Question, StorageError> {
    let id = QuestionId::new(row.try_get::<String, _>("id").map_err(ser)?);
    let kind: String = row.try_get("type").map_err(ser)?;
    let settings: String = row.try_get("settings").map_err(ser)?;

    let question = Question::new(
        id.clone(),
        row.try_get::<String, _>("uid").map_err(ser)?,
        row.try_get::<String, _>("label").map_err(ser)?,
        QuestionType::parse(&kind).map_err(ser)?,
        bool_from_i64("required", row.try_get("required").map_err(ser)?)?,
        i32_from_i64("sort_order", row.try_get("sort_order").map_err(ser)?)?,
    )
    .map_err(ser)?
    .with_form_version(FormVersionId::new(
        row.try_get::<String, _>("form_version_id").map_err(ser)?,
    ))
    .with_settings(serde_json::from_str(&settings).map_err(ser)?)
    .with_archived(bool_from_i64("archived", row.try_get("archived").map_err(ser)?)?)
    .with_choices(choices.remove(&id).unwrap_or_default());

    Ok(question)
}

pub(crate) fn map_rule_row(row: &SqliteRow) -> Result<BranchingRule, StorageError> {
    let operator: String = row.try_get("operator").map_err(ser)?;
    let value: String = row.try_get("value").map_err(ser)?;

    let mut rule = BranchingRule::new(
        QuestionId::new(row.try_get::<String, _>("question_id").map_err(ser)?),
        RuleOperator::parse(&operator)
            .ok_or_else(|| StorageError::Serialization(format!("invalid operator: {operator}")))?,
        serde_json::from_str(&value).map_err(ser)?,
        i32_from_i64("sort_order", row.try_get("sort_order").map_err(ser)?)?,
    );
    rule.id = Some(row.try_get("id").map_err(ser)?);
    rule.target_question_id = row
        .try_get::<Option<String>, _>("target_question_id")
        .map_err(ser)?
        .map(QuestionId::new);
    rule.exit_key = row
        .try_get::<Option<String>, _>("exit_key")
        .map_err(ser)?
        .map(ExitKey::new);
    Ok(rule)
}

pub(crate) fn map_response_row(row: &SqliteRow) -> Result<Response, StorageError> {
    let id: String = row.try_get("id").map_err(ser)?;
    let status: String = row.try_get("status").map_err(ser)?;
    let progress: i64 = row.try_get("progress_pct").map_err(ser)?;
    let utm: String = row.try_get("utm_json").map_err(ser)?;
    let hidden: String = row.try_get("hidden_json").map_err(ser)?;

    Ok(Response {
        id: id.parse::<ResponseId>().map_err(ser)?,
        form_version_id: FormVersionId::new(
            row.try_get::<String, _>("form_version_id").map_err(ser)?,
        ),
        user_id: row.try_get("user_id").map_err(ser)?,
        status: ResponseStatus::parse(&status).map_err(ser)?,
        started_at: row.try_get::<DateTime<Utc>, _>("started_at").map_err(ser)?,
        completed_at: row.try_get("completed_at").map_err(ser)?,
        progress_pct: u8::try_from(progress)
            .ok()
            .filter(|p| *p <= 100)
            .ok_or_else(|| StorageError::Serialization(format!("invalid progress: {progress}")))?,
        utm: serde_json::from_str::<FieldMap>(&utm).map_err(ser)?,
        hidden: serde_json::from_str::<FieldMap>(&hidden).map_err(ser)?,
    })
}

/// How an answer value is written to `response_items.value`.
///
/// Numbers keep their native `REAL` storage class; text and lists are
/// stored as JSON text.
pub(crate) enum AnswerCell {
    Real(f64),
    Text(String),
}

pub(crate) fn answer_cell(value: &AnswerValue) -> Result<AnswerCell, StorageError> {
    match value.to_json().map_err(ser)? {
        Value::Number(n) => n
            .as_f64()
            .map(AnswerCell::Real)
            .ok_or_else(|| StorageError::Serialization(format!("invalid answer number: {n}"))),
        other => Ok(AnswerCell::Text(other.to_string())),
    }
}

/// Expects the `value` column alongside `typeof(value) AS value_type`.
pub(crate) fn map_answer_row(row: &SqliteRow) -> Result<StoredAnswer, StorageError> {
    let value_type: String = row.try_get("value_type").map_err(ser)?;
    let value = match value_type.as_str() {
        "real" => AnswerValue::Number(row.try_get::<f64, _>("value").map_err(ser)?),
        #[allow(clippy::cast_precision_loss)]
        "integer" => AnswerValue::Number(row.try_get::<i64, _>("value").map_err(ser)? as f64),
        _ => AnswerValue::from_stored(&row.try_get::<String, _>("value").map_err(ser)?),
    };
    Ok(StoredAnswer {
        question_id: QuestionId::new(row.try_get::<String, _>("question_id").map_err(ser)?),
        value,
    })
}

pub(crate) fn bool_to_i64(v: bool) -> i64 {
    i64::from(v)
}
