use chrono::{DateTime, Utc};
use flow_core::model::{
    FieldMap, FormVersionId, Response, ResponseId, ResponseStatus, StoredAnswer,
};
use sqlx::sqlite::SqliteQueryResult;

use super::{
    SqliteRepository,
    mapping::{AnswerCell, answer_cell, conn, map_answer_row, map_response_row, ser},
};
use crate::repository::{AnswerPersistence, ResponseRepository, StorageError};

fn affected_one(result: SqliteQueryResult) -> Result<(), StorageError> {
    if result.rows_affected() == 0 {
        Err(StorageError::NotFound)
    } else {
        Ok(())
    }
}

#[async_trait::async_trait]
impl ResponseRepository for SqliteRepository {
    async fn create_response(
        &self,
        form_version_id: &FormVersionId,
        user_id: &str,
        utm: Option<FieldMap>,
        started_at: DateTime<Utc>,
    ) -> Result<Response, StorageError> {
        let response = Response::start(form_version_id.clone(), user_id, started_at)
            .with_utm(utm.unwrap_or_default());
        let utm_json = serde_json::to_string(&response.utm).map_err(ser)?;
        let hidden_json = serde_json::to_string(&response.hidden).map_err(ser)?;

        sqlx::query(
            r"
                INSERT INTO responses (
                    id, form_version_id, user_id, status, started_at, completed_at,
                    progress_pct, utm_json, hidden_json
                )
                VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, ?8)
            ",
        )
        .bind(response.id.to_string())
        .bind(response.form_version_id.as_str())
        .bind(&response.user_id)
        .bind(response.status.as_str())
        .bind(response.started_at)
        .bind(i64::from(response.progress_pct))
        .bind(utm_json)
        .bind(hidden_json)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(response)
    }

    async fn get_response(&self, id: ResponseId) -> Result<Response, StorageError> {
        let row = sqlx::query(
            r"
                SELECT id, form_version_id, user_id, status, started_at, completed_at,
                    progress_pct, utm_json, hidden_json
                FROM responses
                WHERE id = ?1
            ",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?
        .ok_or(StorageError::NotFound)?;

        map_response_row(&row)
    }

    async fn update_progress(&self, id: ResponseId, progress_pct: u8) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE responses SET progress_pct = ?2 WHERE id = ?1")
            .bind(id.to_string())
            .bind(i64::from(progress_pct.min(100)))
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        affected_one(result)
    }

    async fn complete_response(
        &self,
        id: ResponseId,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            r"
                UPDATE responses
                SET status = ?2, completed_at = ?3, progress_pct = 100
                WHERE id = ?1
            ",
        )
        .bind(id.to_string())
        .bind(ResponseStatus::Completed.as_str())
        .bind(completed_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        affected_one(result)
    }

    async fn abandon_response(&self, id: ResponseId) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE responses SET status = ?2 WHERE id = ?1")
            .bind(id.to_string())
            .bind(ResponseStatus::Abandoned.as_str())
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        affected_one(result)
    }

    async fn answers_for_response(
        &self,
        id: ResponseId,
    ) -> Result<Vec<StoredAnswer>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT question_id, value, typeof(value) AS value_type
                FROM response_items
                WHERE response_id = ?1
                ORDER BY updated_at ASC, question_id ASC
            ",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_answer_row).collect()
    }
}

#[async_trait::async_trait]
impl AnswerPersistence for SqliteRepository {
    async fn save_answers_batch(
        &self,
        response_id: ResponseId,
        answers: &[StoredAnswer],
    ) -> Result<(), StorageError> {
        let response_key = response_id.to_string();
        let cells = answers
            .iter()
            .map(|answer| answer_cell(&answer.value))
            .collect::<Result<Vec<_>, _>>()?;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let exists = sqlx::query("SELECT 1 FROM responses WHERE id = ?1")
            .bind(&response_key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(conn)?;
        if exists.is_none() {
            return Err(StorageError::NotFound);
        }

        let now = self.clock.now();
        for (answer, cell) in answers.iter().zip(cells) {
            let query = sqlx::query(
                r"
                    INSERT INTO response_items (response_id, question_id, value, updated_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(response_id, question_id) DO UPDATE SET
                        value = excluded.value,
                        updated_at = excluded.updated_at
                ",
            )
            .bind(&response_key)
            .bind(answer.question_id.as_str());
            let query = match cell {
                AnswerCell::Real(n) => query.bind(n),
                AnswerCell::Text(text) => query.bind(text),
            };
            query.bind(now).execute(&mut *tx).await.map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        tracing::debug!(
            response_id = %response_id,
            count = answers.len(),
            "answer batch stored"
        );
        Ok(())
    }
}
