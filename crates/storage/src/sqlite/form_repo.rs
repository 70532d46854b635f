use std::collections::HashMap;

use flow_core::model::{Form, FormVersionId};

use super::{
    SqliteRepository,
    mapping::{
        bool_to_i64, conn, map_choice_row, map_form_row, map_question_row, map_rule_row,
        map_version_row, ser,
    },
};
use crate::repository::{FormRepository, FormVersionBundle, StorageError};

#[async_trait::async_trait]
impl FormRepository for SqliteRepository {
    async fn published_form_by_slug(&self, slug: &str) -> Result<Option<Form>, StorageError> {
        let row = sqlx::query(
            r"
                SELECT id, slug, title, description, status, exit_map, active_version_id
                FROM forms
                WHERE slug = ?1 AND status = 'published'
            ",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_form_row).transpose()
    }

    async fn load_version(&self, id: &FormVersionId) -> Result<FormVersionBundle, StorageError> {
        let version_row = sqlx::query(
            r"
                SELECT id, form_id, version, label
                FROM form_versions
                WHERE id = ?1
            ",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?
        .ok_or(StorageError::NotFound)?;
        let version = map_version_row(&version_row)?;

        let choice_rows = sqlx::query(
            r"
                SELECT c.id, c.question_id, c.label, c.value, c.sort_order, c.is_default
                FROM question_choices c
                JOIN questions q ON q.id = c.question_id
                WHERE q.form_version_id = ?1
                ORDER BY c.question_id, c.sort_order
            ",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut choices = HashMap::new();
        for row in &choice_rows {
            let (question_id, choice) = map_choice_row(row)?;
            choices
                .entry(question_id)
                .or_insert_with(Vec::new)
                .push(choice);
        }

        let question_rows = sqlx::query(
            r"
                SELECT id, form_version_id, uid, label, type, required, sort_order, settings, archived
                FROM questions
                WHERE form_version_id = ?1
                ORDER BY sort_order ASC
            ",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut questions = Vec::with_capacity(question_rows.len());
        for row in &question_rows {
            questions.push(map_question_row(row, &mut choices)?);
        }

        let rule_rows = sqlx::query(
            r"
                SELECT id, question_id, operator, value, target_question_id, exit_key, sort_order
                FROM branching_rules
                WHERE form_version_id = ?1
                ORDER BY sort_order ASC
            ",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut rules = Vec::with_capacity(rule_rows.len());
        for row in &rule_rows {
            rules.push(map_rule_row(row)?);
        }

        Ok(FormVersionBundle {
            version,
            questions,
            rules,
        })
    }

    async fn install_form(
        &self,
        form: &Form,
        bundle: &FormVersionBundle,
    ) -> Result<(), StorageError> {
        if bundle.version.form_id != form.id {
            return Err(StorageError::Conflict);
        }
        let version_id = bundle.version.id.as_str();
        let exit_map = serde_json::to_string(&form.exit_map).map_err(ser)?;

        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
                INSERT INTO forms (id, slug, title, description, status, exit_map, active_version_id)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(id) DO UPDATE SET
                    slug = excluded.slug,
                    title = excluded.title,
                    description = excluded.description,
                    status = excluded.status,
                    exit_map = excluded.exit_map,
                    active_version_id = excluded.active_version_id
            ",
        )
        .bind(form.id.as_str())
        .bind(&form.slug)
        .bind(&form.title)
        .bind(form.description.as_deref())
        .bind(form.status.as_str())
        .bind(exit_map)
        .bind(form.active_version_id.as_ref().map(FormVersionId::as_str))
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        // Replacing a version drops its questions, choices and rules via cascade.
        sqlx::query("DELETE FROM form_versions WHERE id = ?1")
            .bind(version_id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        sqlx::query(
            r"
                INSERT INTO form_versions (id, form_id, version, label)
                VALUES (?1, ?2, ?3, ?4)
            ",
        )
        .bind(version_id)
        .bind(bundle.version.form_id.as_str())
        .bind(i64::from(bundle.version.version))
        .bind(&bundle.version.label)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        for question in &bundle.questions {
            let settings = serde_json::to_string(question.settings()).map_err(ser)?;
            sqlx::query(
                r"
                    INSERT INTO questions (
                        id, form_version_id, uid, label, type, required, sort_order, settings, archived
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ",
            )
            .bind(question.id().as_str())
            .bind(version_id)
            .bind(question.uid().as_str())
            .bind(question.label())
            .bind(question.kind().as_str())
            .bind(bool_to_i64(question.is_required()))
            .bind(i64::from(question.order()))
            .bind(settings)
            .bind(bool_to_i64(question.is_archived()))
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

            for choice in question.choices() {
                sqlx::query(
                    r"
                        INSERT INTO question_choices (id, question_id, label, value, sort_order, is_default)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ",
                )
                .bind(&choice.id)
                .bind(question.id().as_str())
                .bind(&choice.label)
                .bind(&choice.value)
                .bind(i64::from(choice.order))
                .bind(bool_to_i64(choice.is_default))
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
            }
        }

        for (idx, rule) in bundle.rules.iter().enumerate() {
            let id = rule
                .id
                .clone()
                .unwrap_or_else(|| format!("{version_id}-rule-{idx}"));
            let value = serde_json::to_string(&rule.value).map_err(ser)?;
            sqlx::query(
                r"
                    INSERT INTO branching_rules (
                        id, form_version_id, question_id, operator, value,
                        target_question_id, exit_key, sort_order
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ",
            )
            .bind(id)
            .bind(version_id)
            .bind(rule.question_id.as_str())
            .bind(rule.operator.as_str())
            .bind(value)
            .bind(rule.target_question_id.as_ref().map(|t| t.as_str().to_owned()))
            .bind(rule.exit_key.as_ref().map(|k| k.as_str().to_owned()))
            .bind(i64::from(rule.order))
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }
}
