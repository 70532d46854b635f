use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs the versioned schema migrations.
///
/// Version 1 holds the form catalog (forms, versions, questions, choices,
/// branching rules) and the response side (responses, response items).
#[allow(clippy::too_many_lines)]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if is_applied(pool, 1).await? {
        return Ok(());
    }

    let mut tx = pool.begin().await?;

    let statements = [
        r"
            CREATE TABLE IF NOT EXISTS forms (
                id TEXT PRIMARY KEY,
                slug TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL CHECK (status IN ('draft', 'published', 'archived')),
                exit_map TEXT NOT NULL DEFAULT '{}',
                active_version_id TEXT
            );
        ",
        r"
            CREATE TABLE IF NOT EXISTS form_versions (
                id TEXT PRIMARY KEY,
                form_id TEXT NOT NULL,
                version INTEGER NOT NULL CHECK (version >= 0),
                label TEXT NOT NULL,
                FOREIGN KEY (form_id) REFERENCES forms(id) ON DELETE CASCADE
            );
        ",
        r"
            CREATE TABLE IF NOT EXISTS questions (
                id TEXT PRIMARY KEY,
                form_version_id TEXT NOT NULL,
                uid TEXT NOT NULL,
                label TEXT NOT NULL,
                type TEXT NOT NULL,
                required INTEGER NOT NULL CHECK (required IN (0, 1)),
                sort_order INTEGER NOT NULL,
                settings TEXT NOT NULL DEFAULT 'null',
                archived INTEGER NOT NULL DEFAULT 0 CHECK (archived IN (0, 1)),
                UNIQUE (form_version_id, uid),
                FOREIGN KEY (form_version_id) REFERENCES form_versions(id) ON DELETE CASCADE
            );
        ",
        r"
            CREATE TABLE IF NOT EXISTS question_choices (
                id TEXT PRIMARY KEY,
                question_id TEXT NOT NULL,
                label TEXT NOT NULL,
                value TEXT NOT NULL,
                sort_order INTEGER NOT NULL,
                is_default INTEGER NOT NULL DEFAULT 0 CHECK (is_default IN (0, 1)),
                FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE
            );
        ",
        r"
            CREATE TABLE IF NOT EXISTS branching_rules (
                id TEXT PRIMARY KEY,
                form_version_id TEXT NOT NULL,
                question_id TEXT NOT NULL,
                operator TEXT NOT NULL,
                value TEXT NOT NULL DEFAULT 'null',
                target_question_id TEXT,
                exit_key TEXT,
                sort_order INTEGER NOT NULL,
                FOREIGN KEY (form_version_id) REFERENCES form_versions(id) ON DELETE CASCADE
            );
        ",
        r"
            CREATE TABLE IF NOT EXISTS responses (
                id TEXT PRIMARY KEY,
                form_version_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('draft', 'completed', 'abandoned')),
                started_at TEXT NOT NULL,
                completed_at TEXT,
                progress_pct INTEGER NOT NULL CHECK (progress_pct BETWEEN 0 AND 100),
                utm_json TEXT NOT NULL DEFAULT '{}',
                hidden_json TEXT NOT NULL DEFAULT '{}'
            );
        ",
        r"
            CREATE TABLE IF NOT EXISTS response_items (
                response_id TEXT NOT NULL,
                question_id TEXT NOT NULL,
                value NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (response_id, question_id),
                FOREIGN KEY (response_id) REFERENCES responses(id) ON DELETE CASCADE
            );
        ",
        r"
            CREATE INDEX IF NOT EXISTS idx_questions_version_order
                ON questions (form_version_id, sort_order);
        ",
        r"
            CREATE INDEX IF NOT EXISTS idx_rules_version_order
                ON branching_rules (form_version_id, sort_order);
        ",
        r"
            CREATE INDEX IF NOT EXISTS idx_choices_question_order
                ON question_choices (question_id, sort_order);
        ",
    ];

    for statement in statements {
        sqlx::query(statement).execute(&mut *tx).await?;
    }

    sqlx::query(
        r"
            INSERT INTO schema_migrations (version, applied_at)
            VALUES (?1, ?2)
            ON CONFLICT(version) DO NOTHING
        ",
    )
    .bind(1_i64)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(())
}
