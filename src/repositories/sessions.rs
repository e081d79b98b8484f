use async_trait::async_trait;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::ExamSession;
use crate::db::types::SessionStatus;
use crate::services::session_lifecycle::{NewSession, RunningSession, SessionStore};

pub(crate) const COLUMNS: &str = "\
    id, exam_id, student_id, status, started_at, ended_at, \
    violation_count, total_score, created_at, updated_at";

pub(crate) async fn find_by_id(
    pool: &PgPool,
    id: &str,
) -> Result<Option<ExamSession>, sqlx::Error> {
    sqlx::query_as::<_, ExamSession>(&format!("SELECT {COLUMNS} FROM exam_sessions WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn find_by_exam_and_student(
    pool: &PgPool,
    exam_id: &str,
    student_id: &str,
) -> Result<Option<ExamSession>, sqlx::Error> {
    sqlx::query_as::<_, ExamSession>(&format!(
        "SELECT {COLUMNS} FROM exam_sessions WHERE exam_id = $1 AND student_id = $2"
    ))
    .bind(exam_id)
    .bind(student_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn list_by_exam(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Vec<ExamSession>, sqlx::Error> {
    sqlx::query_as::<_, ExamSession>(&format!(
        "SELECT {COLUMNS} FROM exam_sessions WHERE exam_id = $1 ORDER BY created_at"
    ))
    .bind(exam_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn count_in_progress(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM exam_sessions WHERE status = $1")
        .bind(SessionStatus::InProgress)
        .fetch_one(pool)
        .await
}

pub(crate) async fn create_if_absent(
    pool: &PgPool,
    session: &NewSession,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO exam_sessions (
            id, exam_id, student_id, status, violation_count, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,0,$5,$5)
        ON CONFLICT (exam_id, student_id) DO NOTHING",
    )
    .bind(&session.id)
    .bind(&session.exam_id)
    .bind(&session.student_id)
    .bind(SessionStatus::NotStarted)
    .bind(session.created_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// `not_started` -> `in_progress`. The status filter makes the write a
/// compare-and-swap: a losing concurrent start changes no rows.
pub(crate) async fn mark_in_progress(
    pool: &PgPool,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE exam_sessions
         SET status = $1, started_at = $2, updated_at = $2
         WHERE id = $3 AND status = $4",
    )
    .bind(SessionStatus::InProgress)
    .bind(now)
    .bind(id)
    .bind(SessionStatus::NotStarted)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn mark_completed(
    pool: &PgPool,
    id: &str,
    now: PrimitiveDateTime,
    total_score: Option<f64>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE exam_sessions
         SET status = $1, ended_at = $2, total_score = COALESCE($3, total_score), updated_at = $2
         WHERE id = $4 AND status = $5",
    )
    .bind(SessionStatus::Completed)
    .bind(now)
    .bind(total_score)
    .bind(id)
    .bind(SessionStatus::InProgress)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn mark_terminated(
    pool: &PgPool,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE exam_sessions
         SET status = $1, ended_at = $2, updated_at = $2
         WHERE id = $3 AND status = $4",
    )
    .bind(SessionStatus::Terminated)
    .bind(now)
    .bind(id)
    .bind(SessionStatus::InProgress)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn add_violation(
    pool: &PgPool,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<i32, sqlx::Error> {
    sqlx::query_scalar(
        "UPDATE exam_sessions
         SET violation_count = violation_count + 1, updated_at = $1
         WHERE id = $2
         RETURNING violation_count",
    )
    .bind(now)
    .bind(id)
    .fetch_one(pool)
    .await
}

#[derive(Debug, sqlx::FromRow)]
struct RunningSessionRow {
    id: String,
    started_at: PrimitiveDateTime,
    duration_minutes: i32,
}

pub(crate) async fn list_in_progress_with_duration(
    pool: &PgPool,
) -> Result<Vec<RunningSession>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RunningSessionRow>(
        "SELECT s.id, s.started_at, e.duration_minutes
         FROM exam_sessions s
         JOIN exams e ON e.id = s.exam_id
         WHERE s.status = $1 AND s.started_at IS NOT NULL",
    )
    .bind(SessionStatus::InProgress)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| RunningSession {
            id: row.id,
            started_at: row.started_at,
            duration_minutes: row.duration_minutes,
        })
        .collect())
}

pub(crate) async fn complete_batch(
    pool: &PgPool,
    ids: &[String],
    now: PrimitiveDateTime,
) -> Result<u64, sqlx::Error> {
    if ids.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query(
        "UPDATE exam_sessions
         SET status = $1, ended_at = $2, updated_at = $2
         WHERE id = ANY($3) AND status = $4",
    )
    .bind(SessionStatus::Completed)
    .bind(now)
    .bind(ids)
    .bind(SessionStatus::InProgress)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Postgres-backed implementation of the lifecycle storage port.
#[derive(Clone)]
pub(crate) struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn find_for_student(
        &self,
        exam_id: &str,
        student_id: &str,
    ) -> anyhow::Result<Option<ExamSession>> {
        Ok(find_by_exam_and_student(&self.pool, exam_id, student_id).await?)
    }

    async fn insert_if_absent(&self, session: NewSession) -> anyhow::Result<bool> {
        Ok(create_if_absent(&self.pool, &session).await?)
    }

    async fn mark_in_progress(
        &self,
        session_id: &str,
        now: PrimitiveDateTime,
    ) -> anyhow::Result<bool> {
        Ok(mark_in_progress(&self.pool, session_id, now).await?)
    }

    async fn mark_completed(
        &self,
        session_id: &str,
        now: PrimitiveDateTime,
        total_score: Option<f64>,
    ) -> anyhow::Result<bool> {
        Ok(mark_completed(&self.pool, session_id, now, total_score).await?)
    }

    async fn mark_terminated(
        &self,
        session_id: &str,
        now: PrimitiveDateTime,
    ) -> anyhow::Result<bool> {
        Ok(mark_terminated(&self.pool, session_id, now).await?)
    }

    async fn add_violation(
        &self,
        session_id: &str,
        now: PrimitiveDateTime,
    ) -> anyhow::Result<i32> {
        Ok(add_violation(&self.pool, session_id, now).await?)
    }

    async fn list_in_progress(&self) -> anyhow::Result<Vec<RunningSession>> {
        Ok(list_in_progress_with_duration(&self.pool).await?)
    }

    async fn complete_batch(
        &self,
        session_ids: &[String],
        now: PrimitiveDateTime,
    ) -> anyhow::Result<u64> {
        Ok(complete_batch(&self.pool, session_ids, now).await?)
    }
}
