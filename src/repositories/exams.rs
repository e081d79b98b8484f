use sqlx::{PgPool, Postgres, QueryBuilder};
use time::PrimitiveDateTime;

use crate::db::models::Exam;
use crate::db::types::ExamAccessMode;

pub(crate) const COLUMNS: &str = "\
    id, title, description, start_time, end_time, duration_minutes, \
    access_mode, access_code_hash, require_webcam, max_violations, \
    is_published, published_at, created_by, created_at, updated_at";

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!("SELECT {COLUMNS} FROM exams WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) struct CreateExam<'a> {
    pub(crate) id: &'a str,
    pub(crate) title: &'a str,
    pub(crate) description: Option<&'a str>,
    pub(crate) start_time: PrimitiveDateTime,
    pub(crate) end_time: PrimitiveDateTime,
    pub(crate) duration_minutes: i32,
    pub(crate) access_mode: ExamAccessMode,
    pub(crate) access_code_hash: Option<&'a str>,
    pub(crate) require_webcam: bool,
    pub(crate) max_violations: i32,
    pub(crate) created_by: &'a str,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

pub(crate) async fn create(pool: &PgPool, exam: CreateExam<'_>) -> Result<Exam, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!(
        "INSERT INTO exams (
            id, title, description, start_time, end_time, duration_minutes,
            access_mode, access_code_hash, require_webcam, max_violations,
            is_published, created_by, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,FALSE,$11,$12,$13)
        RETURNING {COLUMNS}"
    ))
    .bind(exam.id)
    .bind(exam.title)
    .bind(exam.description)
    .bind(exam.start_time)
    .bind(exam.end_time)
    .bind(exam.duration_minutes)
    .bind(exam.access_mode)
    .bind(exam.access_code_hash)
    .bind(exam.require_webcam)
    .bind(exam.max_violations)
    .bind(exam.created_by)
    .bind(exam.created_at)
    .bind(exam.updated_at)
    .fetch_one(pool)
    .await
}

pub(crate) async fn publish(
    pool: &PgPool,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE exams SET is_published = TRUE, published_at = $1, updated_at = $1
         WHERE id = $2 AND is_published = FALSE",
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn delete_by_id(pool: &PgPool, id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM exams WHERE id = $1").bind(id).execute(pool).await?;
    Ok(())
}

pub(crate) async fn list(
    pool: &PgPool,
    created_by: Option<&str>,
    published_only: bool,
    skip: i64,
    limit: i64,
) -> Result<Vec<Exam>, sqlx::Error> {
    let mut builder =
        QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM exams WHERE TRUE"));

    if let Some(created_by) = created_by {
        builder.push(" AND created_by = ");
        builder.push_bind(created_by);
    }

    if published_only {
        builder.push(" AND is_published = TRUE");
    }

    builder.push(" ORDER BY start_time DESC OFFSET ");
    builder.push_bind(skip.max(0));
    builder.push(" LIMIT ");
    builder.push_bind(limit.clamp(1, 1000));

    builder.build_query_as::<Exam>().fetch_all(pool).await
}

pub(crate) async fn count(
    pool: &PgPool,
    created_by: Option<&str>,
    published_only: bool,
) -> Result<i64, sqlx::Error> {
    let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM exams WHERE TRUE");

    if let Some(created_by) = created_by {
        builder.push(" AND created_by = ");
        builder.push_bind(created_by);
    }

    if published_only {
        builder.push(" AND is_published = TRUE");
    }

    builder.build_query_scalar::<i64>().fetch_one(pool).await
}
