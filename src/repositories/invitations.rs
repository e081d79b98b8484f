use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::ExamInvitation;

pub(crate) const COLUMNS: &str = "\
    id, exam_id, email, code_hash, invited_by, accepted_by, accepted_at, is_active, created_at";

pub(crate) struct CreateInvitation<'a> {
    pub(crate) id: &'a str,
    pub(crate) exam_id: &'a str,
    pub(crate) email: &'a str,
    pub(crate) code_hash: &'a str,
    pub(crate) invited_by: &'a str,
    pub(crate) created_at: PrimitiveDateTime,
}

pub(crate) async fn create(
    pool: &PgPool,
    invitation: CreateInvitation<'_>,
) -> Result<ExamInvitation, sqlx::Error> {
    sqlx::query_as::<_, ExamInvitation>(&format!(
        "INSERT INTO exam_invitations (
            id, exam_id, email, code_hash, invited_by, is_active, created_at
        ) VALUES ($1,$2,$3,$4,$5,TRUE,$6)
        ON CONFLICT (exam_id, email) DO UPDATE SET
            code_hash = EXCLUDED.code_hash,
            invited_by = EXCLUDED.invited_by,
            is_active = TRUE
        RETURNING {COLUMNS}"
    ))
    .bind(invitation.id)
    .bind(invitation.exam_id)
    .bind(invitation.email)
    .bind(invitation.code_hash)
    .bind(invitation.invited_by)
    .bind(invitation.created_at)
    .fetch_one(pool)
    .await
}

pub(crate) async fn list_by_exam(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Vec<ExamInvitation>, sqlx::Error> {
    sqlx::query_as::<_, ExamInvitation>(&format!(
        "SELECT {COLUMNS} FROM exam_invitations WHERE exam_id = $1 ORDER BY created_at"
    ))
    .bind(exam_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn find_active_by_hash(
    pool: &PgPool,
    exam_id: &str,
    code_hash: &str,
) -> Result<Option<ExamInvitation>, sqlx::Error> {
    sqlx::query_as::<_, ExamInvitation>(&format!(
        "SELECT {COLUMNS} FROM exam_invitations
         WHERE exam_id = $1 AND code_hash = $2 AND is_active = TRUE"
    ))
    .bind(exam_id)
    .bind(code_hash)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_accepted_by_student(
    pool: &PgPool,
    exam_id: &str,
    student_id: &str,
) -> Result<Option<ExamInvitation>, sqlx::Error> {
    sqlx::query_as::<_, ExamInvitation>(&format!(
        "SELECT {COLUMNS} FROM exam_invitations WHERE exam_id = $1 AND accepted_by = $2"
    ))
    .bind(exam_id)
    .bind(student_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn mark_accepted(
    pool: &PgPool,
    id: &str,
    student_id: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE exam_invitations
         SET accepted_by = $1, accepted_at = $2
         WHERE id = $3 AND accepted_by IS NULL",
    )
    .bind(student_id)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
