use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::QuestionAnswer;
use crate::services::grading::QuestionMarks;

pub(crate) const COLUMNS: &str = "\
    id, session_id, question_id, selected_option, answer_text, \
    marks_obtained, graded_by, graded_at, created_at, updated_at";

pub(crate) async fn find_by_id(
    pool: &PgPool,
    id: &str,
) -> Result<Option<QuestionAnswer>, sqlx::Error> {
    sqlx::query_as::<_, QuestionAnswer>(&format!(
        "SELECT {COLUMNS} FROM question_answers WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn list_by_session(
    pool: &PgPool,
    session_id: &str,
) -> Result<Vec<QuestionAnswer>, sqlx::Error> {
    sqlx::query_as::<_, QuestionAnswer>(&format!(
        "SELECT {COLUMNS} FROM question_answers WHERE session_id = $1 ORDER BY created_at"
    ))
    .bind(session_id)
    .fetch_all(pool)
    .await
}

pub(crate) struct UpsertAnswer<'a> {
    pub(crate) id: &'a str,
    pub(crate) session_id: &'a str,
    pub(crate) question_id: &'a str,
    pub(crate) selected_option: Option<i32>,
    pub(crate) answer_text: Option<&'a str>,
    /// MCQ answers carry their auto-grade; manual kinds stay ungraded here.
    pub(crate) marks_obtained: Option<f64>,
    pub(crate) now: PrimitiveDateTime,
}

/// One answer row per (session, question); re-answering overwrites the
/// previous response and its auto-grade.
pub(crate) async fn upsert(
    pool: &PgPool,
    answer: UpsertAnswer<'_>,
) -> Result<QuestionAnswer, sqlx::Error> {
    sqlx::query_as::<_, QuestionAnswer>(&format!(
        "INSERT INTO question_answers (
            id, session_id, question_id, selected_option, answer_text,
            marks_obtained, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$7)
        ON CONFLICT (session_id, question_id) DO UPDATE SET
            selected_option = EXCLUDED.selected_option,
            answer_text = EXCLUDED.answer_text,
            marks_obtained = EXCLUDED.marks_obtained,
            updated_at = EXCLUDED.updated_at
        RETURNING {COLUMNS}"
    ))
    .bind(answer.id)
    .bind(answer.session_id)
    .bind(answer.question_id)
    .bind(answer.selected_option)
    .bind(answer.answer_text)
    .bind(answer.marks_obtained)
    .bind(answer.now)
    .fetch_one(pool)
    .await
}

pub(crate) async fn set_marks(
    pool: &PgPool,
    id: &str,
    marks: f64,
    graded_by: &str,
    now: PrimitiveDateTime,
) -> Result<Option<QuestionAnswer>, sqlx::Error> {
    sqlx::query_as::<_, QuestionAnswer>(&format!(
        "UPDATE question_answers
         SET marks_obtained = $1, graded_by = $2, graded_at = $3, updated_at = $3
         WHERE id = $4
         RETURNING {COLUMNS}"
    ))
    .bind(marks)
    .bind(graded_by)
    .bind(now)
    .bind(id)
    .fetch_optional(pool)
    .await
}

#[derive(Debug, sqlx::FromRow)]
struct SessionMarksRow {
    max_marks: f64,
    marks_obtained: Option<f64>,
}

/// Every question of the session's exam, paired with the answer's marks
/// where one exists. Unanswered questions surface as ungraded so the
/// aggregator counts them against completion.
pub(crate) async fn list_marks_for_session(
    pool: &PgPool,
    session_id: &str,
) -> Result<Vec<QuestionMarks>, sqlx::Error> {
    let rows = sqlx::query_as::<_, SessionMarksRow>(
        "SELECT q.max_marks, a.marks_obtained
         FROM exam_questions q
         JOIN exam_sessions s ON s.exam_id = q.exam_id
         LEFT JOIN question_answers a ON a.question_id = q.id AND a.session_id = s.id
         WHERE s.id = $1
         ORDER BY q.order_index",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| QuestionMarks { max_marks: row.max_marks, marks_obtained: row.marks_obtained })
        .collect())
}
