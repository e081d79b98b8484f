use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::ExamQuestion;
use crate::db::types::QuestionKind;

pub(crate) const COLUMNS: &str = "\
    id, exam_id, kind, prompt, order_index, max_marks, options, \
    correct_option, expected_answer, language, starter_code, created_at, updated_at";

pub(crate) async fn find_by_id(
    pool: &PgPool,
    id: &str,
) -> Result<Option<ExamQuestion>, sqlx::Error> {
    sqlx::query_as::<_, ExamQuestion>(&format!(
        "SELECT {COLUMNS} FROM exam_questions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn list_by_exam(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Vec<ExamQuestion>, sqlx::Error> {
    sqlx::query_as::<_, ExamQuestion>(&format!(
        "SELECT {COLUMNS} FROM exam_questions WHERE exam_id = $1 ORDER BY order_index, created_at"
    ))
    .bind(exam_id)
    .fetch_all(pool)
    .await
}

pub(crate) struct CreateQuestion<'a> {
    pub(crate) id: &'a str,
    pub(crate) exam_id: &'a str,
    pub(crate) kind: QuestionKind,
    pub(crate) prompt: &'a str,
    pub(crate) order_index: i32,
    pub(crate) max_marks: f64,
    pub(crate) options: Vec<String>,
    pub(crate) correct_option: Option<i32>,
    pub(crate) expected_answer: Option<&'a str>,
    pub(crate) language: Option<&'a str>,
    pub(crate) starter_code: Option<&'a str>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

pub(crate) async fn create(
    pool: &PgPool,
    question: CreateQuestion<'_>,
) -> Result<ExamQuestion, sqlx::Error> {
    sqlx::query_as::<_, ExamQuestion>(&format!(
        "INSERT INTO exam_questions (
            id, exam_id, kind, prompt, order_index, max_marks, options,
            correct_option, expected_answer, language, starter_code, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
        RETURNING {COLUMNS}"
    ))
    .bind(question.id)
    .bind(question.exam_id)
    .bind(question.kind)
    .bind(question.prompt)
    .bind(question.order_index)
    .bind(question.max_marks)
    .bind(Json(question.options))
    .bind(question.correct_option)
    .bind(question.expected_answer)
    .bind(question.language)
    .bind(question.starter_code)
    .bind(question.created_at)
    .bind(question.updated_at)
    .fetch_one(pool)
    .await
}

pub(crate) async fn delete_by_id(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
    let result =
        sqlx::query("DELETE FROM exam_questions WHERE id = $1").bind(id).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn count_by_exam(pool: &PgPool, exam_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM exam_questions WHERE exam_id = $1")
        .bind(exam_id)
        .fetch_one(pool)
        .await
}
