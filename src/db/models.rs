use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{ExamAccessMode, QuestionKind, SessionStatus, UserRole};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct User {
    pub(crate) id: String,
    pub(crate) email: String,
    pub(crate) hashed_password: String,
    pub(crate) full_name: String,
    pub(crate) role: UserRole,
    pub(crate) is_active: bool,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Exam {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) description: Option<String>,
    pub(crate) start_time: PrimitiveDateTime,
    pub(crate) end_time: PrimitiveDateTime,
    pub(crate) duration_minutes: i32,
    pub(crate) access_mode: ExamAccessMode,
    pub(crate) access_code_hash: Option<String>,
    pub(crate) require_webcam: bool,
    pub(crate) max_violations: i32,
    pub(crate) is_published: bool,
    pub(crate) published_at: Option<PrimitiveDateTime>,
    pub(crate) created_by: String,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ExamQuestion {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) kind: QuestionKind,
    pub(crate) prompt: String,
    pub(crate) order_index: i32,
    pub(crate) max_marks: f64,
    pub(crate) options: Json<Vec<String>>,
    pub(crate) correct_option: Option<i32>,
    pub(crate) expected_answer: Option<String>,
    pub(crate) language: Option<String>,
    pub(crate) starter_code: Option<String>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

/// Per-kind question payload. The row stays flat in Postgres; this is the
/// shape the grading and rendering paths match on.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum QuestionContent {
    Mcq { options: Vec<String>, correct_option: i32 },
    ShortAnswer { expected_answer: Option<String> },
    Coding { language: String, starter_code: Option<String> },
}

impl ExamQuestion {
    pub(crate) fn content(&self) -> Result<QuestionContent, String> {
        match self.kind {
            QuestionKind::Mcq => {
                let correct_option = self
                    .correct_option
                    .ok_or_else(|| format!("mcq question {} has no correct_option", self.id))?;
                Ok(QuestionContent::Mcq { options: self.options.0.clone(), correct_option })
            }
            QuestionKind::ShortAnswer => {
                Ok(QuestionContent::ShortAnswer { expected_answer: self.expected_answer.clone() })
            }
            QuestionKind::Coding => {
                let language = self
                    .language
                    .clone()
                    .ok_or_else(|| format!("coding question {} has no language", self.id))?;
                Ok(QuestionContent::Coding { language, starter_code: self.starter_code.clone() })
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ExamSession {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) status: SessionStatus,
    pub(crate) started_at: Option<PrimitiveDateTime>,
    pub(crate) ended_at: Option<PrimitiveDateTime>,
    pub(crate) violation_count: i32,
    pub(crate) total_score: Option<f64>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct QuestionAnswer {
    pub(crate) id: String,
    pub(crate) session_id: String,
    pub(crate) question_id: String,
    pub(crate) selected_option: Option<i32>,
    pub(crate) answer_text: Option<String>,
    pub(crate) marks_obtained: Option<f64>,
    pub(crate) graded_by: Option<String>,
    pub(crate) graded_at: Option<PrimitiveDateTime>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ExamInvitation {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) email: String,
    pub(crate) code_hash: String,
    pub(crate) invited_by: String,
    pub(crate) accepted_by: Option<String>,
    pub(crate) accepted_at: Option<PrimitiveDateTime>,
    pub(crate) is_active: bool,
    pub(crate) created_at: PrimitiveDateTime,
}
