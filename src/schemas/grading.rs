use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::QuestionAnswer;
use crate::services::grading::GradingSnapshot;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct MarksUpdateRequest {
    #[serde(alias = "marksObtained")]
    #[validate(range(min = 0.0, message = "marks_obtained must be non-negative"))]
    pub(crate) marks_obtained: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct AnswerResponse {
    pub(crate) id: String,
    pub(crate) session_id: String,
    pub(crate) question_id: String,
    pub(crate) selected_option: Option<i32>,
    pub(crate) answer_text: Option<String>,
    pub(crate) marks_obtained: Option<f64>,
    pub(crate) graded: bool,
    pub(crate) graded_by: Option<String>,
    pub(crate) graded_at: Option<String>,
    pub(crate) updated_at: String,
}

impl AnswerResponse {
    pub(crate) fn from_db(answer: QuestionAnswer) -> Self {
        Self {
            id: answer.id,
            session_id: answer.session_id,
            question_id: answer.question_id,
            selected_option: answer.selected_option,
            answer_text: answer.answer_text,
            // Graded is derived, never toggled: a mark has been assigned.
            graded: answer.marks_obtained.is_some(),
            marks_obtained: answer.marks_obtained,
            graded_by: answer.graded_by,
            graded_at: answer.graded_at.map(format_primitive),
            updated_at: format_primitive(answer.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct GradingSnapshotResponse {
    pub(crate) session_id: String,
    #[serde(flatten)]
    pub(crate) snapshot: GradingSnapshot,
    pub(crate) answers: Vec<AnswerResponse>,
}
