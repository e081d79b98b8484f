use serde::{Deserialize, Serialize};

use crate::core::time::format_primitive;
use crate::db::models::ExamSession;
use crate::db::types::SessionStatus;

/// Join requests carry whichever credential the exam's access mode needs.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct JoinRequest {
    #[serde(default)]
    #[serde(alias = "accessCode")]
    pub(crate) access_code: Option<String>,
    #[serde(default)]
    #[serde(alias = "inviteCode")]
    pub(crate) invite_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnswerUpsertRequest {
    #[serde(default)]
    #[serde(alias = "selectedOption")]
    pub(crate) selected_option: Option<i32>,
    #[serde(default)]
    #[serde(alias = "answerText")]
    pub(crate) answer_text: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionResponse {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) status: SessionStatus,
    pub(crate) started_at: Option<String>,
    pub(crate) ended_at: Option<String>,
    pub(crate) violation_count: i32,
    pub(crate) total_score: Option<f64>,
    pub(crate) created_at: String,
}

impl SessionResponse {
    pub(crate) fn from_db(session: ExamSession) -> Self {
        Self {
            id: session.id,
            exam_id: session.exam_id,
            student_id: session.student_id,
            status: session.status,
            started_at: session.started_at.map(format_primitive),
            ended_at: session.ended_at.map(format_primitive),
            violation_count: session.violation_count,
            total_score: session.total_score,
            created_at: format_primitive(session.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ViolationResponse {
    pub(crate) violation_count: i32,
    pub(crate) terminated: bool,
}
