use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::exams::fetch_exam;
use crate::api::guards::{require_exam_owner, CurrentUser};
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::repositories;
use crate::schemas::grading::{AnswerResponse, GradingSnapshotResponse, MarksUpdateRequest};
use crate::services::grading;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/answers/:answer_id/marks", put(set_marks))
        .route("/sessions/:session_id", get(session_grading))
}

/// Manual grading. Assigning marks is what flips an answer to graded, and
/// re-grading simply assigns again; there is no lock on a grade.
async fn set_marks(
    Path(answer_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<MarksUpdateRequest>,
) -> Result<Json<AnswerResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let answer = repositories::answers::find_by_id(state.db(), &answer_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch answer"))?
        .ok_or_else(|| ApiError::NotFound("Answer not found".to_string()))?;

    let session = repositories::sessions::find_by_id(state.db(), &answer.session_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch session"))?
        .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?;

    let exam = fetch_exam(&state, &session.exam_id).await?;
    require_exam_owner(&user, &exam)?;

    let question = repositories::questions::find_by_id(state.db(), &answer.question_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch question"))?
        .ok_or_else(|| ApiError::NotFound("Question not found".to_string()))?;

    let marks = grading::validate_marks(payload.marks_obtained, question.max_marks)
        .map_err(ApiError::BadRequest)?;

    let updated =
        repositories::answers::set_marks(state.db(), &answer_id, marks, &user.id, primitive_now_utc())
            .await
            .map_err(|e| ApiError::internal(e, "Failed to save marks"))?
            .ok_or_else(|| ApiError::NotFound("Answer not found".to_string()))?;

    Ok(Json(AnswerResponse::from_db(updated)))
}

async fn session_grading(
    Path(session_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<GradingSnapshotResponse>, ApiError> {
    let session = repositories::sessions::find_by_id(state.db(), &session_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch session"))?
        .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?;

    let exam = fetch_exam(&state, &session.exam_id).await?;
    require_exam_owner(&user, &exam)?;

    let marks = repositories::answers::list_marks_for_session(state.db(), &session_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch marks"))?;
    let answers = repositories::answers::list_by_session(state.db(), &session_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch answers"))?;

    Ok(Json(GradingSnapshotResponse {
        session_id: session.id,
        snapshot: grading::aggregate(&marks),
        answers: answers.into_iter().map(AnswerResponse::from_db).collect(),
    }))
}
