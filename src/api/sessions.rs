use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::api::exams::{fetch_exam, fetch_visible_exam};
use crate::api::guards::CurrentUser;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::{Exam, ExamSession, QuestionContent, User};
use crate::db::types::{ExamAccessMode, SessionStatus};
use crate::repositories;
use crate::repositories::sessions::PgSessionStore;
use crate::schemas::grading::{AnswerResponse, GradingSnapshotResponse};
use crate::schemas::session::{
    AnswerUpsertRequest, JoinRequest, SessionResponse, ViolationResponse,
};
use crate::services::exam_status::{resolve_status, ExamPhase, ExamTiming, SessionSnapshot};
use crate::services::grading;
use crate::services::invite_codes;
use crate::services::session_lifecycle::SessionLifecycle;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/exams/:exam_id/join", post(join_exam))
        .route("/exams/:exam_id/start", post(start_session))
        .route("/exams/:exam_id/submit", post(submit_session))
        .route("/:session_id/answers/:question_id", put(upsert_answer))
        .route("/:session_id/violations", post(report_violation))
        .route("/:session_id/result", get(session_result))
}

fn session_store(state: &AppState) -> PgSessionStore {
    PgSessionStore::new(state.db().clone())
}

async fn join_exam(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    payload: Option<Json<JoinRequest>>,
) -> Result<Json<SessionResponse>, ApiError> {
    let exam = fetch_visible_exam(&state, &user, &exam_id).await?;

    if !exam.is_published {
        return Err(ApiError::BadRequest("Exam is not available".to_string()));
    }

    let Json(join) = payload.unwrap_or_default();
    check_enrollment(&state, &exam, &user, &join).await?;

    let store = session_store(&state);
    let lifecycle =
        SessionLifecycle::new(&store, state.settings().exam().submit_grace_seconds);
    let session = lifecycle.join_exam(&exam, &user.id, primitive_now_utc()).await?;

    Ok(Json(SessionResponse::from_db(session)))
}

async fn start_session(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<SessionResponse>, ApiError> {
    let exam = fetch_visible_exam(&state, &user, &exam_id).await?;

    let active = repositories::sessions::count_in_progress(state.db())
        .await
        .map_err(|e| ApiError::internal(e, "Failed to count running sessions"))?;
    if active >= state.settings().exam().max_concurrent_sessions as i64 {
        return Err(ApiError::ServiceUnavailable(
            "Exam service is temporarily at capacity. Try again in a few minutes.".to_string(),
        ));
    }

    let store = session_store(&state);
    let lifecycle =
        SessionLifecycle::new(&store, state.settings().exam().submit_grace_seconds);
    let session = lifecycle.start_session(&exam, &user.id, primitive_now_utc()).await?;

    Ok(Json(SessionResponse::from_db(session)))
}

async fn submit_session(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<SessionResponse>, ApiError> {
    let exam = fetch_visible_exam(&state, &user, &exam_id).await?;

    let current =
        repositories::sessions::find_by_exam_and_student(state.db(), &exam_id, &user.id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to fetch session"))?
            .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?;

    // Freeze the score the aggregator reports right now: auto-graded MCQs
    // count, manually graded questions contribute what they have so far.
    let marks = repositories::answers::list_marks_for_session(state.db(), &current.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch marks"))?;
    let total_score = grading::aggregate(&marks).total_score;

    let store = session_store(&state);
    let lifecycle =
        SessionLifecycle::new(&store, state.settings().exam().submit_grace_seconds);
    let session =
        lifecycle.submit_session(&exam, &user.id, primitive_now_utc(), Some(total_score)).await?;

    Ok(Json(SessionResponse::from_db(session)))
}

async fn upsert_answer(
    Path((session_id, question_id)): Path<(String, String)>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<AnswerUpsertRequest>,
) -> Result<Json<AnswerResponse>, ApiError> {
    let session = fetch_owned_session(&state, &user, &session_id).await?;
    let exam = fetch_exam(&state, &session.exam_id).await?;

    require_running(&exam, &session)?;

    let question = repositories::questions::find_by_id(state.db(), &question_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch question"))?
        .ok_or_else(|| ApiError::NotFound("Question not found".to_string()))?;

    if question.exam_id != exam.id {
        return Err(ApiError::BadRequest("Question does not belong to this exam".to_string()));
    }

    // MCQ answers are graded on the spot; the other kinds wait for a teacher.
    let content = question.content().map_err(ApiError::Internal)?;
    let marks_obtained = match content {
        QuestionContent::Mcq { correct_option, .. } => Some(grading::auto_grade_mcq(
            correct_option,
            payload.selected_option,
            question.max_marks,
        )),
        QuestionContent::ShortAnswer { .. } | QuestionContent::Coding { .. } => None,
    };

    let answer = repositories::answers::upsert(
        state.db(),
        repositories::answers::UpsertAnswer {
            id: &Uuid::new_v4().to_string(),
            session_id: &session.id,
            question_id: &question.id,
            selected_option: payload.selected_option,
            answer_text: payload.answer_text.as_deref(),
            marks_obtained,
            now: primitive_now_utc(),
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to save answer"))?;

    Ok(Json(AnswerResponse::from_db(answer)))
}

async fn report_violation(
    Path(session_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<ViolationResponse>, ApiError> {
    let session = fetch_owned_session(&state, &user, &session_id).await?;
    let exam = fetch_exam(&state, &session.exam_id).await?;

    let store = session_store(&state);
    let lifecycle =
        SessionLifecycle::new(&store, state.settings().exam().submit_grace_seconds);
    let outcome = lifecycle.record_violation(&exam, &user.id, primitive_now_utc()).await?;

    if outcome.terminated {
        tracing::warn!(
            session_id = %session.id,
            student_id = %user.id,
            violations = outcome.violation_count,
            "Session terminated after exceeding the violation limit"
        );
    }

    Ok(Json(ViolationResponse {
        violation_count: outcome.violation_count,
        terminated: outcome.terminated,
    }))
}

async fn session_result(
    Path(session_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<GradingSnapshotResponse>, ApiError> {
    let session = fetch_owned_session(&state, &user, &session_id).await?;

    let marks = repositories::answers::list_marks_for_session(state.db(), &session.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch marks"))?;
    let answers = repositories::answers::list_by_session(state.db(), &session.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch answers"))?;

    Ok(Json(GradingSnapshotResponse {
        session_id: session.id,
        snapshot: grading::aggregate(&marks),
        answers: answers.into_iter().map(AnswerResponse::from_db).collect(),
    }))
}

async fn fetch_owned_session(
    state: &AppState,
    user: &User,
    session_id: &str,
) -> Result<ExamSession, ApiError> {
    let session = repositories::sessions::find_by_id(state.db(), session_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch session"))?
        .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?;

    if session.student_id != user.id {
        return Err(ApiError::Forbidden("Access denied"));
    }

    Ok(session)
}

/// Answers are only accepted while the attempt is running and inside both
/// the exam window and the per-session deadline, re-derived on every call.
fn require_running(exam: &Exam, session: &ExamSession) -> Result<(), ApiError> {
    if session.status != SessionStatus::InProgress {
        return Err(ApiError::BadRequest("Session is not active".to_string()));
    }

    let view = resolve_status(
        &ExamTiming::of(exam),
        Some(&SessionSnapshot::of(session)),
        primitive_now_utc(),
    );
    if view.status != ExamPhase::Active {
        return Err(ApiError::BadRequest("Session has expired".to_string()));
    }

    Ok(())
}

async fn check_enrollment(
    state: &AppState,
    exam: &Exam,
    user: &User,
    join: &JoinRequest,
) -> Result<(), ApiError> {
    match exam.access_mode {
        ExamAccessMode::Open => Ok(()),
        ExamAccessMode::Code => {
            let Some(code) = join.access_code.as_deref() else {
                return Err(ApiError::Forbidden("This exam requires an access code"));
            };
            let expected = exam
                .access_code_hash
                .as_deref()
                .ok_or_else(|| ApiError::Internal("Exam has no access code".to_string()))?;

            if invite_codes::hash_code(code.trim()) != expected {
                return Err(ApiError::Forbidden("Invalid access code"));
            }
            Ok(())
        }
        ExamAccessMode::Invitation => {
            let accepted = repositories::invitations::find_accepted_by_student(
                state.db(),
                &exam.id,
                &user.id,
            )
            .await
            .map_err(|e| ApiError::internal(e, "Failed to check invitation"))?;

            if accepted.is_some() {
                return Ok(());
            }

            let Some(code) = join.invite_code.as_deref() else {
                return Err(ApiError::Forbidden("This exam requires an invitation"));
            };

            let invitation = repositories::invitations::find_active_by_hash(
                state.db(),
                &exam.id,
                &invite_codes::hash_code(code.trim()),
            )
            .await
            .map_err(|e| ApiError::internal(e, "Failed to look up invitation"))?
            .ok_or(ApiError::Forbidden("Invalid invitation code"))?;

            if !invitation.email.eq_ignore_ascii_case(&user.email) {
                return Err(ApiError::Forbidden("Invitation was issued to a different address"));
            }
            if invitation.accepted_by.as_deref().is_some_and(|id| id != user.id) {
                return Err(ApiError::Forbidden("Invitation has already been used"));
            }

            repositories::invitations::mark_accepted(
                state.db(),
                &invitation.id,
                &user.id,
                primitive_now_utc(),
            )
            .await
            .map_err(|e| ApiError::internal(e, "Failed to accept invitation"))?;

            Ok(())
        }
    }
}
