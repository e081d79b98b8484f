use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::{require_exam_owner, require_role, CurrentUser};
use crate::api::pagination::{default_limit, PaginatedResponse};
use crate::core::state::AppState;
use crate::core::time::{primitive_now_utc, to_primitive_utc};
use crate::db::models::{Exam, User};
use crate::db::types::{ExamAccessMode, UserRole};
use crate::repositories;
use crate::schemas::exam::{
    ExamCreate, ExamResponse, ExamStatusResponse, InvitationCreate, InvitationResponse,
    QuestionCreate, QuestionResponse,
};
use crate::services::exam_status::{
    format_time_remaining, format_time_remaining_short, resolve_status, ExamTiming,
    SessionSnapshot,
};
use crate::services::invite_codes;

#[derive(Debug, Deserialize)]
struct ListExamsQuery {
    #[serde(default)]
    skip: i64,
    #[serde(default = "default_limit")]
    limit: i64,
}

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_exam).get(list_exams))
        .route("/:exam_id", get(get_exam).delete(delete_exam))
        .route("/:exam_id/publish", post(publish_exam))
        .route("/:exam_id/questions", post(add_question).get(list_questions))
        .route("/:exam_id/invitations", post(create_invitation).get(list_invitations))
        .route("/:exam_id/sessions", get(list_sessions))
        .route("/:exam_id/status", get(exam_status))
}

async fn create_exam(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<ExamCreate>,
) -> Result<(StatusCode, Json<ExamResponse>), ApiError> {
    require_role(&user, UserRole::Teacher)?;

    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    if payload.end_time <= payload.start_time {
        return Err(ApiError::BadRequest("end_time must be after start_time".to_string()));
    }

    // Code-mode exams get a generated access code; only its hash survives.
    let access_code = match payload.access_mode {
        ExamAccessMode::Code => Some(invite_codes::generate_access_code()),
        ExamAccessMode::Open | ExamAccessMode::Invitation => None,
    };
    let access_code_hash = access_code.as_deref().map(invite_codes::hash_code);

    let now = primitive_now_utc();
    let exam_id = Uuid::new_v4().to_string();
    let exam = repositories::exams::create(
        state.db(),
        repositories::exams::CreateExam {
            id: &exam_id,
            title: &payload.title,
            description: payload.description.as_deref(),
            start_time: to_primitive_utc(payload.start_time),
            end_time: to_primitive_utc(payload.end_time),
            duration_minutes: payload.duration_minutes,
            access_mode: payload.access_mode,
            access_code_hash: access_code_hash.as_deref(),
            require_webcam: payload.require_webcam,
            max_violations: payload.max_violations,
            created_by: &user.id,
            created_at: now,
            updated_at: now,
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to create exam"))?;

    let mut response = ExamResponse::from_db(exam);
    response.access_code = access_code;

    Ok((StatusCode::CREATED, Json(response)))
}

async fn list_exams(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Query(query): Query<ListExamsQuery>,
) -> Result<Json<PaginatedResponse<ExamResponse>>, ApiError> {
    // Students see published exams; teachers see their own; admins see all.
    let (created_by, published_only) = match user.role {
        UserRole::Admin => (None, false),
        UserRole::Teacher => (Some(user.id.as_str()), false),
        UserRole::Student => (None, true),
    };

    let exams =
        repositories::exams::list(state.db(), created_by, published_only, query.skip, query.limit)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to list exams"))?;
    let total_count = repositories::exams::count(state.db(), created_by, published_only)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to count exams"))?;

    Ok(Json(PaginatedResponse {
        items: exams.into_iter().map(ExamResponse::from_db).collect(),
        total_count,
        skip: query.skip,
        limit: query.limit,
    }))
}

async fn get_exam(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<ExamResponse>, ApiError> {
    let exam = fetch_visible_exam(&state, &user, &exam_id).await?;
    Ok(Json(ExamResponse::from_db(exam)))
}

async fn publish_exam(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<ExamResponse>, ApiError> {
    let exam = fetch_exam(&state, &exam_id).await?;
    require_exam_owner(&user, &exam)?;

    let question_count = repositories::questions::count_by_exam(state.db(), &exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to count questions"))?;
    if question_count == 0 {
        return Err(ApiError::BadRequest("Cannot publish an exam without questions".to_string()));
    }

    let published = repositories::exams::publish(state.db(), &exam_id, primitive_now_utc())
        .await
        .map_err(|e| ApiError::internal(e, "Failed to publish exam"))?;
    if !published {
        return Err(ApiError::Conflict("Exam is already published".to_string()));
    }

    let exam = fetch_exam(&state, &exam_id).await?;
    Ok(Json(ExamResponse::from_db(exam)))
}

async fn delete_exam(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    let exam = fetch_exam(&state, &exam_id).await?;
    require_exam_owner(&user, &exam)?;

    if exam.is_published {
        return Err(ApiError::Conflict("Published exams cannot be deleted".to_string()));
    }

    repositories::exams::delete_by_id(state.db(), &exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to delete exam"))?;

    Ok(StatusCode::NO_CONTENT)
}

async fn add_question(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<QuestionCreate>,
) -> Result<(StatusCode, Json<QuestionResponse>), ApiError> {
    let exam = fetch_exam(&state, &exam_id).await?;
    require_exam_owner(&user, &exam)?;

    if exam.is_published {
        return Err(ApiError::Conflict(
            "Questions cannot be added to a published exam".to_string(),
        ));
    }

    payload.validate_payload().map_err(ApiError::BadRequest)?;

    let now = primitive_now_utc();
    let question_id = Uuid::new_v4().to_string();

    let question = match &payload {
        QuestionCreate::Mcq { prompt, order_index, max_marks, options, correct_option } => {
            repositories::questions::CreateQuestion {
                id: &question_id,
                exam_id: &exam_id,
                kind: payload.kind(),
                prompt,
                order_index: *order_index,
                max_marks: *max_marks,
                options: options.clone(),
                correct_option: Some(*correct_option),
                expected_answer: None,
                language: None,
                starter_code: None,
                created_at: now,
                updated_at: now,
            }
        }
        QuestionCreate::ShortAnswer { prompt, order_index, max_marks, expected_answer } => {
            repositories::questions::CreateQuestion {
                id: &question_id,
                exam_id: &exam_id,
                kind: payload.kind(),
                prompt,
                order_index: *order_index,
                max_marks: *max_marks,
                options: Vec::new(),
                correct_option: None,
                expected_answer: expected_answer.as_deref(),
                language: None,
                starter_code: None,
                created_at: now,
                updated_at: now,
            }
        }
        QuestionCreate::Coding { prompt, order_index, max_marks, language, starter_code } => {
            repositories::questions::CreateQuestion {
                id: &question_id,
                exam_id: &exam_id,
                kind: payload.kind(),
                prompt,
                order_index: *order_index,
                max_marks: *max_marks,
                options: Vec::new(),
                correct_option: None,
                expected_answer: None,
                language: Some(language.as_str()),
                starter_code: starter_code.as_deref(),
                created_at: now,
                updated_at: now,
            }
        }
    };

    let created = repositories::questions::create(state.db(), question)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to create question"))?;

    Ok((StatusCode::CREATED, Json(QuestionResponse::from_db(created))))
}

async fn list_questions(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<QuestionResponse>>, ApiError> {
    let exam = fetch_visible_exam(&state, &user, &exam_id).await?;

    let questions = repositories::questions::list_by_exam(state.db(), &exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list questions"))?;

    let is_owner = user.role == UserRole::Admin || exam.created_by == user.id;
    let items = questions
        .into_iter()
        .map(|question| {
            if is_owner {
                QuestionResponse::from_db(question)
            } else {
                QuestionResponse::for_student(question)
            }
        })
        .collect();

    Ok(Json(items))
}

async fn create_invitation(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<InvitationCreate>,
) -> Result<(StatusCode, Json<InvitationResponse>), ApiError> {
    let exam = fetch_exam(&state, &exam_id).await?;
    require_exam_owner(&user, &exam)?;

    if exam.access_mode != ExamAccessMode::Invitation {
        return Err(ApiError::BadRequest(
            "Invitations only apply to invitation-mode exams".to_string(),
        ));
    }

    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let code = invite_codes::generate_invite_code(&exam.title);
    let code_hash = invite_codes::hash_code(&code);

    let invitation = repositories::invitations::create(
        state.db(),
        repositories::invitations::CreateInvitation {
            id: &Uuid::new_v4().to_string(),
            exam_id: &exam_id,
            email: &payload.email,
            code_hash: &code_hash,
            invited_by: &user.id,
            created_at: primitive_now_utc(),
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to create invitation"))?;

    let mut response = InvitationResponse::from_db(invitation);
    response.invite_code = Some(code);

    Ok((StatusCode::CREATED, Json(response)))
}

async fn list_invitations(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<InvitationResponse>>, ApiError> {
    let exam = fetch_exam(&state, &exam_id).await?;
    require_exam_owner(&user, &exam)?;

    let invitations = repositories::invitations::list_by_exam(state.db(), &exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list invitations"))?;

    Ok(Json(invitations.into_iter().map(InvitationResponse::from_db).collect()))
}

async fn list_sessions(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<crate::schemas::session::SessionResponse>>, ApiError> {
    let exam = fetch_exam(&state, &exam_id).await?;
    require_exam_owner(&user, &exam)?;

    let sessions = repositories::sessions::list_by_exam(state.db(), &exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list sessions"))?;

    Ok(Json(
        sessions.into_iter().map(crate::schemas::session::SessionResponse::from_db).collect(),
    ))
}

/// The student-facing gate: the resolver's verdict on whether this user can
/// join or start right now, with formatted countdowns for display.
async fn exam_status(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<ExamStatusResponse>, ApiError> {
    let exam = fetch_visible_exam(&state, &user, &exam_id).await?;

    let session = repositories::sessions::find_by_exam_and_student(state.db(), &exam_id, &user.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch session"))?;

    let snapshot = session.as_ref().map(SessionSnapshot::of);
    let status = resolve_status(&ExamTiming::of(&exam), snapshot.as_ref(), primitive_now_utc());

    let countdown = status.time_remaining.or(status.time_until_start).or(status.time_until_end);
    let response = ExamStatusResponse {
        time_remaining_display: countdown.map(format_time_remaining),
        time_remaining_clock: status.time_remaining.map(format_time_remaining_short),
        status,
    };

    Ok(Json(response))
}

pub(super) async fn fetch_exam(state: &AppState, exam_id: &str) -> Result<Exam, ApiError> {
    repositories::exams::find_by_id(state.db(), exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch exam"))?
        .ok_or_else(|| ApiError::NotFound("Exam not found".to_string()))
}

/// Students only ever see published exams; owners and admins see drafts too.
pub(super) async fn fetch_visible_exam(
    state: &AppState,
    user: &User,
    exam_id: &str,
) -> Result<Exam, ApiError> {
    let exam = fetch_exam(state, exam_id).await?;

    if exam.is_published || user.role == UserRole::Admin || exam.created_by == user.id {
        return Ok(exam);
    }

    Err(ApiError::NotFound("Exam not found".to_string()))
}
