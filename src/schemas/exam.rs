use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use time::{
    format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime,
    PrimitiveDateTime,
};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{Exam, ExamInvitation, ExamQuestion};
use crate::db::types::{ExamAccessMode, QuestionKind};
use crate::services::exam_status::ExamStatusView;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ExamCreate {
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(alias = "startTime", deserialize_with = "deserialize_offset_datetime_flexible")]
    pub(crate) start_time: OffsetDateTime,
    #[serde(alias = "endTime", deserialize_with = "deserialize_offset_datetime_flexible")]
    pub(crate) end_time: OffsetDateTime,
    #[serde(alias = "durationMinutes")]
    #[validate(range(min = 1, message = "duration_minutes must be positive"))]
    pub(crate) duration_minutes: i32,
    #[serde(default = "default_access_mode")]
    #[serde(alias = "accessMode")]
    pub(crate) access_mode: ExamAccessMode,
    #[serde(default)]
    #[serde(alias = "requireWebcam")]
    pub(crate) require_webcam: bool,
    #[serde(default = "default_max_violations")]
    #[serde(alias = "maxViolations")]
    #[validate(range(min = 1, message = "max_violations must be positive"))]
    pub(crate) max_violations: i32,
}

/// Question payloads are discriminated by `kind`; each variant carries only
/// the fields that exist for it.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum QuestionCreate {
    Mcq {
        prompt: String,
        #[serde(default)]
        order_index: i32,
        max_marks: f64,
        options: Vec<String>,
        correct_option: i32,
    },
    ShortAnswer {
        prompt: String,
        #[serde(default)]
        order_index: i32,
        max_marks: f64,
        #[serde(default)]
        expected_answer: Option<String>,
    },
    Coding {
        prompt: String,
        #[serde(default)]
        order_index: i32,
        max_marks: f64,
        language: String,
        #[serde(default)]
        starter_code: Option<String>,
    },
}

impl QuestionCreate {
    pub(crate) fn kind(&self) -> QuestionKind {
        match self {
            Self::Mcq { .. } => QuestionKind::Mcq,
            Self::ShortAnswer { .. } => QuestionKind::ShortAnswer,
            Self::Coding { .. } => QuestionKind::Coding,
        }
    }

    pub(crate) fn max_marks(&self) -> f64 {
        match self {
            Self::Mcq { max_marks, .. }
            | Self::ShortAnswer { max_marks, .. }
            | Self::Coding { max_marks, .. } => *max_marks,
        }
    }

    pub(crate) fn validate_payload(&self) -> Result<(), String> {
        if self.max_marks() <= 0.0 || !self.max_marks().is_finite() {
            return Err("max_marks must be positive".to_string());
        }

        match self {
            Self::Mcq { options, correct_option, .. } => {
                if options.len() < 2 {
                    return Err("mcq questions need at least two options".to_string());
                }
                let index = *correct_option;
                if index < 0 || index as usize >= options.len() {
                    return Err("correct_option is out of range".to_string());
                }
            }
            Self::Coding { language, .. } => {
                if language.trim().is_empty() {
                    return Err("language must not be empty".to_string());
                }
            }
            Self::ShortAnswer { .. } => {}
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct InvitationCreate {
    #[validate(email(message = "email must be a valid address"))]
    pub(crate) email: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ExamResponse {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) description: Option<String>,
    pub(crate) start_time: String,
    pub(crate) end_time: String,
    pub(crate) duration_minutes: i32,
    pub(crate) access_mode: ExamAccessMode,
    pub(crate) require_webcam: bool,
    pub(crate) max_violations: i32,
    pub(crate) is_published: bool,
    pub(crate) published_at: Option<String>,
    pub(crate) created_by: String,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
    /// Present only in the creation response of a `code`-mode exam; the
    /// cleartext is never recoverable afterwards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) access_code: Option<String>,
}

impl ExamResponse {
    pub(crate) fn from_db(exam: Exam) -> Self {
        Self {
            id: exam.id,
            title: exam.title,
            description: exam.description,
            start_time: format_primitive(exam.start_time),
            end_time: format_primitive(exam.end_time),
            duration_minutes: exam.duration_minutes,
            access_mode: exam.access_mode,
            require_webcam: exam.require_webcam,
            max_violations: exam.max_violations,
            is_published: exam.is_published,
            published_at: exam.published_at.map(format_primitive),
            created_by: exam.created_by,
            created_at: format_primitive(exam.created_at),
            updated_at: format_primitive(exam.updated_at),
            access_code: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct QuestionResponse {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) kind: QuestionKind,
    pub(crate) prompt: String,
    pub(crate) order_index: i32,
    pub(crate) max_marks: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) options: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) correct_option: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) expected_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) starter_code: Option<String>,
    pub(crate) created_at: String,
}

impl QuestionResponse {
    /// Full view for the authoring teacher.
    pub(crate) fn from_db(question: ExamQuestion) -> Self {
        Self {
            id: question.id,
            exam_id: question.exam_id,
            kind: question.kind,
            prompt: question.prompt,
            order_index: question.order_index,
            max_marks: question.max_marks,
            options: Some(question.options.0),
            correct_option: question.correct_option,
            expected_answer: question.expected_answer,
            language: question.language,
            starter_code: question.starter_code,
            created_at: format_primitive(question.created_at),
        }
    }

    /// Student view: answer keys are stripped.
    pub(crate) fn for_student(question: ExamQuestion) -> Self {
        let mut response = Self::from_db(question);
        response.correct_option = None;
        response.expected_answer = None;
        response
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct InvitationResponse {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) email: String,
    pub(crate) accepted_by: Option<String>,
    pub(crate) accepted_at: Option<String>,
    pub(crate) is_active: bool,
    pub(crate) created_at: String,
    /// Cleartext code, present only in the creation response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) invite_code: Option<String>,
}

impl InvitationResponse {
    pub(crate) fn from_db(invitation: ExamInvitation) -> Self {
        Self {
            id: invitation.id,
            exam_id: invitation.exam_id,
            email: invitation.email,
            accepted_by: invitation.accepted_by,
            accepted_at: invitation.accepted_at.map(format_primitive),
            is_active: invitation.is_active,
            created_at: format_primitive(invitation.created_at),
            invite_code: None,
        }
    }
}

/// Resolver output plus human-readable countdowns for the student UI.
#[derive(Debug, Serialize)]
pub(crate) struct ExamStatusResponse {
    #[serde(flatten)]
    pub(crate) status: ExamStatusView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) time_remaining_display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) time_remaining_clock: Option<String>,
}

fn default_access_mode() -> ExamAccessMode {
    ExamAccessMode::Open
}

fn default_max_violations() -> i32 {
    3
}

fn parse_offset_datetime_flexible(raw: &str) -> Option<OffsetDateTime> {
    if let Ok(value) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(value);
    }

    // Frontend's datetime-local often sends without timezone.
    if raw.len() == 16 && raw.as_bytes().get(10) == Some(&b'T') {
        let candidate = format!("{raw}:00Z");
        if let Ok(value) = OffsetDateTime::parse(&candidate, &Rfc3339) {
            return Some(value);
        }
    }

    if raw.len() == 19 && raw.as_bytes().get(10) == Some(&b'T') {
        let candidate = format!("{raw}Z");
        if let Ok(value) = OffsetDateTime::parse(&candidate, &Rfc3339) {
            return Some(value);
        }
    }

    if let Ok(value) =
        PrimitiveDateTime::parse(raw, &format_description!("[year]-[month]-[day]T[hour]:[minute]"))
    {
        return Some(value.assume_utc());
    }
    if let Ok(value) = PrimitiveDateTime::parse(
        raw,
        &format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    ) {
        return Some(value.assume_utc());
    }

    None
}

fn deserialize_offset_datetime_flexible<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_offset_datetime_flexible(&raw)
        .ok_or_else(|| D::Error::custom(format!("invalid datetime: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_create_is_tagged_by_kind() {
        let raw = serde_json::json!({
            "kind": "mcq",
            "prompt": "2 + 2 = ?",
            "max_marks": 5.0,
            "options": ["3", "4", "5"],
            "correct_option": 1
        });
        let question: QuestionCreate = serde_json::from_value(raw).expect("mcq");
        assert_eq!(question.kind(), QuestionKind::Mcq);
        assert!(question.validate_payload().is_ok());
    }

    #[test]
    fn mcq_correct_option_must_be_in_range() {
        let question = QuestionCreate::Mcq {
            prompt: "pick one".to_string(),
            order_index: 0,
            max_marks: 5.0,
            options: vec!["a".to_string(), "b".to_string()],
            correct_option: 2,
        };
        assert!(question.validate_payload().is_err());
    }

    #[test]
    fn coding_requires_a_language() {
        let question = QuestionCreate::Coding {
            prompt: "reverse a list".to_string(),
            order_index: 0,
            max_marks: 10.0,
            language: "  ".to_string(),
            starter_code: None,
        };
        assert!(question.validate_payload().is_err());
    }

    #[test]
    fn datetime_local_without_timezone_parses_as_utc() {
        let parsed = parse_offset_datetime_flexible("2024-01-01T10:00").expect("datetime-local");
        assert_eq!(parsed.unix_timestamp(), 1_704_103_200);

        let parsed = parse_offset_datetime_flexible("2024-01-01T10:00:00Z").expect("rfc3339");
        assert_eq!(parsed.unix_timestamp(), 1_704_103_200);
    }
}
