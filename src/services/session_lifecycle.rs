use async_trait::async_trait;
use thiserror::Error;
use time::{Duration, PrimitiveDateTime};
use uuid::Uuid;

use crate::db::models::{Exam, ExamSession};
use crate::db::types::SessionStatus;
use crate::services::exam_status::{
    resolve_status, session_deadline, ExamPhase, ExamStatusView, ExamTiming, SessionSnapshot,
};

#[derive(Debug, Error)]
pub(crate) enum SessionError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    AccessDenied(&'static str),
    #[error("Session has already been started")]
    AlreadyStarted,
    #[error("Session has already been completed")]
    AlreadyCompleted,
    #[error("The exam window has closed")]
    WindowClosed,
    #[error("The exam has not opened yet")]
    NotYetOpen,
    #[error("storage failure")]
    Storage(#[source] anyhow::Error),
}

impl From<anyhow::Error> for SessionError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct NewSession {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) created_at: PrimitiveDateTime,
}

/// An in-progress session joined to its exam's time budget, as the sweeper
/// consumes it.
#[derive(Debug, Clone)]
pub(crate) struct RunningSession {
    pub(crate) id: String,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) duration_minutes: i32,
}

/// Storage port for session state. Every transition is a conditional write:
/// implementations must only apply an update when the row is still in the
/// expected source status, and report whether a row changed.
#[async_trait]
pub(crate) trait SessionStore: Send + Sync {
    async fn find_for_student(
        &self,
        exam_id: &str,
        student_id: &str,
    ) -> anyhow::Result<Option<ExamSession>>;

    /// Insert a `not_started` session unless one already exists for the
    /// (exam, student) pair. Returns whether a row was inserted.
    async fn insert_if_absent(&self, session: NewSession) -> anyhow::Result<bool>;

    /// `not_started` -> `in_progress`, setting `started_at = now` exactly once.
    async fn mark_in_progress(
        &self,
        session_id: &str,
        now: PrimitiveDateTime,
    ) -> anyhow::Result<bool>;

    /// `in_progress` -> `completed`, setting `ended_at = now` and freezing
    /// the total score when one is supplied.
    async fn mark_completed(
        &self,
        session_id: &str,
        now: PrimitiveDateTime,
        total_score: Option<f64>,
    ) -> anyhow::Result<bool>;

    /// `in_progress` -> `terminated`; same effects as completion but the
    /// status stays distinguishable for audit.
    async fn mark_terminated(
        &self,
        session_id: &str,
        now: PrimitiveDateTime,
    ) -> anyhow::Result<bool>;

    /// Increment the violation counter and return the new count.
    async fn add_violation(&self, session_id: &str, now: PrimitiveDateTime)
        -> anyhow::Result<i32>;

    async fn list_in_progress(&self) -> anyhow::Result<Vec<RunningSession>>;

    /// Batch `in_progress` -> `completed`; already-completed ids are skipped,
    /// so re-running is harmless. Returns the number of rows transitioned.
    async fn complete_batch(
        &self,
        session_ids: &[String],
        now: PrimitiveDateTime,
    ) -> anyhow::Result<u64>;
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ViolationOutcome {
    pub(crate) violation_count: i32,
    pub(crate) terminated: bool,
}

/// Drives the session state machine over an injected storage port. Every
/// operation re-derives the exam status through the resolver at the moment
/// of the request; a stale client-side status can never force a transition.
pub(crate) struct SessionLifecycle<'a, S> {
    store: &'a S,
    submit_grace: Duration,
}

impl<'a, S: SessionStore> SessionLifecycle<'a, S> {
    pub(crate) fn new(store: &'a S, submit_grace_seconds: u64) -> Self {
        Self { store, submit_grace: Duration::seconds(submit_grace_seconds as i64) }
    }

    pub(crate) async fn join_exam(
        &self,
        exam: &Exam,
        student_id: &str,
        now: PrimitiveDateTime,
    ) -> Result<ExamSession, SessionError> {
        let timing = ExamTiming::of(exam);
        let existing = self.store.find_for_student(&exam.id, student_id).await?;
        let snapshot = existing.as_ref().map(SessionSnapshot::of);
        let view = resolve_status(&timing, snapshot.as_ref(), now);

        if !view.can_join {
            return Err(denial(&view, existing.as_ref()));
        }

        if let Some(session) = existing {
            return Ok(session);
        }

        self.store
            .insert_if_absent(NewSession {
                id: Uuid::new_v4().to_string(),
                exam_id: exam.id.clone(),
                student_id: student_id.to_string(),
                created_at: now,
            })
            .await?;

        // A concurrent join may have won the insert; either way the row
        // exists now.
        self.fetch_required(&exam.id, student_id).await
    }

    pub(crate) async fn start_session(
        &self,
        exam: &Exam,
        student_id: &str,
        now: PrimitiveDateTime,
    ) -> Result<ExamSession, SessionError> {
        let timing = ExamTiming::of(exam);
        let session = self.store.find_for_student(&exam.id, student_id).await?.ok_or_else(|| {
            SessionError::Validation("Join the exam before starting a session".to_string())
        })?;

        let view = resolve_status(&timing, Some(&SessionSnapshot::of(&session)), now);

        if !view.can_start {
            // Self-timeout: a status check that finds the attempt past its
            // deadline completes it on the spot.
            if session.status == SessionStatus::InProgress
                && view.status == ExamPhase::Completed
            {
                self.store.mark_completed(&session.id, now, None).await?;
            }
            return Err(denial(&view, Some(&session)));
        }

        let updated = self.store.mark_in_progress(&session.id, now).await?;
        if !updated {
            return Err(SessionError::AlreadyStarted);
        }

        self.fetch_required(&exam.id, student_id).await
    }

    pub(crate) async fn submit_session(
        &self,
        exam: &Exam,
        student_id: &str,
        now: PrimitiveDateTime,
        total_score: Option<f64>,
    ) -> Result<ExamSession, SessionError> {
        let timing = ExamTiming::of(exam);
        let session = self.store.find_for_student(&exam.id, student_id).await?.ok_or_else(|| {
            SessionError::Validation("No attempt exists for this exam".to_string())
        })?;

        if session.status.is_terminal() {
            return Err(SessionError::AlreadyCompleted);
        }
        if session.status != SessionStatus::InProgress {
            return Err(SessionError::Validation(
                "Session has not been started".to_string(),
            ));
        }

        let started_at = session.started_at.unwrap_or(timing.start_time);
        let deadline = session_deadline(&timing, started_at);
        let cutoff = if timing.end_time < deadline { timing.end_time } else { deadline };

        if now > cutoff + self.submit_grace {
            // Too late even for the grace margin: the attempt is closed
            // without this submission.
            self.store.mark_completed(&session.id, now, None).await?;
            return Err(SessionError::AlreadyCompleted);
        }

        let updated = self.store.mark_completed(&session.id, now, total_score).await?;
        if !updated {
            return Err(SessionError::AlreadyCompleted);
        }

        self.fetch_required(&exam.id, student_id).await
    }

    pub(crate) async fn record_violation(
        &self,
        exam: &Exam,
        student_id: &str,
        now: PrimitiveDateTime,
    ) -> Result<ViolationOutcome, SessionError> {
        let session = self.store.find_for_student(&exam.id, student_id).await?.ok_or_else(|| {
            SessionError::Validation("No attempt exists for this exam".to_string())
        })?;

        if session.status.is_terminal() {
            return Err(SessionError::AlreadyCompleted);
        }
        if session.status != SessionStatus::InProgress {
            return Err(SessionError::Validation(
                "Violations only apply to a running session".to_string(),
            ));
        }

        let violation_count = self.store.add_violation(&session.id, now).await?;
        let terminated = violation_count >= exam.max_violations;

        if terminated {
            self.store.mark_terminated(&session.id, now).await?;
        }

        Ok(ViolationOutcome { violation_count, terminated })
    }

    async fn fetch_required(
        &self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<ExamSession, SessionError> {
        self.store.find_for_student(exam_id, student_id).await?.ok_or_else(|| {
            SessionError::Storage(anyhow::anyhow!("session row missing after write"))
        })
    }
}

fn denial(view: &ExamStatusView, session: Option<&ExamSession>) -> SessionError {
    if let Some(session) = session {
        if session.status.is_terminal() {
            return SessionError::AlreadyCompleted;
        }
    }

    match view.status {
        ExamPhase::Upcoming => SessionError::NotYetOpen,
        ExamPhase::Expired => SessionError::WindowClosed,
        // An in-progress attempt: joining is fine but a second start is not.
        ExamPhase::Active => match session.map(|current| current.status) {
            Some(SessionStatus::InProgress) => SessionError::AlreadyStarted,
            _ => SessionError::AccessDenied("Action not permitted in the current exam state"),
        },
        ExamPhase::Completed => SessionError::AlreadyCompleted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::ExamAccessMode;
    use crate::test_support::MemorySessionStore;
    use time::macros::datetime;

    fn exam(
        start: PrimitiveDateTime,
        end: PrimitiveDateTime,
        duration_minutes: i32,
    ) -> Exam {
        Exam {
            id: "exam-1".to_string(),
            title: "Algorithms midterm".to_string(),
            description: None,
            start_time: start,
            end_time: end,
            duration_minutes,
            access_mode: ExamAccessMode::Open,
            access_code_hash: None,
            require_webcam: false,
            max_violations: 3,
            is_published: true,
            published_at: Some(start),
            created_by: "teacher-1".to_string(),
            created_at: start,
            updated_at: start,
        }
    }


    #[tokio::test]
    async fn join_creates_one_not_started_session() {
        let store = MemorySessionStore::default();
        let lifecycle = SessionLifecycle::new(&store, 300);
        let exam = exam(datetime!(2024-01-01 10:00), datetime!(2024-01-01 12:00), 60);

        let first = lifecycle.join_exam(&exam, "student-1", datetime!(2024-01-01 10:05)).await;
        let first = first.expect("join");
        assert_eq!(first.status, SessionStatus::NotStarted);
        assert!(first.started_at.is_none());

        let second = lifecycle
            .join_exam(&exam, "student-1", datetime!(2024-01-01 10:06))
            .await
            .expect("rejoin");
        assert_eq!(second.id, first.id);
    }

    #[tokio::test]
    async fn join_outside_window_is_rejected() {
        let store = MemorySessionStore::default();
        let lifecycle = SessionLifecycle::new(&store, 300);
        let exam = exam(datetime!(2024-01-01 10:00), datetime!(2024-01-01 12:00), 60);

        let early = lifecycle.join_exam(&exam, "student-1", datetime!(2024-01-01 09:00)).await;
        assert!(matches!(early, Err(SessionError::NotYetOpen)));

        let late = lifecycle.join_exam(&exam, "student-1", datetime!(2024-01-01 13:00)).await;
        assert!(matches!(late, Err(SessionError::WindowClosed)));
    }

    #[tokio::test]
    async fn start_sets_started_at_exactly_once() {
        let store = MemorySessionStore::default();
        let lifecycle = SessionLifecycle::new(&store, 300);
        let exam = exam(datetime!(2024-01-01 10:00), datetime!(2024-01-01 12:00), 60);

        lifecycle.join_exam(&exam, "student-1", datetime!(2024-01-01 10:05)).await.expect("join");
        let started = lifecycle
            .start_session(&exam, "student-1", datetime!(2024-01-01 10:10))
            .await
            .expect("start");
        assert_eq!(started.status, SessionStatus::InProgress);
        assert_eq!(started.started_at, Some(datetime!(2024-01-01 10:10)));

        let again = lifecycle.start_session(&exam, "student-1", datetime!(2024-01-01 10:15)).await;
        assert!(matches!(again, Err(SessionError::AlreadyStarted)));

        let unchanged = store.find_for_student("exam-1", "student-1").await.unwrap().unwrap();
        assert_eq!(unchanged.started_at, Some(datetime!(2024-01-01 10:10)));
    }

    #[tokio::test]
    async fn start_without_join_is_a_validation_error() {
        let store = MemorySessionStore::default();
        let lifecycle = SessionLifecycle::new(&store, 300);
        let exam = exam(datetime!(2024-01-01 10:00), datetime!(2024-01-01 12:00), 60);

        let result = lifecycle.start_session(&exam, "student-1", datetime!(2024-01-01 10:10)).await;
        assert!(matches!(result, Err(SessionError::Validation(_))));
    }

    #[tokio::test]
    async fn start_after_window_close_is_rejected() {
        let store = MemorySessionStore::default();
        let lifecycle = SessionLifecycle::new(&store, 300);
        let exam = exam(datetime!(2024-01-01 10:00), datetime!(2024-01-01 12:00), 60);

        lifecycle.join_exam(&exam, "student-1", datetime!(2024-01-01 11:59)).await.expect("join");
        let result = lifecycle.start_session(&exam, "student-1", datetime!(2024-01-01 12:30)).await;
        assert!(matches!(result, Err(SessionError::WindowClosed)));
    }

    #[tokio::test]
    async fn start_on_timed_out_session_completes_it() {
        let store = MemorySessionStore::default();
        let lifecycle = SessionLifecycle::new(&store, 300);
        let exam = exam(datetime!(2024-01-01 10:00), datetime!(2024-01-01 12:00), 30);

        lifecycle.join_exam(&exam, "student-1", datetime!(2024-01-01 10:00)).await.expect("join");
        lifecycle
            .start_session(&exam, "student-1", datetime!(2024-01-01 10:05))
            .await
            .expect("start");

        // 40 minutes into a 30-minute budget.
        let result = lifecycle.start_session(&exam, "student-1", datetime!(2024-01-01 10:45)).await;
        assert!(matches!(result, Err(SessionError::AlreadyCompleted)));

        let session = store.find_for_student("exam-1", "student-1").await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.ended_at, Some(datetime!(2024-01-01 10:45)));
    }

    #[tokio::test]
    async fn submit_freezes_score_and_is_terminal() {
        let store = MemorySessionStore::default();
        let lifecycle = SessionLifecycle::new(&store, 300);
        let exam = exam(datetime!(2024-01-01 10:00), datetime!(2024-01-01 12:00), 60);

        lifecycle.join_exam(&exam, "student-1", datetime!(2024-01-01 10:00)).await.expect("join");
        lifecycle
            .start_session(&exam, "student-1", datetime!(2024-01-01 10:05))
            .await
            .expect("start");

        let submitted = lifecycle
            .submit_session(&exam, "student-1", datetime!(2024-01-01 10:40), Some(17.5))
            .await
            .expect("submit");
        assert_eq!(submitted.status, SessionStatus::Completed);
        assert_eq!(submitted.total_score, Some(17.5));
        assert_eq!(submitted.ended_at, Some(datetime!(2024-01-01 10:40)));

        let again = lifecycle
            .submit_session(&exam, "student-1", datetime!(2024-01-01 10:41), Some(20.0))
            .await;
        assert!(matches!(again, Err(SessionError::AlreadyCompleted)));
    }

    #[tokio::test]
    async fn submit_within_grace_after_deadline_is_accepted() {
        let store = MemorySessionStore::default();
        let lifecycle = SessionLifecycle::new(&store, 300);
        let exam = exam(datetime!(2024-01-01 10:00), datetime!(2024-01-01 12:00), 30);

        lifecycle.join_exam(&exam, "student-1", datetime!(2024-01-01 10:00)).await.expect("join");
        lifecycle
            .start_session(&exam, "student-1", datetime!(2024-01-01 10:00))
            .await
            .expect("start");

        // Deadline is 10:30; 10:32 falls inside the 300-second grace.
        let submitted = lifecycle
            .submit_session(&exam, "student-1", datetime!(2024-01-01 10:32), Some(9.0))
            .await
            .expect("grace submit");
        assert_eq!(submitted.total_score, Some(9.0));
    }

    #[tokio::test]
    async fn submit_past_grace_closes_without_score() {
        let store = MemorySessionStore::default();
        let lifecycle = SessionLifecycle::new(&store, 300);
        let exam = exam(datetime!(2024-01-01 10:00), datetime!(2024-01-01 12:00), 30);

        lifecycle.join_exam(&exam, "student-1", datetime!(2024-01-01 10:00)).await.expect("join");
        lifecycle
            .start_session(&exam, "student-1", datetime!(2024-01-01 10:00))
            .await
            .expect("start");

        let result = lifecycle
            .submit_session(&exam, "student-1", datetime!(2024-01-01 10:40), Some(9.0))
            .await;
        assert!(matches!(result, Err(SessionError::AlreadyCompleted)));

        let session = store.find_for_student("exam-1", "student-1").await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.total_score, None);
    }

    #[tokio::test]
    async fn violations_terminate_at_the_threshold() {
        let store = MemorySessionStore::default();
        let lifecycle = SessionLifecycle::new(&store, 300);
        let exam = exam(datetime!(2024-01-01 10:00), datetime!(2024-01-01 12:00), 60);

        lifecycle.join_exam(&exam, "student-1", datetime!(2024-01-01 10:00)).await.expect("join");
        lifecycle
            .start_session(&exam, "student-1", datetime!(2024-01-01 10:00))
            .await
            .expect("start");

        for expected in 1..=2 {
            let outcome = lifecycle
                .record_violation(&exam, "student-1", datetime!(2024-01-01 10:10))
                .await
                .expect("violation");
            assert_eq!(outcome.violation_count, expected);
            assert!(!outcome.terminated);
        }

        let outcome = lifecycle
            .record_violation(&exam, "student-1", datetime!(2024-01-01 10:20))
            .await
            .expect("final violation");
        assert_eq!(outcome.violation_count, 3);
        assert!(outcome.terminated);

        let session = store.find_for_student("exam-1", "student-1").await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Terminated);

        let after = lifecycle
            .record_violation(&exam, "student-1", datetime!(2024-01-01 10:21))
            .await;
        assert!(matches!(after, Err(SessionError::AlreadyCompleted)));
    }

    #[tokio::test]
    async fn terminated_session_cannot_be_submitted() {
        let store = MemorySessionStore::default();
        let lifecycle = SessionLifecycle::new(&store, 300);
        let mut exam = exam(datetime!(2024-01-01 10:00), datetime!(2024-01-01 12:00), 60);
        exam.max_violations = 1;

        lifecycle.join_exam(&exam, "student-1", datetime!(2024-01-01 10:00)).await.expect("join");
        lifecycle
            .start_session(&exam, "student-1", datetime!(2024-01-01 10:00))
            .await
            .expect("start");
        lifecycle
            .record_violation(&exam, "student-1", datetime!(2024-01-01 10:05))
            .await
            .expect("violation");

        let result = lifecycle
            .submit_session(&exam, "student-1", datetime!(2024-01-01 10:10), Some(5.0))
            .await;
        assert!(matches!(result, Err(SessionError::AlreadyCompleted)));
    }
}
