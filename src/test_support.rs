use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock};

use async_trait::async_trait;
use time::PrimitiveDateTime;

use crate::db::models::ExamSession;
use crate::db::types::SessionStatus;
use crate::services::session_lifecycle::{NewSession, RunningSession, SessionStore};

/// Serializes tests that mutate process environment variables.
pub(crate) fn env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory implementation of the session storage port, mirroring the
/// conditional-write semantics of the Postgres queries.
#[derive(Default)]
pub(crate) struct MemorySessionStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    sessions: HashMap<String, ExamSession>,
    durations: HashMap<String, i32>,
}

const DEFAULT_DURATION_MINUTES: i32 = 60;

impl MemorySessionStore {
    /// Exam duration the sweeper scan reports for a given session.
    pub(crate) fn set_duration(&self, session_id: &str, duration_minutes: i32) {
        let mut inner = self.inner.lock().unwrap();
        inner.durations.insert(session_id.to_string(), duration_minutes);
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn find_for_student(
        &self,
        exam_id: &str,
        student_id: &str,
    ) -> anyhow::Result<Option<ExamSession>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .sessions
            .values()
            .find(|session| session.exam_id == exam_id && session.student_id == student_id)
            .cloned())
    }

    async fn insert_if_absent(&self, session: NewSession) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().unwrap();

        let exists = inner.sessions.values().any(|current| {
            current.exam_id == session.exam_id && current.student_id == session.student_id
        });
        if exists {
            return Ok(false);
        }

        inner.sessions.insert(
            session.id.clone(),
            ExamSession {
                id: session.id,
                exam_id: session.exam_id,
                student_id: session.student_id,
                status: SessionStatus::NotStarted,
                started_at: None,
                ended_at: None,
                violation_count: 0,
                total_score: None,
                created_at: session.created_at,
                updated_at: session.created_at,
            },
        );
        Ok(true)
    }

    async fn mark_in_progress(
        &self,
        session_id: &str,
        now: PrimitiveDateTime,
    ) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let Some(session) = inner.sessions.get_mut(session_id) else {
            return Ok(false);
        };
        if session.status != SessionStatus::NotStarted {
            return Ok(false);
        }

        session.status = SessionStatus::InProgress;
        session.started_at = Some(now);
        session.updated_at = now;
        Ok(true)
    }

    async fn mark_completed(
        &self,
        session_id: &str,
        now: PrimitiveDateTime,
        total_score: Option<f64>,
    ) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let Some(session) = inner.sessions.get_mut(session_id) else {
            return Ok(false);
        };
        if session.status != SessionStatus::InProgress {
            return Ok(false);
        }

        session.status = SessionStatus::Completed;
        session.ended_at = Some(now);
        if let Some(score) = total_score {
            session.total_score = Some(score);
        }
        session.updated_at = now;
        Ok(true)
    }

    async fn mark_terminated(
        &self,
        session_id: &str,
        now: PrimitiveDateTime,
    ) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let Some(session) = inner.sessions.get_mut(session_id) else {
            return Ok(false);
        };
        if session.status != SessionStatus::InProgress {
            return Ok(false);
        }

        session.status = SessionStatus::Terminated;
        session.ended_at = Some(now);
        session.updated_at = now;
        Ok(true)
    }

    async fn add_violation(
        &self,
        session_id: &str,
        now: PrimitiveDateTime,
    ) -> anyhow::Result<i32> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| anyhow::anyhow!("session {session_id} not found"))?;

        session.violation_count += 1;
        session.updated_at = now;
        Ok(session.violation_count)
    }

    async fn list_in_progress(&self) -> anyhow::Result<Vec<RunningSession>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .sessions
            .values()
            .filter(|session| session.status == SessionStatus::InProgress)
            .filter_map(|session| {
                session.started_at.map(|started_at| RunningSession {
                    id: session.id.clone(),
                    started_at,
                    duration_minutes: inner
                        .durations
                        .get(&session.id)
                        .copied()
                        .unwrap_or(DEFAULT_DURATION_MINUTES),
                })
            })
            .collect())
    }

    async fn complete_batch(
        &self,
        session_ids: &[String],
        now: PrimitiveDateTime,
    ) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut transitioned = 0;

        for id in session_ids {
            if let Some(session) = inner.sessions.get_mut(id) {
                if session.status == SessionStatus::InProgress {
                    session.status = SessionStatus::Completed;
                    session.ended_at = Some(now);
                    session.updated_at = now;
                    transitioned += 1;
                }
            }
        }

        Ok(transitioned)
    }
}
