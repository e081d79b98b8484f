use anyhow::{Context, Result};
use time::{Duration, PrimitiveDateTime};

use crate::services::session_lifecycle::SessionStore;

/// Force-complete every in-progress session whose time budget has lapsed.
///
/// This pass exists for abandoned attempts: the resolver and the lifecycle
/// manager re-check the deadline on every read/write, but a session nobody
/// queries again would otherwise sit in_progress forever and pollute
/// grading views. Re-running against an already-swept set transitions
/// nothing (the batch update only touches in_progress rows).
pub(crate) async fn sweep_expired_sessions<S: SessionStore>(
    store: &S,
    now: PrimitiveDateTime,
) -> Result<u64> {
    let running = store.list_in_progress().await.context("Failed to fetch running sessions")?;

    let expired: Vec<String> = running
        .into_iter()
        .filter(|session| {
            now > session.started_at + Duration::minutes(session.duration_minutes as i64)
        })
        .map(|session| session.id)
        .collect();

    if expired.is_empty() {
        return Ok(0);
    }

    let closed = store
        .complete_batch(&expired, now)
        .await
        .context("Failed to complete expired sessions")?;

    tracing::info!(closed_sessions = closed, "Closed expired sessions");
    metrics::counter!("expired_sessions_closed_total").increment(closed);

    Ok(closed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::SessionStatus;
    use crate::services::session_lifecycle::NewSession;
    use crate::test_support::MemorySessionStore;
    use time::macros::datetime;

    async fn seed_running(
        store: &MemorySessionStore,
        id: &str,
        started_at: PrimitiveDateTime,
        duration_minutes: i32,
    ) {
        store
            .insert_if_absent(NewSession {
                id: id.to_string(),
                exam_id: format!("exam-{id}"),
                student_id: format!("student-{id}"),
                created_at: started_at,
            })
            .await
            .unwrap();
        store.mark_in_progress(id, started_at).await.unwrap();
        store.set_duration(id, duration_minutes);
    }

    #[tokio::test]
    async fn sweeps_only_lapsed_sessions() {
        let store = MemorySessionStore::default();
        seed_running(&store, "a", datetime!(2024-01-01 10:00), 30).await;
        seed_running(&store, "b", datetime!(2024-01-01 10:40), 30).await;

        let closed =
            sweep_expired_sessions(&store, datetime!(2024-01-01 10:45)).await.expect("sweep");
        assert_eq!(closed, 1);

        let lapsed = store.find_for_student("exam-a", "student-a").await.unwrap().unwrap();
        assert_eq!(lapsed.status, SessionStatus::Completed);
        assert_eq!(lapsed.ended_at, Some(datetime!(2024-01-01 10:45)));

        let running = store.find_for_student("exam-b", "student-b").await.unwrap().unwrap();
        assert_eq!(running.status, SessionStatus::InProgress);
    }

    #[tokio::test]
    async fn second_sweep_is_a_no_op() {
        let store = MemorySessionStore::default();
        seed_running(&store, "a", datetime!(2024-01-01 10:00), 30).await;

        let first =
            sweep_expired_sessions(&store, datetime!(2024-01-01 11:00)).await.expect("sweep");
        assert_eq!(first, 1);

        let second =
            sweep_expired_sessions(&store, datetime!(2024-01-01 11:05)).await.expect("resweep");
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn session_at_exact_deadline_is_left_alone() {
        let store = MemorySessionStore::default();
        seed_running(&store, "a", datetime!(2024-01-01 10:00), 30).await;

        let closed =
            sweep_expired_sessions(&store, datetime!(2024-01-01 10:30)).await.expect("sweep");
        assert_eq!(closed, 0);
    }

    #[tokio::test]
    async fn completed_sessions_never_appear_in_the_scan() {
        let store = MemorySessionStore::default();
        seed_running(&store, "a", datetime!(2024-01-01 10:00), 30).await;
        store.mark_completed("a", datetime!(2024-01-01 10:20), Some(12.0)).await.unwrap();

        let closed =
            sweep_expired_sessions(&store, datetime!(2024-01-01 11:00)).await.expect("sweep");
        assert_eq!(closed, 0);

        // The earlier submission's score survives the sweep.
        let session = store.find_for_student("exam-a", "student-a").await.unwrap().unwrap();
        assert_eq!(session.total_score, Some(12.0));
        assert_eq!(session.ended_at, Some(datetime!(2024-01-01 10:20)));
    }
}
