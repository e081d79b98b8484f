use serde::Serialize;
use time::{Duration, PrimitiveDateTime};

use crate::core::time::millis_between;
use crate::db::models::{Exam, ExamSession};
use crate::db::types::SessionStatus;

/// The slice of an exam record the resolver needs: the access window and
/// the per-attempt time budget. The two are independent; whichever cutoff
/// comes first wins (the window is checked before the attempt deadline).
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExamTiming {
    pub(crate) start_time: PrimitiveDateTime,
    pub(crate) end_time: PrimitiveDateTime,
    pub(crate) duration_minutes: i32,
}

impl ExamTiming {
    pub(crate) fn of(exam: &Exam) -> Self {
        Self {
            start_time: exam.start_time,
            end_time: exam.end_time,
            duration_minutes: exam.duration_minutes,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionSnapshot {
    pub(crate) status: SessionStatus,
    pub(crate) started_at: Option<PrimitiveDateTime>,
}

impl SessionSnapshot {
    pub(crate) fn of(session: &ExamSession) -> Self {
        Self { status: session.status, started_at: session.started_at }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ExamPhase {
    Upcoming,
    Active,
    Completed,
    Expired,
}

/// Student-facing status descriptor. All durations are whole milliseconds.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ExamStatusView {
    pub(crate) status: ExamPhase,
    pub(crate) can_join: bool,
    pub(crate) can_start: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) time_until_start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) time_until_end: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) time_remaining: Option<i64>,
    pub(crate) message: &'static str,
}

impl ExamStatusView {
    fn closed(status: ExamPhase, message: &'static str) -> Self {
        Self {
            status,
            can_join: false,
            can_start: false,
            time_until_start: None,
            time_until_end: None,
            time_remaining: None,
            message,
        }
    }
}

pub(crate) fn session_deadline(
    timing: &ExamTiming,
    started_at: PrimitiveDateTime,
) -> PrimitiveDateTime {
    started_at + Duration::minutes(timing.duration_minutes as i64)
}

/// Derive the exam status for one student at `now`.
///
/// Evaluation order is strict and first-match-wins: a closed exam window
/// overrides everything, including an active session. The function never
/// fails; terminal outcomes are reported through the descriptor.
pub(crate) fn resolve_status(
    timing: &ExamTiming,
    session: Option<&SessionSnapshot>,
    now: PrimitiveDateTime,
) -> ExamStatusView {
    if now > timing.end_time {
        return ExamStatusView::closed(ExamPhase::Expired, "This exam has ended.");
    }

    if now < timing.start_time {
        let mut view =
            ExamStatusView::closed(ExamPhase::Upcoming, "This exam has not started yet.");
        view.time_until_start = Some(millis_between(timing.start_time, now));
        return view;
    }

    let time_until_end = millis_between(timing.end_time, now);

    let Some(session) = session else {
        return joinable(time_until_end);
    };

    match session.status {
        SessionStatus::Completed => {
            ExamStatusView::closed(ExamPhase::Completed, "You have completed this exam.")
        }
        // Terminated sessions are shown to the student as completed; the
        // raw status stays visible to teachers for audit.
        SessionStatus::Terminated => ExamStatusView::closed(
            ExamPhase::Completed,
            "Your session was ended early due to proctoring violations.",
        ),
        SessionStatus::InProgress => match session.started_at {
            Some(started_at) => {
                let deadline = session_deadline(timing, started_at);
                if now > deadline {
                    ExamStatusView::closed(ExamPhase::Completed, "Your exam time has expired.")
                } else {
                    ExamStatusView {
                        status: ExamPhase::Active,
                        can_join: true,
                        can_start: false,
                        time_until_start: None,
                        time_until_end: Some(time_until_end),
                        time_remaining: Some(millis_between(deadline, now)),
                        message: "Your attempt is in progress.",
                    }
                }
            }
            // An in-progress row without a start instant cannot come out of
            // the lifecycle manager; bound it by the window only.
            None => ExamStatusView {
                status: ExamPhase::Active,
                can_join: true,
                can_start: false,
                time_until_start: None,
                time_until_end: Some(time_until_end),
                time_remaining: None,
                message: "Your attempt is in progress.",
            },
        },
        SessionStatus::NotStarted => joinable(time_until_end),
    }
}

fn joinable(time_until_end: i64) -> ExamStatusView {
    ExamStatusView {
        status: ExamPhase::Active,
        can_join: true,
        can_start: true,
        time_until_start: None,
        time_until_end: Some(time_until_end),
        time_remaining: None,
        message: "The exam is open.",
    }
}

const MILLIS_PER_SECOND: i64 = 1_000;
const MILLIS_PER_MINUTE: i64 = 60 * MILLIS_PER_SECOND;
const MILLIS_PER_HOUR: i64 = 60 * MILLIS_PER_MINUTE;
const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;

/// Render a duration as its two largest non-zero units, e.g.
/// "1 day and 1 hour" or "1 minute and 5 seconds". Falls back to a single
/// unit, and to "0 seconds" at or below zero.
pub(crate) fn format_time_remaining(ms: i64) -> String {
    let ms = ms.max(0);
    let units = [
        ("day", ms / MILLIS_PER_DAY),
        ("hour", ms % MILLIS_PER_DAY / MILLIS_PER_HOUR),
        ("minute", ms % MILLIS_PER_HOUR / MILLIS_PER_MINUTE),
        ("second", ms % MILLIS_PER_MINUTE / MILLIS_PER_SECOND),
    ];

    let mut parts = units.iter().filter(|(_, value)| *value > 0).take(2).map(|(unit, value)| {
        let suffix = if *value == 1 { "" } else { "s" };
        format!("{value} {unit}{suffix}")
    });

    match (parts.next(), parts.next()) {
        (Some(first), Some(second)) => format!("{first} and {second}"),
        (Some(first), None) => first,
        _ => "0 seconds".to_string(),
    }
}

/// Render a duration as a compact clock: "H:MM:SS" when hours are present,
/// "M:SS" otherwise. The leading field is not zero-padded.
pub(crate) fn format_time_remaining_short(ms: i64) -> String {
    let total_seconds = ms.max(0) / MILLIS_PER_SECOND;
    let hours = total_seconds / 3600;
    let minutes = total_seconds % 3600 / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn timing(
        start: PrimitiveDateTime,
        end: PrimitiveDateTime,
        duration_minutes: i32,
    ) -> ExamTiming {
        ExamTiming { start_time: start, end_time: end, duration_minutes }
    }

    fn session(status: SessionStatus, started_at: Option<PrimitiveDateTime>) -> SessionSnapshot {
        SessionSnapshot { status, started_at }
    }

    #[test]
    fn upcoming_reports_time_until_start() {
        let timing =
            timing(datetime!(2024-01-01 11:00), datetime!(2024-01-01 12:00), 60);
        let view = resolve_status(&timing, None, datetime!(2024-01-01 10:00));

        assert_eq!(view.status, ExamPhase::Upcoming);
        assert!(!view.can_join);
        assert!(!view.can_start);
        assert_eq!(view.time_until_start, Some(3_600_000));
    }

    #[test]
    fn active_without_session_allows_join_and_start() {
        let timing =
            timing(datetime!(2024-01-01 10:00), datetime!(2024-01-01 11:00), 60);
        let view = resolve_status(&timing, None, datetime!(2024-01-01 10:30));

        assert_eq!(view.status, ExamPhase::Active);
        assert!(view.can_join);
        assert!(view.can_start);
        assert_eq!(view.time_until_end, Some(1_800_000));
        assert_eq!(view.time_remaining, None);
    }

    #[test]
    fn past_window_is_expired() {
        let timing =
            timing(datetime!(2024-01-01 10:00), datetime!(2024-01-01 11:00), 60);
        let view = resolve_status(&timing, None, datetime!(2024-01-01 12:00));

        assert_eq!(view.status, ExamPhase::Expired);
        assert!(!view.can_join);
        assert!(!view.can_start);
    }

    #[test]
    fn window_end_beats_in_progress_session() {
        let timing =
            timing(datetime!(2024-01-01 10:00), datetime!(2024-01-01 11:00), 60);
        let running =
            session(SessionStatus::InProgress, Some(datetime!(2024-01-01 10:50)));
        let view = resolve_status(&timing, Some(&running), datetime!(2024-01-01 11:00:01));

        assert_eq!(view.status, ExamPhase::Expired);
    }

    #[test]
    fn in_progress_reports_time_remaining() {
        let timing =
            timing(datetime!(2024-01-01 10:00), datetime!(2024-01-01 11:00), 30);
        let running =
            session(SessionStatus::InProgress, Some(datetime!(2024-01-01 10:10)));
        let view = resolve_status(&timing, Some(&running), datetime!(2024-01-01 10:15));

        assert_eq!(view.status, ExamPhase::Active);
        assert!(view.can_join);
        assert!(!view.can_start);
        assert_eq!(view.time_remaining, Some(1_500_000));
        assert_eq!(view.time_until_end, Some(2_700_000));
    }

    #[test]
    fn in_progress_past_duration_is_completed() {
        let timing =
            timing(datetime!(2024-01-01 10:00), datetime!(2024-01-01 11:00), 30);
        let running =
            session(SessionStatus::InProgress, Some(datetime!(2024-01-01 10:10)));
        let view = resolve_status(&timing, Some(&running), datetime!(2024-01-01 10:45));

        assert_eq!(view.status, ExamPhase::Completed);
        assert!(!view.can_join);
        assert!(!view.can_start);
    }

    #[test]
    fn in_progress_at_exact_deadline_is_still_active() {
        let timing =
            timing(datetime!(2024-01-01 10:00), datetime!(2024-01-01 12:00), 30);
        let running =
            session(SessionStatus::InProgress, Some(datetime!(2024-01-01 10:10)));
        let view = resolve_status(&timing, Some(&running), datetime!(2024-01-01 10:40));

        assert_eq!(view.status, ExamPhase::Active);
        assert_eq!(view.time_remaining, Some(0));
    }

    #[test]
    fn not_started_session_keeps_join_and_start_open() {
        let timing =
            timing(datetime!(2024-01-01 10:00), datetime!(2024-01-01 11:00), 30);
        let pending = session(SessionStatus::NotStarted, None);
        let view = resolve_status(&timing, Some(&pending), datetime!(2024-01-01 10:30));

        assert_eq!(view.status, ExamPhase::Active);
        assert!(view.can_join);
        assert!(view.can_start);
    }

    #[test]
    fn completed_session_reports_completed() {
        let timing =
            timing(datetime!(2024-01-01 10:00), datetime!(2024-01-01 11:00), 30);
        let done = session(SessionStatus::Completed, Some(datetime!(2024-01-01 10:05)));
        let view = resolve_status(&timing, Some(&done), datetime!(2024-01-01 10:30));

        assert_eq!(view.status, ExamPhase::Completed);
        assert!(!view.can_join);
    }

    #[test]
    fn terminated_session_reads_as_completed_with_distinct_message() {
        let timing =
            timing(datetime!(2024-01-01 10:00), datetime!(2024-01-01 11:00), 30);
        let done = session(SessionStatus::Terminated, Some(datetime!(2024-01-01 10:05)));
        let completed = session(SessionStatus::Completed, Some(datetime!(2024-01-01 10:05)));

        let terminated_view = resolve_status(&timing, Some(&done), datetime!(2024-01-01 10:30));
        let completed_view =
            resolve_status(&timing, Some(&completed), datetime!(2024-01-01 10:30));

        assert_eq!(terminated_view.status, ExamPhase::Completed);
        assert_ne!(terminated_view.message, completed_view.message);
    }

    #[test]
    fn format_long_picks_two_largest_units() {
        assert_eq!(format_time_remaining(65_000), "1 minute and 5 seconds");
        assert_eq!(format_time_remaining(90_061_000), "1 day and 1 hour");
        assert_eq!(format_time_remaining(7_200_000), "2 hours");
        assert_eq!(format_time_remaining(2_000), "2 seconds");
        assert_eq!(format_time_remaining(0), "0 seconds");
        assert_eq!(format_time_remaining(-5_000), "0 seconds");
    }

    #[test]
    fn format_long_skips_zero_middle_units() {
        // 1 day and 30 seconds: the hour and minute slots are empty.
        assert_eq!(format_time_remaining(MILLIS_PER_DAY + 30_000), "1 day and 30 seconds");
    }

    #[test]
    fn format_short_pads_trailing_fields() {
        assert_eq!(format_time_remaining_short(3_665_000), "1:01:05");
        assert_eq!(format_time_remaining_short(65_000), "1:05");
        assert_eq!(format_time_remaining_short(5_000), "0:05");
        assert_eq!(format_time_remaining_short(36_000_000), "10:00:00");
        assert_eq!(format_time_remaining_short(0), "0:00");
    }
}
