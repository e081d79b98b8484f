use serde::Serialize;

/// Session-level classification of how much of a submission has marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum GradingStatus {
    Pending,
    Partial,
    Completed,
}

/// One graded item as the aggregator sees it. `marks_obtained` being
/// non-null is what makes a question graded; an explicit zero counts.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QuestionMarks {
    pub(crate) max_marks: f64,
    pub(crate) marks_obtained: Option<f64>,
}

/// Derived on demand, never persisted.
#[derive(Debug, Clone, Copy, Serialize)]
pub(crate) struct GradingSnapshot {
    pub(crate) total_score: f64,
    pub(crate) max_score: f64,
    pub(crate) graded_count: usize,
    pub(crate) question_count: usize,
    pub(crate) status: GradingStatus,
}

pub(crate) fn aggregate(items: &[QuestionMarks]) -> GradingSnapshot {
    let question_count = items.len();
    let max_score: f64 = items.iter().map(|item| item.max_marks).sum();

    let mut total_score = 0.0;
    let mut graded_count = 0;
    for item in items {
        if let Some(marks) = item.marks_obtained {
            total_score += marks;
            graded_count += 1;
        }
    }

    let status = if graded_count == question_count {
        GradingStatus::Completed
    } else if graded_count == 0 {
        GradingStatus::Pending
    } else {
        GradingStatus::Partial
    };

    GradingSnapshot { total_score, max_score, graded_count, question_count, status }
}

/// MCQ answers are graded the moment they are submitted: full marks on an
/// exact match of the selected index, zero otherwise. Never queued for
/// manual grading.
pub(crate) fn auto_grade_mcq(
    correct_option: i32,
    selected_option: Option<i32>,
    max_marks: f64,
) -> f64 {
    match selected_option {
        Some(selected) if selected == correct_option => max_marks,
        _ => 0.0,
    }
}

/// Marks, once assigned, must land in [0, max_marks].
pub(crate) fn validate_marks(marks: f64, max_marks: f64) -> Result<f64, String> {
    if !marks.is_finite() || marks < 0.0 || marks > max_marks {
        return Err(format!("marks must be between 0 and {max_marks}"));
    }
    Ok(marks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(max_marks: f64, marks_obtained: Option<f64>) -> QuestionMarks {
        QuestionMarks { max_marks, marks_obtained }
    }

    #[test]
    fn all_graded_is_completed() {
        let snapshot = aggregate(&[
            item(5.0, Some(5.0)),
            item(10.0, Some(7.5)),
            item(20.0, Some(0.0)),
        ]);

        assert_eq!(snapshot.status, GradingStatus::Completed);
        assert_eq!(snapshot.total_score, 12.5);
        assert_eq!(snapshot.max_score, 35.0);
        assert_eq!(snapshot.graded_count, 3);
    }

    #[test]
    fn none_graded_is_pending() {
        let snapshot = aggregate(&[
            item(10.0, None),
            item(20.0, None),
        ]);

        assert_eq!(snapshot.status, GradingStatus::Pending);
        assert_eq!(snapshot.total_score, 0.0);
        assert_eq!(snapshot.graded_count, 0);
    }

    #[test]
    fn mixed_is_partial_and_ungraded_contribute_zero() {
        let snapshot = aggregate(&[
            item(5.0, Some(5.0)),
            item(20.0, None),
        ]);

        assert_eq!(snapshot.status, GradingStatus::Partial);
        assert_eq!(snapshot.total_score, 5.0);
        assert_eq!(snapshot.max_score, 25.0);
    }

    #[test]
    fn explicit_zero_counts_as_graded() {
        let snapshot = aggregate(&[item(10.0, Some(0.0))]);
        assert_eq!(snapshot.status, GradingStatus::Completed);
        assert_eq!(snapshot.total_score, 0.0);
    }

    #[test]
    fn empty_session_is_completed_with_zero_totals() {
        let snapshot = aggregate(&[]);
        assert_eq!(snapshot.status, GradingStatus::Completed);
        assert_eq!(snapshot.total_score, 0.0);
        assert_eq!(snapshot.max_score, 0.0);
    }

    #[test]
    fn mcq_auto_grade_is_exact_match() {
        assert_eq!(auto_grade_mcq(2, Some(2), 5.0), 5.0);
        assert_eq!(auto_grade_mcq(2, Some(1), 5.0), 0.0);
        assert_eq!(auto_grade_mcq(2, None, 5.0), 0.0);
    }

    #[test]
    fn marks_must_stay_in_range() {
        assert_eq!(validate_marks(0.0, 10.0), Ok(0.0));
        assert_eq!(validate_marks(10.0, 10.0), Ok(10.0));
        assert!(validate_marks(-0.5, 10.0).is_err());
        assert!(validate_marks(10.5, 10.0).is_err());
        assert!(validate_marks(f64::NAN, 10.0).is_err());
    }
}
