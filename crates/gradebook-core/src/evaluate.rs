//! Status evaluation rules.
//!
//! Completeness is checked for every subject before any score gating, so a
//! missing grade always yields INCOMPLETE whatever the other scores are.
//! Below that, FAIL beats CONDITIONAL, which beats PASS.

use serde::Serialize;

use crate::aggregate::scores_by_subject;
use crate::model::{Grade, GradePolicy, Status, Subject, SubjectId};

/// Per-subject figures behind a decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectStanding {
    pub subject_id: SubjectId,
    pub grade_count: usize,
    /// Simple mean of the recorded scores.
    pub mean: Option<f64>,
}

/// Decided status plus the figures it was decided from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub status: Status,
    pub standings: Vec<SubjectStanding>,
}

impl Evaluation {
    pub fn grades_complete(&self) -> bool {
        self.status != Status::Incomplete
    }
}

/// Decide the status of one enrollment.
///
/// `subjects` are the subjects of the enrollment's level; grades for any
/// other subject are ignored.
pub fn evaluate(subjects: &[Subject], grades: &[Grade], policy: &GradePolicy) -> Evaluation {
    let by_subject = scores_by_subject(grades);
    let standings: Vec<SubjectStanding> = subjects
        .iter()
        .map(|subject| {
            let scores = by_subject.get(&subject.id).map(Vec::as_slice).unwrap_or(&[]);
            let mean = (!scores.is_empty()).then(|| {
                scores.iter().map(|&s| f64::from(s)).sum::<f64>() / scores.len() as f64
            });
            SubjectStanding {
                subject_id: subject.id,
                grade_count: scores.len(),
                mean,
            }
        })
        .collect();

    let status = decide(&standings, grades.is_empty(), policy);
    Evaluation { status, standings }
}

fn decide(standings: &[SubjectStanding], no_grades: bool, policy: &GradePolicy) -> Status {
    if no_grades || standings.is_empty() {
        return Status::Incomplete;
    }
    let required = policy.required_grade_count as usize;
    if standings.iter().any(|s| s.grade_count < required) {
        return Status::Incomplete;
    }

    let conditional = f64::from(policy.conditional_threshold);
    let passing = f64::from(policy.passing_threshold);
    let means = standings.iter().map(|s| s.mean.unwrap_or(0.0));

    let mut below_passing = false;
    for mean in means {
        if mean < conditional {
            return Status::Fail;
        }
        if mean < passing {
            below_passing = true;
        }
    }
    if below_passing {
        Status::Conditional
    } else {
        Status::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EnrollmentId, GradeId, LevelId, PeriodCode};
    use chrono::Utc;

    fn subjects(n: u64) -> Vec<Subject> {
        (1..=n)
            .map(|id| Subject {
                id: SubjectId(id),
                level_id: LevelId(1),
                name: format!("Subject {id}"),
            })
            .collect()
    }

    fn full_year(subject: u64, score: u8) -> Vec<Grade> {
        PeriodCode::ALL
            .into_iter()
            .map(|period| Grade {
                id: GradeId(0),
                enrollment_id: EnrollmentId(1),
                subject_id: SubjectId(subject),
                period,
                score,
                updated_at: Utc::now(),
            })
            .collect()
    }

    fn policy() -> GradePolicy {
        GradePolicy::default_for(LevelId(1))
    }

    #[test]
    fn no_grades_is_incomplete() {
        let eval = evaluate(&subjects(2), &[], &policy());
        assert_eq!(eval.status, Status::Incomplete);
        assert!(!eval.grades_complete());
    }

    #[test]
    fn seven_of_eight_is_incomplete_even_at_full_marks() {
        let mut grades = full_year(1, 100);
        grades.pop();
        let eval = evaluate(&subjects(1), &grades, &policy());
        assert_eq!(eval.status, Status::Incomplete);
        assert_eq!(eval.standings[0].grade_count, 7);
    }

    #[test]
    fn incomplete_wins_over_failing_subject() {
        let mut grades = full_year(1, 5);
        let mut second = full_year(2, 90);
        second.truncate(3);
        grades.extend(second);
        let eval = evaluate(&subjects(2), &grades, &policy());
        assert_eq!(eval.status, Status::Incomplete);
    }

    #[test]
    fn any_subject_below_conditional_fails() {
        let mut grades = full_year(1, 95);
        grades.extend(full_year(2, 45));
        grades.extend(full_year(3, 39));
        assert_eq!(evaluate(&subjects(3), &grades, &policy()).status, Status::Fail);
    }

    #[test]
    fn between_thresholds_is_conditional() {
        let mut grades = full_year(1, 95);
        grades.extend(full_year(2, 40));
        assert_eq!(
            evaluate(&subjects(2), &grades, &policy()).status,
            Status::Conditional
        );
    }

    #[test]
    fn all_at_or_above_passing_passes() {
        let mut grades = full_year(1, 50);
        grades.extend(full_year(2, 88));
        let eval = evaluate(&subjects(2), &grades, &policy());
        assert_eq!(eval.status, Status::Pass);
        assert_eq!(eval.standings[1].mean, Some(88.0));
        assert!(eval.grades_complete());
    }

    #[test]
    fn grades_for_other_levels_are_ignored() {
        let mut grades = full_year(1, 70);
        grades.extend(full_year(42, 0));
        assert_eq!(evaluate(&subjects(1), &grades, &policy()).status, Status::Pass);
    }

    #[test]
    fn level_without_subjects_is_incomplete() {
        let grades = full_year(1, 70);
        assert_eq!(evaluate(&[], &grades, &policy()).status, Status::Incomplete);
    }

    #[test]
    fn required_count_follows_policy() {
        let mut lenient = policy();
        lenient.required_grade_count = 4;
        let mut grades = full_year(1, 70);
        grades.truncate(4);
        assert_eq!(evaluate(&subjects(1), &grades, &lenient).status, Status::Pass);
    }
}
