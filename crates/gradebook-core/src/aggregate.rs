//! Grade aggregation: semester and final averages.
//!
//! # Rounding
//!
//! Each average is rounded once, to the nearest whole number with halves
//! rounded away from zero. The period mean is blended unrounded. Blended
//! values are first snapped to six decimals so that binary error such as
//! `77.49999999999999` still rounds as `77.5`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{Grade, GradePolicy, PeriodCode, Status, StudentId, Subject, SubjectId};

fn snap(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// Round to the nearest whole number, halves away from zero.
pub fn round_score(value: f64) -> u32 {
    snap(value).round().max(0.0) as u32
}

/// Blend three period scores and one exam score under `policy`.
///
/// Returns `None` unless all four scores are present.
pub fn semester_average(
    periods: [Option<u8>; 3],
    exam: Option<u8>,
    policy: &GradePolicy,
) -> Option<u32> {
    let [a, b, c] = periods;
    let (a, b, c, exam) = (a?, b?, c?, exam?);
    let mean = (f64::from(a) + f64::from(b) + f64::from(c)) / 3.0;
    Some(round_score(
        mean * policy.period_weight + f64::from(exam) * policy.exam_weight,
    ))
}

/// Mean of both semester averages; `None` unless both exist.
pub fn final_average(first: Option<u32>, second: Option<u32>) -> Option<u32> {
    let (first, second) = (first?, second?);
    Some(round_score((f64::from(first) + f64::from(second)) / 2.0))
}

/// One subject line of a grade sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectRow {
    pub subject_id: SubjectId,
    pub subject: String,
    /// Indexed by [`PeriodCode::index`].
    pub scores: [Option<u8>; 8],
    pub first_semester: Option<u32>,
    pub second_semester: Option<u32>,
    pub final_average: Option<u32>,
}

impl SubjectRow {
    /// Build the row for `subject` from the enrollment's grades.
    ///
    /// Grades for other subjects are ignored.
    pub fn from_grades(subject: &Subject, grades: &[Grade], policy: &GradePolicy) -> Self {
        let mut scores = [None; 8];
        for grade in grades.iter().filter(|g| g.subject_id == subject.id) {
            scores[grade.period.index()] = Some(grade.score);
        }
        let score = |p: PeriodCode| scores[p.index()];
        let first_semester = semester_average(
            [
                score(PeriodCode::First),
                score(PeriodCode::Second),
                score(PeriodCode::Third),
            ],
            score(PeriodCode::FirstExam),
            policy,
        );
        let second_semester = semester_average(
            [
                score(PeriodCode::Fourth),
                score(PeriodCode::Fifth),
                score(PeriodCode::Sixth),
            ],
            score(PeriodCode::SecondExam),
            policy,
        );
        Self {
            subject_id: subject.id,
            subject: subject.name.clone(),
            scores,
            first_semester,
            second_semester,
            final_average: final_average(first_semester, second_semester),
        }
    }

    pub fn score(&self, period: PeriodCode) -> Option<u8> {
        self.scores[period.index()]
    }
}

/// Everything a report card shows for one student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeSheet {
    pub student_id: StudentId,
    pub student_name: String,
    pub level: String,
    pub academic_year: String,
    pub status: Option<Status>,
    /// One row per subject of the level, in subject order.
    pub rows: Vec<SubjectRow>,
}

/// Recorded scores per subject, for status evaluation.
pub fn scores_by_subject(grades: &[Grade]) -> HashMap<SubjectId, Vec<u8>> {
    let mut by_subject: HashMap<SubjectId, Vec<u8>> = HashMap::new();
    for grade in grades {
        by_subject
            .entry(grade.subject_id)
            .or_default()
            .push(grade.score);
    }
    by_subject
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EnrollmentId, GradeId, LevelId};
    use chrono::Utc;

    fn policy() -> GradePolicy {
        GradePolicy::default_for(LevelId(1))
    }

    fn grade(subject: u64, period: PeriodCode, score: u8) -> Grade {
        Grade {
            id: GradeId(0),
            enrollment_id: EnrollmentId(1),
            subject_id: SubjectId(subject),
            period,
            score,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn worked_example_rounds_half_up() {
        // (80 + 85 + 90) / 3 = 85; 85 * 0.5 + 70 * 0.5 = 77.5
        let avg = semester_average([Some(80), Some(85), Some(90)], Some(70), &policy());
        assert_eq!(avg, Some(78));
    }

    #[test]
    fn semester_needs_all_four_scores() {
        assert_eq!(
            semester_average([Some(80), None, Some(90)], Some(70), &policy()),
            None
        );
        assert_eq!(
            semester_average([Some(80), Some(85), Some(90)], None, &policy()),
            None
        );
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let first = semester_average([Some(61), Some(77), Some(93)], Some(58), &policy());
        for _ in 0..10 {
            assert_eq!(
                semester_average([Some(61), Some(77), Some(93)], Some(58), &policy()),
                first
            );
        }
    }

    #[test]
    fn weights_follow_policy() {
        let mut exam_heavy = policy();
        exam_heavy.period_weight = 0.25;
        exam_heavy.exam_weight = 0.75;
        // 60 * 0.25 + 100 * 0.75 = 90
        assert_eq!(
            semester_average([Some(60), Some(60), Some(60)], Some(100), &exam_heavy),
            Some(90)
        );
    }

    #[test]
    fn thirds_do_not_drift() {
        // mean 80.333.. * 0.5 + 75 * 0.5 = 77.666.. -> 78
        assert_eq!(
            semester_average([Some(80), Some(80), Some(81)], Some(75), &policy()),
            Some(78)
        );
        // mean 79.666.. * 0.5 + 75 * 0.5 = 77.333.. -> 77
        assert_eq!(
            semester_average([Some(79), Some(80), Some(80)], Some(75), &policy()),
            Some(77)
        );
    }

    #[test]
    fn final_average_needs_both_semesters() {
        assert_eq!(final_average(Some(78), Some(81)), Some(80));
        assert_eq!(final_average(Some(78), None), None);
        assert_eq!(final_average(None, None), None);
    }

    #[test]
    fn row_from_partial_grades() {
        let subject = Subject {
            id: SubjectId(3),
            level_id: LevelId(1),
            name: "Mathematics".into(),
        };
        let grades = vec![
            grade(3, PeriodCode::First, 80),
            grade(3, PeriodCode::Second, 85),
            grade(3, PeriodCode::Third, 90),
            grade(3, PeriodCode::FirstExam, 70),
            grade(3, PeriodCode::Fourth, 50),
            grade(4, PeriodCode::Fifth, 99),
        ];
        let row = SubjectRow::from_grades(&subject, &grades, &policy());
        assert_eq!(row.first_semester, Some(78));
        assert_eq!(row.second_semester, None);
        assert_eq!(row.final_average, None);
        assert_eq!(row.score(PeriodCode::Fourth), Some(50));
        assert_eq!(row.score(PeriodCode::Fifth), None);
    }

    #[test]
    fn scores_grouped_per_subject() {
        let grades = vec![
            grade(1, PeriodCode::First, 10),
            grade(1, PeriodCode::Second, 20),
            grade(2, PeriodCode::First, 30),
        ];
        let grouped = scores_by_subject(&grades);
        assert_eq!(grouped[&SubjectId(1)], vec![10, 20]);
        assert_eq!(grouped[&SubjectId(2)], vec![30]);
    }
}
