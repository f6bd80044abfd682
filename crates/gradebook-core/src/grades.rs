//! Bulk grade input.
//!
//! A [`GradeBatch`] records scores for many students at once. Each entry is
//! judged on its own: saved, skipped (no enrollment) or rejected, and one
//! bad entry never stops its siblings.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GradebookError, Result};
use crate::model::{Grade, PeriodCode, StudentId, Subject, MAX_SCORE};
use crate::policy::ReferenceCache;
use crate::traits::SchoolStore;

/// Scores for one level and academic year.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeBatch {
    /// Level name (e.g. `"7"`).
    pub level: String,
    /// Academic year name (e.g. `"2024/2025"`).
    pub academic_year: String,
    /// Subject for entries that don't name their own.
    #[serde(default)]
    pub subject: Option<String>,
    /// Period code for entries that don't name their own.
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub entries: Vec<GradeEntry>,
}

/// One student's score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeEntry {
    pub student_id: StudentId,
    pub score: RawScore,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub period: Option<String>,
}

/// A score as submitted, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawScore {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl RawScore {
    /// Accept whole numbers in `0..=100`.
    pub fn validate(&self) -> std::result::Result<u8, String> {
        let value = match self {
            RawScore::Integer(n) => *n,
            RawScore::Float(f) if f.fract() == 0.0 && f.is_finite() => *f as i64,
            RawScore::Float(f) => return Err(format!("score {f} is not a whole number")),
            RawScore::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| format!("score '{s}' is not a number"))?,
        };
        if !(0..=i64::from(MAX_SCORE)).contains(&value) {
            return Err(format!("score {value} is outside 0..={MAX_SCORE}"));
        }
        Ok(value as u8)
    }
}

impl fmt::Display for RawScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawScore::Integer(n) => write!(f, "{n}"),
            RawScore::Float(x) => write!(f, "{x}"),
            RawScore::Text(s) => write!(f, "{s}"),
        }
    }
}

/// An entry that was not saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItem {
    pub student_id: StudentId,
    pub message: String,
}

/// Outcome of [`record_grades`], partitioned per entry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub saved: Vec<Grade>,
    /// Entries for students without an enrollment in the level and year.
    pub skipped: Vec<BatchItem>,
    pub errors: Vec<BatchItem>,
    /// Students with at least one saved grade.
    pub affected_students: BTreeSet<StudentId>,
}

impl BatchResult {
    pub fn total(&self) -> usize {
        self.saved.len() + self.skipped.len() + self.errors.len()
    }
}

/// Validate and store every entry of `batch`.
///
/// An unknown level or academic year rejects the batch as a whole.
pub async fn record_grades(
    store: &dyn SchoolStore,
    references: &ReferenceCache,
    batch: &GradeBatch,
    at: DateTime<Utc>,
) -> Result<BatchResult> {
    let level = references
        .level_by_name(&batch.level)
        .await?
        .ok_or_else(|| GradebookError::not_found(format!("level '{}'", batch.level)))?;
    let year = references
        .academic_year_by_name(&batch.academic_year)
        .await?
        .ok_or_else(|| {
            GradebookError::not_found(format!("academic year '{}'", batch.academic_year))
        })?;
    let subjects = references.subjects(level.id).await?;

    let mut result = BatchResult::default();
    for entry in &batch.entries {
        let reject = |message: String| BatchItem {
            student_id: entry.student_id,
            message,
        };

        let subject = match resolve_subject(&subjects, entry, batch) {
            Ok(subject) => subject,
            Err(message) => {
                result.errors.push(reject(message));
                continue;
            }
        };
        let period = match entry.period.as_deref().or(batch.period.as_deref()) {
            Some(code) => match code.parse::<PeriodCode>() {
                Ok(period) => period,
                Err(message) => {
                    result.errors.push(reject(message));
                    continue;
                }
            },
            None => {
                result.errors.push(reject("no period given".into()));
                continue;
            }
        };
        let score = match entry.score.validate() {
            Ok(score) => score,
            Err(message) => {
                result.errors.push(reject(message));
                continue;
            }
        };

        let Some(enrollment) = store.enrollment(entry.student_id, level.id, year.id).await? else {
            result.skipped.push(reject(format!(
                "student {} is not enrolled in level '{}' for {}",
                entry.student_id, level.name, year.name
            )));
            continue;
        };

        let (grade, created) = store
            .upsert_grade(enrollment.id, subject.id, period, score, at)
            .await?;
        tracing::debug!(
            student = %entry.student_id,
            subject = %subject.name,
            %period,
            score,
            created,
            "grade recorded"
        );
        result.affected_students.insert(entry.student_id);
        result.saved.push(grade);
    }

    tracing::info!(
        level = %level.name,
        year = %year.name,
        saved = result.saved.len(),
        skipped = result.skipped.len(),
        errors = result.errors.len(),
        "grade batch processed"
    );
    Ok(result)
}

fn resolve_subject<'a>(
    subjects: &'a [Subject],
    entry: &GradeEntry,
    batch: &GradeBatch,
) -> std::result::Result<&'a Subject, String> {
    let name = entry
        .subject
        .as_deref()
        .or(batch.subject.as_deref())
        .ok_or_else(|| "no subject given".to_string())?;
    subjects
        .iter()
        .find(|s| s.name.eq_ignore_ascii_case(name.trim()))
        .ok_or_else(|| format!("unknown subject '{name}' for level '{}'", batch.level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::DEFAULT_REFERENCE_TTL;
    use crate::store::MemoryStore;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn school() -> (Arc<MemoryStore>, ReferenceCache) {
        let store = Arc::new(MemoryStore::new());
        let level = store.add_level("7").unwrap();
        store.add_subject(level.id, "Mathematics").unwrap();
        store.add_subject(level.id, "English").unwrap();
        let year = store.add_academic_year("2024/2025").unwrap();
        for (id, first) in [(1, "Ada"), (2, "Grace")] {
            store
                .insert_student(crate::model::Student {
                    id: StudentId(id),
                    first_name: first.into(),
                    last_name: "Test".into(),
                })
                .unwrap();
            store
                .enroll(
                    StudentId(id),
                    level.id,
                    year.id,
                    NaiveDate::from_ymd_opt(2024, 9, 2).unwrap(),
                )
                .unwrap();
        }
        let references = ReferenceCache::new(store.clone(), DEFAULT_REFERENCE_TTL);
        (store, references)
    }

    fn entry(student: u64, score: RawScore) -> GradeEntry {
        GradeEntry {
            student_id: StudentId(student),
            score,
            subject: None,
            period: None,
        }
    }

    fn batch(entries: Vec<GradeEntry>) -> GradeBatch {
        GradeBatch {
            level: "7".into(),
            academic_year: "2024/2025".into(),
            subject: Some("Mathematics".into()),
            period: Some("1st".into()),
            entries,
        }
    }

    #[test]
    fn raw_score_validation() {
        assert_eq!(RawScore::Integer(100).validate(), Ok(100));
        assert_eq!(RawScore::Float(55.0).validate(), Ok(55));
        assert_eq!(RawScore::Text(" 42 ".into()).validate(), Ok(42));
        assert!(RawScore::Integer(101).validate().is_err());
        assert!(RawScore::Integer(-1).validate().is_err());
        assert!(RawScore::Float(72.5).validate().is_err());
        assert!(RawScore::Text("absent".into()).validate().is_err());
    }

    #[tokio::test]
    async fn batch_partitions_entries() {
        let (store, references) = school();
        let mut english = entry(2, RawScore::Integer(64));
        english.subject = Some("english".into());
        let mut bad_period = entry(1, RawScore::Integer(70));
        bad_period.period = Some("9th".into());

        let input = batch(vec![
            entry(1, RawScore::Integer(80)),
            english,
            entry(2, RawScore::Integer(140)),
            bad_period,
            entry(99, RawScore::Integer(50)),
        ]);
        let result = record_grades(store.as_ref(), &references, &input, Utc::now())
            .await
            .unwrap();

        assert_eq!(result.saved.len(), 2);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].student_id, StudentId(99));
        assert_eq!(result.total(), 5);
        assert_eq!(
            result.affected_students.iter().copied().collect::<Vec<_>>(),
            vec![StudentId(1), StudentId(2)]
        );
        assert!(result.errors.iter().any(|e| e.message.contains("outside")));
        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("unknown period")));
    }

    #[tokio::test]
    async fn resubmitting_updates_in_place() {
        let (store, references) = school();
        record_grades(
            store.as_ref(),
            &references,
            &batch(vec![entry(1, RawScore::Integer(40))]),
            Utc::now(),
        )
        .await
        .unwrap();
        let result = record_grades(
            store.as_ref(),
            &references,
            &batch(vec![entry(1, RawScore::Integer(90))]),
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(result.saved[0].score, 90);
        let enrollment_id = result.saved[0].enrollment_id;
        assert_eq!(store.grades_for_enrollment(enrollment_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_level_rejects_batch() {
        let (store, references) = school();
        let mut input = batch(vec![entry(1, RawScore::Integer(80))]);
        input.level = "12".into();
        let err = record_grades(store.as_ref(), &references, &input, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, GradebookError::NotFound(_)));
    }

    #[tokio::test]
    async fn missing_subject_and_period_are_entry_errors() {
        let (store, references) = school();
        let mut input = batch(vec![entry(1, RawScore::Integer(80))]);
        input.subject = None;
        let result = record_grades(store.as_ref(), &references, &input, Utc::now())
            .await
            .unwrap();
        assert_eq!(result.errors[0].message, "no subject given");

        input.subject = Some("Mathematics".into());
        input.period = None;
        let result = record_grades(store.as_ref(), &references, &input, Utc::now())
            .await
            .unwrap();
        assert_eq!(result.errors[0].message, "no period given");
    }
}
