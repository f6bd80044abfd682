//! TOML dataset parser.
//!
//! Loads school datasets (term structure, students, enrollments) and grade
//! batches from TOML files, and validates datasets.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::grades::GradeBatch;
use crate::model::{AcademicYear, GradePolicy, LevelId};

/// A school dataset as written in TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchoolSeed {
    #[serde(default)]
    pub academic_years: Vec<YearSeed>,
    #[serde(default)]
    pub levels: Vec<LevelSeed>,
    #[serde(default)]
    pub students: Vec<StudentSeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct YearSeed {
    pub name: String,
    /// Defaults to September 1st of the first year in `name`.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Defaults to June 30th of the second year in `name`.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl YearSeed {
    /// Start and end dates, filling gaps from the year name.
    pub fn bounds(&self) -> Result<(NaiveDate, NaiveDate)> {
        let defaults = AcademicYear::parse_name(&self.name)
            .and_then(|(start, _)| AcademicYear::default_bounds(start));
        match (self.start_date, self.end_date, defaults) {
            (Some(start), Some(end), _) => Ok((start, end)),
            (start, end, Some((default_start, default_end))) => {
                Ok((start.unwrap_or(default_start), end.unwrap_or(default_end)))
            }
            _ => anyhow::bail!(
                "academic year '{}' needs explicit dates or a YYYY/YYYY+1 name",
                self.name
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LevelSeed {
    pub name: String,
    /// Subject names in report order.
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub policy: Option<PolicySeed>,
}

/// Policy overrides; anything left out takes the default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicySeed {
    #[serde(default)]
    pub period_weight: Option<f64>,
    #[serde(default)]
    pub exam_weight: Option<f64>,
    #[serde(default)]
    pub required_grade_count: Option<u32>,
    #[serde(default)]
    pub passing_threshold: Option<u32>,
    #[serde(default)]
    pub conditional_threshold: Option<u32>,
}

impl PolicySeed {
    pub fn to_policy(&self, level_id: LevelId) -> GradePolicy {
        let defaults = GradePolicy::default_for(level_id);
        GradePolicy {
            level_id,
            period_weight: self.period_weight.unwrap_or(defaults.period_weight),
            exam_weight: self.exam_weight.unwrap_or(defaults.exam_weight),
            required_grade_count: self
                .required_grade_count
                .unwrap_or(defaults.required_grade_count),
            passing_threshold: self.passing_threshold.unwrap_or(defaults.passing_threshold),
            conditional_threshold: self
                .conditional_threshold
                .unwrap_or(defaults.conditional_threshold),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StudentSeed {
    /// Explicit id, so grade batches can refer to the student.
    #[serde(default)]
    pub id: Option<u64>,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub enrollments: Vec<EnrollmentSeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrollmentSeed {
    pub level: String,
    pub academic_year: String,
    /// Defaults to the academic year's start date.
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

/// Parse a school dataset file.
pub fn parse_school(path: &Path) -> Result<SchoolSeed> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read school file: {}", path.display()))?;

    parse_school_str(&content, path)
}

/// Parse a school dataset from a TOML string (useful for testing).
pub fn parse_school_str(content: &str, source_path: &Path) -> Result<SchoolSeed> {
    toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))
}

/// Parse a grade batch file.
pub fn parse_grade_batch(path: &Path) -> Result<GradeBatch> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read grade file: {}", path.display()))?;

    parse_grade_batch_str(&content, path)
}

/// Parse a grade batch from a TOML string.
pub fn parse_grade_batch_str(content: &str, source_path: &Path) -> Result<GradeBatch> {
    toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))
}

/// A warning from dataset validation.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// What the warning is about (e.g. `level '7'`).
    pub subject: Option<String>,
    /// Warning message.
    pub message: String,
}

impl ValidationWarning {
    fn new(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
            message: message.into(),
        }
    }
}

/// Validate a school dataset for common issues.
pub fn validate_school(seed: &SchoolSeed) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    let mut year_names = HashSet::new();
    for year in &seed.academic_years {
        let subject = format!("academic year '{}'", year.name);
        if !year_names.insert(year.name.as_str()) {
            warnings.push(ValidationWarning::new(&subject, "duplicate academic year"));
        }
        match year.bounds() {
            Ok((start_date, end_date)) => {
                let candidate = AcademicYear {
                    id: Default::default(),
                    name: year.name.clone(),
                    start_date,
                    end_date,
                };
                if let Err(message) = candidate.validate() {
                    warnings.push(ValidationWarning::new(&subject, message));
                }
            }
            Err(e) => warnings.push(ValidationWarning::new(&subject, e.to_string())),
        }
    }

    let mut level_names = HashSet::new();
    for level in &seed.levels {
        let subject = format!("level '{}'", level.name);
        if !level_names.insert(level.name.as_str()) {
            warnings.push(ValidationWarning::new(&subject, "duplicate level name"));
        }
        if level.name.trim().parse::<u32>().is_err() {
            warnings.push(ValidationWarning::new(
                &subject,
                "level name is not numeric, students will never be promoted out of it",
            ));
        }
        if level.subjects.is_empty() {
            warnings.push(ValidationWarning::new(
                &subject,
                "level has no subjects, every status will be INCOMPLETE",
            ));
        }
        let mut subject_names = HashSet::new();
        for name in &level.subjects {
            if !subject_names.insert(name.as_str()) {
                warnings.push(ValidationWarning::new(
                    &subject,
                    format!("duplicate subject '{name}'"),
                ));
            }
        }
        if let Some(policy) = &level.policy {
            let policy = policy.to_policy(LevelId(0));
            if (policy.period_weight + policy.exam_weight - 1.0).abs() > 1e-9 {
                warnings.push(ValidationWarning::new(
                    &subject,
                    format!(
                        "period_weight + exam_weight = {}, expected 1",
                        policy.period_weight + policy.exam_weight
                    ),
                ));
            }
            if policy.conditional_threshold > policy.passing_threshold {
                warnings.push(ValidationWarning::new(
                    &subject,
                    "conditional_threshold is above passing_threshold, CONDITIONAL can never occur",
                ));
            }
            if policy.required_grade_count == 0 {
                warnings.push(ValidationWarning::new(
                    &subject,
                    "required_grade_count is 0, statuses will be decided without grades",
                ));
            }
        }
    }

    let mut student_ids = HashSet::new();
    for student in &seed.students {
        let subject = match student.id {
            Some(id) => format!("student {id}"),
            None => format!("student '{} {}'", student.first_name, student.last_name),
        };
        if let Some(id) = student.id {
            if !student_ids.insert(id) {
                warnings.push(ValidationWarning::new(&subject, "duplicate student id"));
            }
        } else {
            warnings.push(ValidationWarning::new(
                &subject,
                "no id given, grade batches cannot refer to this student",
            ));
        }
        for enrollment in &student.enrollments {
            if !level_names.contains(enrollment.level.as_str()) {
                warnings.push(ValidationWarning::new(
                    &subject,
                    format!("enrolled in unknown level '{}'", enrollment.level),
                ));
            }
            if !year_names.contains(enrollment.academic_year.as_str()) {
                warnings.push(ValidationWarning::new(
                    &subject,
                    format!(
                        "enrolled in unknown academic year '{}'",
                        enrollment.academic_year
                    ),
                ));
            }
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grades::RawScore;
    use crate::model::PeriodCode;
    use std::path::PathBuf;

    const VALID_TOML: &str = r#"
[[academic_years]]
name = "2024/2025"

[[academic_years]]
name = "2025/2026"
start_date = "2025-09-08"

[[levels]]
name = "7"
subjects = ["Mathematics", "English", "Science"]

[levels.policy]
passing_threshold = 55
conditional_threshold = 45

[[levels]]
name = "8"
subjects = ["Mathematics"]

[[students]]
id = 1
first_name = "Ada"
last_name = "Lovelace"

[[students.enrollments]]
level = "7"
academic_year = "2024/2025"
date = "2024-09-02"
"#;

    #[test]
    fn parse_valid_school() {
        let seed = parse_school_str(VALID_TOML, &PathBuf::from("school.toml")).unwrap();
        assert_eq!(seed.levels.len(), 2);
        assert_eq!(seed.levels[0].subjects[2], "Science");
        let policy = seed.levels[0]
            .policy
            .as_ref()
            .unwrap()
            .to_policy(LevelId(1));
        assert_eq!(policy.passing_threshold, 55);
        assert_eq!(policy.period_weight, 0.5);
        assert_eq!(policy.required_grade_count, 8);
        assert_eq!(seed.students[0].enrollments[0].level, "7");
        assert!(validate_school(&seed).is_empty());
    }

    #[test]
    fn year_bounds_fill_from_name() {
        let seed = parse_school_str(VALID_TOML, &PathBuf::from("school.toml")).unwrap();
        let (start, end) = seed.academic_years[1].bounds().unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 9, 8).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 6, 30).unwrap());

        let odd = YearSeed {
            name: "Spring term".into(),
            start_date: None,
            end_date: None,
        };
        assert!(odd.bounds().is_err());
    }

    #[test]
    fn validate_reports_dangling_enrollments() {
        let toml = r#"
[[levels]]
name = "Kindergarten"

[[students]]
first_name = "Grace"
last_name = "Hopper"

[[students.enrollments]]
level = "9"
academic_year = "2030/2031"
"#;
        let seed = parse_school_str(toml, &PathBuf::from("school.toml")).unwrap();
        let warnings = validate_school(&seed);
        let messages: Vec<&str> = warnings.iter().map(|w| w.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("not numeric")));
        assert!(messages.iter().any(|m| m.contains("no subjects")));
        assert!(messages.iter().any(|m| m.contains("unknown level '9'")));
        assert!(messages
            .iter()
            .any(|m| m.contains("unknown academic year '2030/2031'")));
        assert!(messages.iter().any(|m| m.contains("no id given")));
    }

    #[test]
    fn validate_policy_weights() {
        let toml = r#"
[[levels]]
name = "7"
subjects = ["Mathematics"]

[levels.policy]
period_weight = 0.6
exam_weight = 0.6
passing_threshold = 40
conditional_threshold = 45
"#;
        let seed = parse_school_str(toml, &PathBuf::from("school.toml")).unwrap();
        let warnings = validate_school(&seed);
        assert!(warnings.iter().any(|w| w.message.contains("expected 1")));
        assert!(warnings
            .iter()
            .any(|w| w.message.contains("CONDITIONAL can never occur")));
    }

    #[test]
    fn parse_grade_batch_entries() {
        let toml = r#"
level = "7"
academic_year = "2024/2025"
subject = "Mathematics"
period = "1st"

[[entries]]
student_id = 1
score = 80

[[entries]]
student_id = 2
score = 72.5
period = "1exam"

[[entries]]
student_id = 3
score = "absent"
subject = "English"
"#;
        let batch = parse_grade_batch_str(toml, &PathBuf::from("grades.toml")).unwrap();
        assert_eq!(batch.period.as_deref(), Some("1st"));
        assert_eq!(batch.entries.len(), 3);
        assert_eq!(batch.entries[0].score, RawScore::Integer(80));
        assert_eq!(batch.entries[1].score, RawScore::Float(72.5));
        assert_eq!(
            batch.entries[1].period.as_deref().map(str::parse::<PeriodCode>),
            Some(Ok(PeriodCode::FirstExam))
        );
        assert_eq!(batch.entries[2].subject.as_deref(), Some("English"));
    }

    #[test]
    fn parse_malformed_toml() {
        let bad = "this is not [valid toml }{";
        assert!(parse_school_str(bad, &PathBuf::from("bad.toml")).is_err());
    }

    #[test]
    fn parse_school_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("school.toml");
        std::fs::write(&path, VALID_TOML).unwrap();
        let seed = parse_school(&path).unwrap();
        assert_eq!(seed.students.len(), 1);
    }
}
