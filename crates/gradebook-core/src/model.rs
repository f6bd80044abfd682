//! Core data model types for gradebook.
//!
//! These are the records the rest of the system reads and writes: the term
//! structure (academic years, levels, subjects, periods), enrollments and
//! their grades, per-level grading policy, evaluated statuses and the
//! cached report artifacts built from them.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Default,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Serialize,
            Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a [`Student`].
    StudentId
);
id_type!(
    /// Identifier of a [`Level`].
    LevelId
);
id_type!(
    /// Identifier of a [`Subject`].
    SubjectId
);
id_type!(
    /// Identifier of an [`AcademicYear`].
    AcademicYearId
);
id_type!(
    /// Identifier of an [`Enrollment`].
    EnrollmentId
);
id_type!(
    /// Identifier of a [`Grade`].
    GradeId
);
id_type!(
    /// Identifier of a [`PassFailedStatus`].
    StatusId
);

// ---------------------------------------------------------------------------
// Term structure
// ---------------------------------------------------------------------------

/// A student known to the school.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub first_name: String,
    pub last_name: String,
}

impl Student {
    /// Display name used on report cards ("First Last").
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// An ordinal grade level such as `"7"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub id: LevelId,
    pub name: String,
}

impl Level {
    /// Numeric value of the level name, if it has one.
    ///
    /// Only numeric levels take part in promotion.
    pub fn ordinal(&self) -> Option<u32> {
        self.name.trim().parse().ok()
    }
}

/// A subject taught at exactly one level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub level_id: LevelId,
    pub name: String,
}

/// An academic year named `"YYYY/YYYY+1"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcademicYear {
    pub id: AcademicYearId,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl AcademicYear {
    /// Parse a year name into its start and end calendar years.
    ///
    /// Returns `None` unless the name is `"Y/Y+1"`.
    pub fn parse_name(name: &str) -> Option<(i32, i32)> {
        let (start, end) = name.trim().split_once('/')?;
        let start: i32 = start.trim().parse().ok()?;
        let end: i32 = end.trim().parse().ok()?;
        (end == start + 1).then_some((start, end))
    }

    /// Name of the academic year that follows `name`.
    pub fn successor_name(name: &str) -> Option<String> {
        let (_, end) = Self::parse_name(name)?;
        Some(format!("{}/{}", end, end + 1))
    }

    /// Default bounds of a year starting in `start_year`: September 1st to
    /// June 30th of the following calendar year.
    pub fn default_bounds(start_year: i32) -> Option<(NaiveDate, NaiveDate)> {
        let start = NaiveDate::from_ymd_opt(start_year, 9, 1)?;
        let end = NaiveDate::from_ymd_opt(start_year + 1, 6, 30)?;
        Some((start, end))
    }

    /// Check the name and dates agree with each other.
    pub fn validate(&self) -> Result<(), String> {
        let Some((start, end)) = Self::parse_name(&self.name) else {
            return Err(format!(
                "academic year name '{}' must look like YYYY/YYYY+1",
                self.name
            ));
        };
        if self.start_date.year() != start {
            return Err(format!(
                "academic year '{}' starts in {}, expected {start}",
                self.name,
                self.start_date.year()
            ));
        }
        if self.end_date.year() != end {
            return Err(format!(
                "academic year '{}' ends in {}, expected {end}",
                self.name,
                self.end_date.year()
            ));
        }
        if self.end_date <= self.start_date {
            return Err(format!(
                "academic year '{}' ends before it starts",
                self.name
            ));
        }
        Ok(())
    }
}

/// One of the eight fixed grading periods of a year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PeriodCode {
    #[serde(rename = "1st")]
    First,
    #[serde(rename = "2nd")]
    Second,
    #[serde(rename = "3rd")]
    Third,
    #[serde(rename = "1exam")]
    FirstExam,
    #[serde(rename = "4th")]
    Fourth,
    #[serde(rename = "5th")]
    Fifth,
    #[serde(rename = "6th")]
    Sixth,
    #[serde(rename = "2exam")]
    SecondExam,
}

/// Which half of the year a period belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Semester {
    First,
    Second,
}

impl PeriodCode {
    /// All periods in calendar order.
    pub const ALL: [PeriodCode; 8] = [
        PeriodCode::First,
        PeriodCode::Second,
        PeriodCode::Third,
        PeriodCode::FirstExam,
        PeriodCode::Fourth,
        PeriodCode::Fifth,
        PeriodCode::Sixth,
        PeriodCode::SecondExam,
    ];

    /// Code as stored and accepted on input (e.g. `"1exam"`).
    pub fn code(self) -> &'static str {
        match self {
            PeriodCode::First => "1st",
            PeriodCode::Second => "2nd",
            PeriodCode::Third => "3rd",
            PeriodCode::FirstExam => "1exam",
            PeriodCode::Fourth => "4th",
            PeriodCode::Fifth => "5th",
            PeriodCode::Sixth => "6th",
            PeriodCode::SecondExam => "2exam",
        }
    }

    /// Short key used by report templates (`{{s[0].1s}}` is the first exam).
    pub fn template_key(self) -> &'static str {
        match self {
            PeriodCode::First => "1",
            PeriodCode::Second => "2",
            PeriodCode::Third => "3",
            PeriodCode::FirstExam => "1s",
            PeriodCode::Fourth => "4",
            PeriodCode::Fifth => "5",
            PeriodCode::Sixth => "6",
            PeriodCode::SecondExam => "2s",
        }
    }

    pub fn is_exam(self) -> bool {
        matches!(self, PeriodCode::FirstExam | PeriodCode::SecondExam)
    }

    pub fn semester(self) -> Semester {
        match self {
            PeriodCode::First | PeriodCode::Second | PeriodCode::Third | PeriodCode::FirstExam => {
                Semester::First
            }
            _ => Semester::Second,
        }
    }

    /// Position in [`PeriodCode::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for PeriodCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for PeriodCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        PeriodCode::ALL
            .into_iter()
            .find(|p| p.code() == wanted)
            .ok_or_else(|| format!("unknown period: {s}"))
    }
}

// ---------------------------------------------------------------------------
// Enrollment and grades
// ---------------------------------------------------------------------------

/// Lifecycle of an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    Enrolled,
    Promoted,
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnrollmentStatus::Enrolled => write!(f, "ENROLLED"),
            EnrollmentStatus::Promoted => write!(f, "PROMOTED"),
        }
    }
}

/// A student's registration in a level for one academic year.
///
/// Unique per (student, level, academic year).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub student_id: StudentId,
    pub level_id: LevelId,
    pub academic_year_id: AcademicYearId,
    pub date_enrolled: NaiveDate,
    pub status: EnrollmentStatus,
}

/// A score for one subject in one period. Unique per
/// (enrollment, subject, period).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grade {
    pub id: GradeId,
    pub enrollment_id: EnrollmentId,
    pub subject_id: SubjectId,
    pub period: PeriodCode,
    /// 0..=100
    pub score: u8,
    pub updated_at: DateTime<Utc>,
}

/// Highest score a grade may carry.
pub const MAX_SCORE: u8 = 100;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Per-level weights and thresholds used for aggregation and evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradePolicy {
    pub level_id: LevelId,
    #[serde(default = "default_weight")]
    pub period_weight: f64,
    #[serde(default = "default_weight")]
    pub exam_weight: f64,
    /// Grades needed per subject before a status can be decided.
    #[serde(default = "default_required_grade_count")]
    pub required_grade_count: u32,
    #[serde(default = "default_passing_threshold")]
    pub passing_threshold: u32,
    #[serde(default = "default_conditional_threshold")]
    pub conditional_threshold: u32,
}

fn default_weight() -> f64 {
    0.5
}

fn default_required_grade_count() -> u32 {
    PeriodCode::ALL.len() as u32
}

fn default_passing_threshold() -> u32 {
    50
}

fn default_conditional_threshold() -> u32 {
    40
}

impl GradePolicy {
    /// Policy used for a level that has no explicit row.
    pub fn default_for(level_id: LevelId) -> Self {
        Self {
            level_id,
            period_weight: default_weight(),
            exam_weight: default_weight(),
            required_grade_count: default_required_grade_count(),
            passing_threshold: default_passing_threshold(),
            conditional_threshold: default_conditional_threshold(),
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Evaluated standing of a student for a level and year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pending,
    Incomplete,
    Pass,
    Conditional,
    Fail,
}

impl Status {
    /// PASS, FAIL and CONDITIONAL are decisions; the others are not.
    pub fn is_decision(self) -> bool {
        matches!(self, Status::Pass | Status::Fail | Status::Conditional)
    }

    /// Whether this status moves the student up a level.
    pub fn is_promotable(self) -> bool {
        matches!(self, Status::Pass | Status::Conditional)
    }

    /// Report template tied to this status, empty when there is none.
    pub fn template_name(self) -> &'static str {
        match self {
            Status::Pass => "yearly_card_pass",
            Status::Conditional => "yearly_card_conditional",
            Status::Fail => "yearly_card_fail",
            Status::Pending | Status::Incomplete => "",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Pending => "PENDING",
            Status::Incomplete => "INCOMPLETE",
            Status::Pass => "PASS",
            Status::Conditional => "CONDITIONAL",
            Status::Fail => "FAIL",
        };
        f.write_str(s)
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(Status::Pending),
            "INCOMPLETE" => Ok(Status::Incomplete),
            "PASS" | "PASSED" => Ok(Status::Pass),
            "CONDITIONAL" => Ok(Status::Conditional),
            "FAIL" | "FAILED" => Ok(Status::Fail),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// The stored status of one (student, level, academic year).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassFailedStatus {
    pub id: StatusId,
    pub student_id: StudentId,
    pub level_id: LevelId,
    pub academic_year_id: AcademicYearId,
    #[serde(default)]
    pub enrollment_id: Option<EnrollmentId>,
    pub status: Status,
    pub grades_complete: bool,
    #[serde(default)]
    pub validated_by: Option<String>,
    #[serde(default)]
    pub validated_at: Option<DateTime<Utc>>,
    /// Derived from `status`, kept on the record for report lookups.
    #[serde(default)]
    pub template_name: String,
    pub updated_at: DateTime<Utc>,
}

/// Fields written by a status create-or-update.
///
/// `validated_by` / `validated_at` are only overwritten when set.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub student_id: StudentId,
    pub level_id: LevelId,
    pub academic_year_id: AcademicYearId,
    pub enrollment_id: Option<EnrollmentId>,
    pub status: Status,
    pub grades_complete: bool,
    pub validated_by: Option<String>,
    pub validated_at: Option<DateTime<Utc>>,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Report artifacts
// ---------------------------------------------------------------------------

/// The two report families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    /// Term report card, same layout whatever the status.
    Periodic,
    /// End-of-year card whose layout follows the status.
    Yearly,
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportKind::Periodic => write!(f, "periodic"),
            ReportKind::Yearly => write!(f, "yearly"),
        }
    }
}

impl FromStr for ReportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "periodic" | "period" => Ok(ReportKind::Periodic),
            "yearly" | "year" => Ok(ReportKind::Yearly),
            other => Err(format!("unknown report kind: {other}")),
        }
    }
}

/// Cache key of a report artifact. `student_id` is `None` for a
/// whole-level report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub level_id: LevelId,
    pub student_id: Option<StudentId>,
    pub academic_year_id: AcademicYearId,
    pub kind: ReportKind,
}

impl ArtifactKey {
    pub fn is_level_wide(&self) -> bool {
        self.student_id.is_none()
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.student_id {
            Some(student) => write!(
                f,
                "{} level={} student={} year={}",
                self.kind, self.level_id, student, self.academic_year_id
            ),
            None => write!(
                f,
                "{} level={} year={}",
                self.kind, self.level_id, self.academic_year_id
            ),
        }
    }
}

/// Folder, relative to the media root, that generated reports live in.
pub const ARTIFACT_MEDIA_FOLDER: &str = "output_gradesheets";

/// A generated, cacheable report document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportArtifact {
    pub id: Uuid,
    pub key: ArtifactKey,
    pub path: PathBuf,
    pub filename: String,
    pub generated_at: DateTime<Utc>,
}

impl ReportArtifact {
    /// Public URL of the artifact under `media_url`.
    pub fn view_url(&self, media_url: &str) -> String {
        let base = media_url.trim_end_matches('/');
        if base.is_empty() {
            format!("{ARTIFACT_MEDIA_FOLDER}/{}", self.filename)
        } else {
            format!("{base}/{ARTIFACT_MEDIA_FOLDER}/{}", self.filename)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_codes_parse_and_display() {
        assert_eq!("1exam".parse::<PeriodCode>().unwrap(), PeriodCode::FirstExam);
        assert_eq!(" 4TH ".parse::<PeriodCode>().unwrap(), PeriodCode::Fourth);
        assert!("7th".parse::<PeriodCode>().is_err());
        assert_eq!(PeriodCode::SecondExam.to_string(), "2exam");
        assert_eq!(PeriodCode::SecondExam.template_key(), "2s");
        assert_eq!(PeriodCode::Fourth.index(), 4);
    }

    #[test]
    fn periods_split_into_semesters() {
        let first: Vec<_> = PeriodCode::ALL
            .into_iter()
            .filter(|p| p.semester() == Semester::First)
            .collect();
        assert_eq!(first.len(), 4);
        assert!(first.contains(&PeriodCode::FirstExam));
        assert_eq!(PeriodCode::ALL.iter().filter(|p| p.is_exam()).count(), 2);
    }

    #[test]
    fn academic_year_names() {
        assert_eq!(AcademicYear::parse_name("2024/2025"), Some((2024, 2025)));
        assert_eq!(AcademicYear::parse_name("2024/2026"), None);
        assert_eq!(AcademicYear::parse_name("next year"), None);
        assert_eq!(
            AcademicYear::successor_name("2024/2025").as_deref(),
            Some("2025/2026")
        );
        let (start, end) = AcademicYear::default_bounds(2025).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 9, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 6, 30).unwrap());
    }

    #[test]
    fn academic_year_validation_checks_dates() {
        let (start, end) = AcademicYear::default_bounds(2024).unwrap();
        let mut year = AcademicYear {
            id: AcademicYearId(1),
            name: "2024/2025".into(),
            start_date: start,
            end_date: end,
        };
        assert!(year.validate().is_ok());
        year.name = "2023/2024".into();
        assert!(year.validate().unwrap_err().contains("starts in 2024"));
    }

    #[test]
    fn level_ordinal() {
        let level = Level {
            id: LevelId(1),
            name: "7".into(),
        };
        assert_eq!(level.ordinal(), Some(7));
        let named = Level {
            id: LevelId(2),
            name: "Kindergarten".into(),
        };
        assert_eq!(named.ordinal(), None);
    }

    #[test]
    fn status_templates_and_parsing() {
        assert_eq!(Status::Pass.template_name(), "yearly_card_pass");
        assert_eq!(Status::Incomplete.template_name(), "");
        assert_eq!("failed".parse::<Status>().unwrap(), Status::Fail);
        assert!(Status::Conditional.is_promotable());
        assert!(!Status::Fail.is_promotable());
        assert!(!Status::Pending.is_decision());
    }

    #[test]
    fn status_serializes_uppercase() {
        let json = serde_json::to_string(&Status::Conditional).unwrap();
        assert_eq!(json, "\"CONDITIONAL\"");
    }

    #[test]
    fn artifact_view_url() {
        let artifact = ReportArtifact {
            id: Uuid::nil(),
            key: ArtifactKey {
                level_id: LevelId(1),
                student_id: None,
                academic_year_id: AcademicYearId(1),
                kind: ReportKind::Yearly,
            },
            path: PathBuf::from("/tmp/out.pdf"),
            filename: "out.pdf".into(),
            generated_at: Utc::now(),
        };
        assert_eq!(
            artifact.view_url("/media/"),
            "/media/output_gradesheets/out.pdf"
        );
        assert_eq!(artifact.view_url(""), "output_gradesheets/out.pdf");
    }
}
