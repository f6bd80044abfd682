//! Core trait definitions for the record store and document converters.
//!
//! [`SchoolStore`] is implemented in-crate by [`crate::store::MemoryStore`];
//! [`DocumentConverter`] implementations live in `gradebook-convert`.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    AcademicYear, AcademicYearId, ArtifactKey, Enrollment, EnrollmentId, EnrollmentStatus, Grade,
    GradePolicy, Level, LevelId, PassFailedStatus, PeriodCode, ReportArtifact, StatusUpdate,
    Student, StudentId, Subject, SubjectId,
};

// ---------------------------------------------------------------------------
// Record store
// ---------------------------------------------------------------------------

/// Keyed persistence for the school records.
///
/// Every "upsert" and "get or create" must be atomic with respect to the
/// record's unique key; the returned flag is `true` when a new row was
/// created.
#[async_trait]
pub trait SchoolStore: Send + Sync {
    async fn student(&self, id: StudentId) -> Result<Option<Student>>;

    async fn level(&self, id: LevelId) -> Result<Option<Level>>;

    async fn level_by_name(&self, name: &str) -> Result<Option<Level>>;

    /// Subjects of a level in insertion order.
    async fn subjects_for_level(&self, level: LevelId) -> Result<Vec<Subject>>;

    async fn academic_year(&self, id: AcademicYearId) -> Result<Option<AcademicYear>>;

    async fn academic_year_by_name(&self, name: &str) -> Result<Option<AcademicYear>>;

    async fn get_or_create_academic_year(
        &self,
        name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<(AcademicYear, bool)>;

    async fn enrollment(
        &self,
        student: StudentId,
        level: LevelId,
        year: AcademicYearId,
    ) -> Result<Option<Enrollment>>;

    /// Enrollments of a level for a year, in enrollment order.
    async fn enrollments_for_level(
        &self,
        level: LevelId,
        year: AcademicYearId,
    ) -> Result<Vec<Enrollment>>;

    /// Create the enrollment, or set `status` on the existing one.
    async fn upsert_enrollment(
        &self,
        student: StudentId,
        level: LevelId,
        year: AcademicYearId,
        date_enrolled: NaiveDate,
        status: EnrollmentStatus,
    ) -> Result<(Enrollment, bool)>;

    async fn set_enrollment_status(
        &self,
        enrollment: EnrollmentId,
        status: EnrollmentStatus,
    ) -> Result<()>;

    async fn grades_for_enrollment(&self, enrollment: EnrollmentId) -> Result<Vec<Grade>>;

    async fn upsert_grade(
        &self,
        enrollment: EnrollmentId,
        subject: SubjectId,
        period: PeriodCode,
        score: u8,
        at: DateTime<Utc>,
    ) -> Result<(Grade, bool)>;

    /// Most recent grade change for the level and year, restricted to one
    /// student when `student` is set.
    async fn latest_grade_update(
        &self,
        level: LevelId,
        student: Option<StudentId>,
        year: AcademicYearId,
    ) -> Result<Option<DateTime<Utc>>>;

    async fn grade_policy(&self, level: LevelId) -> Result<Option<GradePolicy>>;

    async fn status(
        &self,
        student: StudentId,
        level: LevelId,
        year: AcademicYearId,
    ) -> Result<Option<PassFailedStatus>>;

    async fn statuses_for_level(
        &self,
        level: LevelId,
        year: AcademicYearId,
    ) -> Result<Vec<PassFailedStatus>>;

    async fn upsert_status(&self, update: StatusUpdate) -> Result<(PassFailedStatus, bool)>;

    /// Most recent status change, scoped like [`latest_grade_update`](Self::latest_grade_update).
    async fn latest_status_update(
        &self,
        level: LevelId,
        student: Option<StudentId>,
        year: AcademicYearId,
    ) -> Result<Option<DateTime<Utc>>>;

    async fn artifact(&self, key: &ArtifactKey) -> Result<Option<ReportArtifact>>;

    async fn artifacts_for_level(
        &self,
        level: LevelId,
        year: AcademicYearId,
    ) -> Result<Vec<ReportArtifact>>;

    /// Insert or replace the artifact stored under `artifact.key`.
    async fn put_artifact(&self, artifact: ReportArtifact) -> Result<ReportArtifact>;

    async fn remove_artifact(&self, key: &ArtifactKey) -> Result<Option<ReportArtifact>>;

    async fn artifacts_generated_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ReportArtifact>>;
}

// ---------------------------------------------------------------------------
// Document converter
// ---------------------------------------------------------------------------

/// External service turning rendered documents into printable ones and
/// concatenating printable documents.
///
/// Implementations should report failures as
/// [`ConversionError`](crate::error::ConversionError) so callers can tell
/// transient failures from permanent ones.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Human-readable converter name (e.g. "http").
    fn name(&self) -> &str;

    /// Convert one rendered document.
    async fn convert(&self, request: &ConvertRequest) -> Result<()>;

    /// Concatenate printable documents, in order, into one.
    async fn merge(&self, request: &MergeRequest) -> Result<()>;
}

/// Convert `input` and write the result to `output`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertRequest {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Concatenate `inputs` into `output`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRequest {
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
}
