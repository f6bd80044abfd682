//! In-memory [`SchoolStore`] with JSON snapshot persistence.
//!
//! All tables sit behind one mutex, so every upsert is atomic with respect
//! to its unique key. The CLI keeps its data file as a snapshot of these
//! tables.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    AcademicYear, AcademicYearId, ArtifactKey, Enrollment, EnrollmentId, EnrollmentStatus, Grade,
    GradeId, GradePolicy, Level, LevelId, PassFailedStatus, PeriodCode, ReportArtifact, StatusId,
    StatusUpdate, Student, StudentId, Subject, SubjectId,
};
use crate::error::GradebookError;
use crate::parser::SchoolSeed;
use crate::traits::SchoolStore;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Tables {
    next_id: u64,
    #[serde(default)]
    students: Vec<Student>,
    #[serde(default)]
    levels: Vec<Level>,
    #[serde(default)]
    subjects: Vec<Subject>,
    #[serde(default)]
    academic_years: Vec<AcademicYear>,
    #[serde(default)]
    enrollments: Vec<Enrollment>,
    #[serde(default)]
    grades: Vec<Grade>,
    #[serde(default)]
    policies: Vec<GradePolicy>,
    #[serde(default)]
    statuses: Vec<PassFailedStatus>,
    #[serde(default)]
    artifacts: Vec<ReportArtifact>,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn enrollment_ids(
        &self,
        level: LevelId,
        student: Option<StudentId>,
        year: AcademicYearId,
    ) -> Vec<EnrollmentId> {
        self.enrollments
            .iter()
            .filter(|e| e.level_id == level && e.academic_year_id == year)
            .filter(|e| student.map_or(true, |s| e.student_id == s))
            .map(|e| e.id)
            .collect()
    }

    fn level_by_name(&self, name: &str) -> Option<&Level> {
        self.levels.iter().find(|l| l.name == name)
    }

    fn ensure_level(&mut self, name: &str) -> Level {
        if let Some(level) = self.level_by_name(name) {
            return level.clone();
        }
        let level = Level {
            id: LevelId(self.next_id()),
            name: name.to_string(),
        };
        self.levels.push(level.clone());
        level
    }

    fn ensure_subject(&mut self, level: LevelId, name: &str) -> Subject {
        if let Some(subject) = self
            .subjects
            .iter()
            .find(|s| s.level_id == level && s.name == name)
        {
            return subject.clone();
        }
        let subject = Subject {
            id: SubjectId(self.next_id()),
            level_id: level,
            name: name.to_string(),
        };
        self.subjects.push(subject.clone());
        subject
    }

    fn ensure_academic_year(
        &mut self,
        name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> (AcademicYear, bool) {
        if let Some(year) = self.academic_years.iter().find(|y| y.name == name) {
            return (year.clone(), false);
        }
        let year = AcademicYear {
            id: AcademicYearId(self.next_id()),
            name: name.to_string(),
            start_date,
            end_date,
        };
        self.academic_years.push(year.clone());
        (year, true)
    }

    fn upsert_enrollment(
        &mut self,
        student: StudentId,
        level: LevelId,
        year: AcademicYearId,
        date_enrolled: NaiveDate,
        status: EnrollmentStatus,
    ) -> (Enrollment, bool) {
        if let Some(existing) = self.enrollments.iter_mut().find(|e| {
            e.student_id == student && e.level_id == level && e.academic_year_id == year
        }) {
            existing.status = status;
            return (existing.clone(), false);
        }
        let enrollment = Enrollment {
            id: EnrollmentId(self.next_id()),
            student_id: student,
            level_id: level,
            academic_year_id: year,
            date_enrolled,
            status,
        };
        self.enrollments.push(enrollment.clone());
        (enrollment, true)
    }
}

/// Counts of records touched by [`MemoryStore::import_seed`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub levels: usize,
    pub subjects: usize,
    pub academic_years: usize,
    pub students: usize,
    pub enrollments: usize,
}

/// Mutex-guarded record tables.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| anyhow::anyhow!("record store lock poisoned"))
    }

    /// Save a snapshot of every table as JSON.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let snapshot = self.tables()?.clone();
        let json =
            serde_json::to_string_pretty(&snapshot).context("failed to serialize record store")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write data file {}", path.display()))?;
        Ok(())
    }

    /// Load a snapshot written by [`save_json`](Self::save_json).
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read data file {}", path.display()))?;
        let tables: Tables =
            serde_json::from_str(&content).context("failed to parse data file JSON")?;
        Ok(Self {
            tables: Mutex::new(tables),
        })
    }

    /// Load `path` if it exists, otherwise start empty.
    pub fn open(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_json(path)
        } else {
            Ok(Self::new())
        }
    }

    pub fn add_student(&self, first_name: &str, last_name: &str) -> Result<Student> {
        let mut tables = self.tables()?;
        let student = Student {
            id: StudentId(tables.next_id()),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        };
        tables.students.push(student.clone());
        Ok(student)
    }

    /// Insert a student under a caller-chosen id, replacing the names of an
    /// existing student with that id.
    pub fn insert_student(&self, student: Student) -> Result<bool> {
        let mut tables = self.tables()?;
        tables.next_id = tables.next_id.max(student.id.0);
        if let Some(existing) = tables.students.iter_mut().find(|s| s.id == student.id) {
            *existing = student;
            return Ok(false);
        }
        tables.students.push(student);
        Ok(true)
    }

    pub fn add_level(&self, name: &str) -> Result<Level> {
        Ok(self.tables()?.ensure_level(name))
    }

    pub fn add_subject(&self, level: LevelId, name: &str) -> Result<Subject> {
        let mut tables = self.tables()?;
        if !tables.levels.iter().any(|l| l.id == level) {
            anyhow::bail!("level {level} does not exist");
        }
        Ok(tables.ensure_subject(level, name))
    }

    /// Add an academic year with the default September to June bounds.
    pub fn add_academic_year(&self, name: &str) -> Result<AcademicYear> {
        let (start_year, _) = AcademicYear::parse_name(name)
            .with_context(|| format!("invalid academic year name '{name}'"))?;
        let (start, end) = AcademicYear::default_bounds(start_year)
            .with_context(|| format!("no calendar dates for academic year '{name}'"))?;
        Ok(self.tables()?.ensure_academic_year(name, start, end).0)
    }

    pub fn enroll(
        &self,
        student: StudentId,
        level: LevelId,
        year: AcademicYearId,
        date_enrolled: NaiveDate,
    ) -> Result<Enrollment> {
        let mut tables = self.tables()?;
        Ok(tables
            .upsert_enrollment(student, level, year, date_enrolled, EnrollmentStatus::Enrolled)
            .0)
    }

    pub fn set_policy(&self, policy: GradePolicy) -> Result<()> {
        let mut tables = self.tables()?;
        tables.policies.retain(|p| p.level_id != policy.level_id);
        tables.policies.push(policy);
        Ok(())
    }

    /// All students, sorted by id.
    pub fn students(&self) -> Result<Vec<Student>> {
        let mut students = self.tables()?.students.clone();
        students.sort_by_key(|s| s.id);
        Ok(students)
    }

    pub fn levels(&self) -> Result<Vec<Level>> {
        Ok(self.tables()?.levels.clone())
    }

    pub fn academic_years(&self) -> Result<Vec<AcademicYear>> {
        Ok(self.tables()?.academic_years.clone())
    }

    /// Every stored artifact.
    pub fn artifacts(&self) -> Result<Vec<ReportArtifact>> {
        Ok(self.tables()?.artifacts.clone())
    }

    /// Load a parsed school dataset, creating whatever is missing.
    ///
    /// Levels, subjects and academic years are matched by name; students
    /// with an explicit id are inserted under it. Nothing is stored unless
    /// the whole dataset imports cleanly.
    pub fn import_seed(&self, seed: &SchoolSeed) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        let mut live = self.tables()?;
        let mut tables = live.clone();

        for year in &seed.academic_years {
            let (start_date, end_date) = year.bounds()?;
            let candidate = AcademicYear {
                id: AcademicYearId::default(),
                name: year.name.trim().to_string(),
                start_date,
                end_date,
            };
            candidate.validate().map_err(GradebookError::validation)?;
            let (_, created) = tables.ensure_academic_year(&year.name, start_date, end_date);
            if created {
                summary.academic_years += 1;
            }
        }

        for level_seed in &seed.levels {
            let known = tables.level_by_name(&level_seed.name).is_some();
            let level = tables.ensure_level(&level_seed.name);
            if !known {
                summary.levels += 1;
            }
            for name in &level_seed.subjects {
                let before = tables.subjects.len();
                tables.ensure_subject(level.id, name);
                summary.subjects += tables.subjects.len() - before;
            }
            if let Some(policy) = &level_seed.policy {
                tables.policies.retain(|p| p.level_id != level.id);
                tables.policies.push(policy.to_policy(level.id));
            }
        }

        for student_seed in &seed.students {
            let student = match student_seed.id {
                Some(id) => {
                    tables.next_id = tables.next_id.max(id);
                    let student = Student {
                        id: StudentId(id),
                        first_name: student_seed.first_name.clone(),
                        last_name: student_seed.last_name.clone(),
                    };
                    match tables.students.iter_mut().find(|s| s.id == student.id) {
                        Some(existing) => *existing = student.clone(),
                        None => {
                            tables.students.push(student.clone());
                            summary.students += 1;
                        }
                    }
                    student
                }
                None => {
                    let student = Student {
                        id: StudentId(tables.next_id()),
                        first_name: student_seed.first_name.clone(),
                        last_name: student_seed.last_name.clone(),
                    };
                    tables.students.push(student.clone());
                    summary.students += 1;
                    student
                }
            };

            for enrollment in &student_seed.enrollments {
                let level = tables
                    .level_by_name(&enrollment.level)
                    .cloned()
                    .with_context(|| {
                        format!(
                            "student {} is enrolled in unknown level '{}'",
                            student.id, enrollment.level
                        )
                    })?;
                let year = tables
                    .academic_years
                    .iter()
                    .find(|y| y.name == enrollment.academic_year)
                    .cloned()
                    .with_context(|| {
                        format!(
                            "student {} is enrolled in unknown academic year '{}'",
                            student.id, enrollment.academic_year
                        )
                    })?;
                let date = enrollment.date.unwrap_or(year.start_date);
                let (_, created) = tables.upsert_enrollment(
                    student.id,
                    level.id,
                    year.id,
                    date,
                    EnrollmentStatus::Enrolled,
                );
                if created {
                    summary.enrollments += 1;
                }
            }
        }

        *live = tables;
        Ok(summary)
    }
}

#[async_trait]
impl SchoolStore for MemoryStore {
    async fn student(&self, id: StudentId) -> Result<Option<Student>> {
        Ok(self.tables()?.students.iter().find(|s| s.id == id).cloned())
    }

    async fn level(&self, id: LevelId) -> Result<Option<Level>> {
        Ok(self.tables()?.levels.iter().find(|l| l.id == id).cloned())
    }

    async fn level_by_name(&self, name: &str) -> Result<Option<Level>> {
        Ok(self.tables()?.level_by_name(name.trim()).cloned())
    }

    async fn subjects_for_level(&self, level: LevelId) -> Result<Vec<Subject>> {
        Ok(self
            .tables()?
            .subjects
            .iter()
            .filter(|s| s.level_id == level)
            .cloned()
            .collect())
    }

    async fn academic_year(&self, id: AcademicYearId) -> Result<Option<AcademicYear>> {
        Ok(self
            .tables()?
            .academic_years
            .iter()
            .find(|y| y.id == id)
            .cloned())
    }

    async fn academic_year_by_name(&self, name: &str) -> Result<Option<AcademicYear>> {
        let name = name.trim();
        Ok(self
            .tables()?
            .academic_years
            .iter()
            .find(|y| y.name == name)
            .cloned())
    }

    async fn get_or_create_academic_year(
        &self,
        name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<(AcademicYear, bool)> {
        Ok(self
            .tables()?
            .ensure_academic_year(name, start_date, end_date))
    }

    async fn enrollment(
        &self,
        student: StudentId,
        level: LevelId,
        year: AcademicYearId,
    ) -> Result<Option<Enrollment>> {
        Ok(self
            .tables()?
            .enrollments
            .iter()
            .find(|e| e.student_id == student && e.level_id == level && e.academic_year_id == year)
            .cloned())
    }

    async fn enrollments_for_level(
        &self,
        level: LevelId,
        year: AcademicYearId,
    ) -> Result<Vec<Enrollment>> {
        let mut enrollments: Vec<Enrollment> = self
            .tables()?
            .enrollments
            .iter()
            .filter(|e| e.level_id == level && e.academic_year_id == year)
            .cloned()
            .collect();
        enrollments.sort_by_key(|e| e.id);
        Ok(enrollments)
    }

    async fn upsert_enrollment(
        &self,
        student: StudentId,
        level: LevelId,
        year: AcademicYearId,
        date_enrolled: NaiveDate,
        status: EnrollmentStatus,
    ) -> Result<(Enrollment, bool)> {
        Ok(self
            .tables()?
            .upsert_enrollment(student, level, year, date_enrolled, status))
    }

    async fn set_enrollment_status(
        &self,
        enrollment: EnrollmentId,
        status: EnrollmentStatus,
    ) -> Result<()> {
        let mut tables = self.tables()?;
        let row = tables
            .enrollments
            .iter_mut()
            .find(|e| e.id == enrollment)
            .with_context(|| format!("enrollment {enrollment} does not exist"))?;
        row.status = status;
        Ok(())
    }

    async fn grades_for_enrollment(&self, enrollment: EnrollmentId) -> Result<Vec<Grade>> {
        Ok(self
            .tables()?
            .grades
            .iter()
            .filter(|g| g.enrollment_id == enrollment)
            .cloned()
            .collect())
    }

    async fn upsert_grade(
        &self,
        enrollment: EnrollmentId,
        subject: SubjectId,
        period: PeriodCode,
        score: u8,
        at: DateTime<Utc>,
    ) -> Result<(Grade, bool)> {
        let mut tables = self.tables()?;
        if let Some(existing) = tables.grades.iter_mut().find(|g| {
            g.enrollment_id == enrollment && g.subject_id == subject && g.period == period
        }) {
            existing.score = score;
            existing.updated_at = at;
            return Ok((existing.clone(), false));
        }
        let grade = Grade {
            id: GradeId(tables.next_id()),
            enrollment_id: enrollment,
            subject_id: subject,
            period,
            score,
            updated_at: at,
        };
        tables.grades.push(grade.clone());
        Ok((grade, true))
    }

    async fn latest_grade_update(
        &self,
        level: LevelId,
        student: Option<StudentId>,
        year: AcademicYearId,
    ) -> Result<Option<DateTime<Utc>>> {
        let tables = self.tables()?;
        let scope = tables.enrollment_ids(level, student, year);
        Ok(tables
            .grades
            .iter()
            .filter(|g| scope.contains(&g.enrollment_id))
            .map(|g| g.updated_at)
            .max())
    }

    async fn grade_policy(&self, level: LevelId) -> Result<Option<GradePolicy>> {
        Ok(self
            .tables()?
            .policies
            .iter()
            .find(|p| p.level_id == level)
            .cloned())
    }

    async fn status(
        &self,
        student: StudentId,
        level: LevelId,
        year: AcademicYearId,
    ) -> Result<Option<PassFailedStatus>> {
        Ok(self
            .tables()?
            .statuses
            .iter()
            .find(|s| s.student_id == student && s.level_id == level && s.academic_year_id == year)
            .cloned())
    }

    async fn statuses_for_level(
        &self,
        level: LevelId,
        year: AcademicYearId,
    ) -> Result<Vec<PassFailedStatus>> {
        Ok(self
            .tables()?
            .statuses
            .iter()
            .filter(|s| s.level_id == level && s.academic_year_id == year)
            .cloned()
            .collect())
    }

    async fn upsert_status(&self, update: StatusUpdate) -> Result<(PassFailedStatus, bool)> {
        let mut tables = self.tables()?;
        let template_name = update.status.template_name().to_string();
        if let Some(existing) = tables.statuses.iter_mut().find(|s| {
            s.student_id == update.student_id
                && s.level_id == update.level_id
                && s.academic_year_id == update.academic_year_id
        }) {
            existing.status = update.status;
            existing.grades_complete = update.grades_complete;
            existing.template_name = template_name;
            existing.updated_at = update.at;
            if update.enrollment_id.is_some() {
                existing.enrollment_id = update.enrollment_id;
            }
            if update.validated_by.is_some() {
                existing.validated_by = update.validated_by;
                existing.validated_at = update.validated_at;
            }
            return Ok((existing.clone(), false));
        }
        let record = PassFailedStatus {
            id: StatusId(tables.next_id()),
            student_id: update.student_id,
            level_id: update.level_id,
            academic_year_id: update.academic_year_id,
            enrollment_id: update.enrollment_id,
            status: update.status,
            grades_complete: update.grades_complete,
            validated_by: update.validated_by,
            validated_at: update.validated_at,
            template_name,
            updated_at: update.at,
        };
        tables.statuses.push(record.clone());
        Ok((record, true))
    }

    async fn latest_status_update(
        &self,
        level: LevelId,
        student: Option<StudentId>,
        year: AcademicYearId,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .tables()?
            .statuses
            .iter()
            .filter(|s| s.level_id == level && s.academic_year_id == year)
            .filter(|s| student.map_or(true, |id| s.student_id == id))
            .map(|s| s.updated_at)
            .max())
    }

    async fn artifact(&self, key: &ArtifactKey) -> Result<Option<ReportArtifact>> {
        Ok(self
            .tables()?
            .artifacts
            .iter()
            .find(|a| a.key == *key)
            .cloned())
    }

    async fn artifacts_for_level(
        &self,
        level: LevelId,
        year: AcademicYearId,
    ) -> Result<Vec<ReportArtifact>> {
        Ok(self
            .tables()?
            .artifacts
            .iter()
            .filter(|a| a.key.level_id == level && a.key.academic_year_id == year)
            .cloned()
            .collect())
    }

    async fn put_artifact(&self, artifact: ReportArtifact) -> Result<ReportArtifact> {
        let mut tables = self.tables()?;
        if let Some(existing) = tables.artifacts.iter_mut().find(|a| a.key == artifact.key) {
            existing.path = artifact.path;
            existing.filename = artifact.filename;
            existing.generated_at = artifact.generated_at;
            return Ok(existing.clone());
        }
        tables.artifacts.push(artifact.clone());
        Ok(artifact)
    }

    async fn remove_artifact(&self, key: &ArtifactKey) -> Result<Option<ReportArtifact>> {
        let mut tables = self.tables()?;
        let position = tables.artifacts.iter().position(|a| a.key == *key);
        Ok(position.map(|i| tables.artifacts.remove(i)))
    }

    async fn artifacts_generated_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ReportArtifact>> {
        Ok(self
            .tables()?
            .artifacts
            .iter()
            .filter(|a| a.generated_at < cutoff)
            .cloned()
            .collect())
    }
}
