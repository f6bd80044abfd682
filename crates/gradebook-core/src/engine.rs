//! Central grading engine.
//!
//! Ties the record store, the reference cache, evaluation and promotion
//! together behind the operations callers use: status computation,
//! explicit validation, promotion, bulk grade input and grade sheets.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::aggregate::{GradeSheet, SubjectRow};
use crate::error::{GradebookError, Result};
use crate::evaluate::{evaluate, Evaluation};
use crate::grades::{record_grades, BatchResult, GradeBatch};
use crate::model::{
    AcademicYear, AcademicYearId, Enrollment, Level, LevelId, PassFailedStatus, Status,
    StatusUpdate, StudentId,
};
use crate::policy::{ReferenceCache, DEFAULT_REFERENCE_TTL};
use crate::promotion::{self, PromotionOutcome};
use crate::traits::SchoolStore;

/// Configuration for the grading engine.
#[derive(Debug, Clone)]
pub struct GradingEngineConfig {
    /// Promote automatically when a computed or validated status allows it.
    pub auto_promote: bool,
    /// Lifetime of cached reference data.
    pub reference_ttl: Duration,
}

impl Default for GradingEngineConfig {
    fn default() -> Self {
        Self {
            auto_promote: true,
            reference_ttl: DEFAULT_REFERENCE_TTL,
        }
    }
}

/// Result of computing or validating one status.
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvaluation {
    pub record: PassFailedStatus,
    /// `true` when the status row did not exist before.
    pub created: bool,
    /// Present when promotion was attempted.
    pub promotion: Option<PromotionOutcome>,
}

/// Result of evaluating every enrollment of a level.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LevelEvaluation {
    pub evaluations: Vec<StatusEvaluation>,
    /// Students whose evaluation failed, with the reason.
    pub failures: Vec<(StudentId, String)>,
}

/// The central grading engine.
pub struct GradingEngine {
    store: Arc<dyn SchoolStore>,
    references: Arc<ReferenceCache>,
    config: GradingEngineConfig,
}

impl GradingEngine {
    pub fn new(store: Arc<dyn SchoolStore>, config: GradingEngineConfig) -> Self {
        let references = Arc::new(ReferenceCache::new(
            Arc::clone(&store),
            config.reference_ttl,
        ));
        Self {
            store,
            references,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn SchoolStore> {
        &self.store
    }

    pub fn references(&self) -> &Arc<ReferenceCache> {
        &self.references
    }

    /// Look up a level by name, as a not-found error when absent.
    pub async fn require_level(&self, name: &str) -> Result<Level> {
        self.references
            .level_by_name(name)
            .await?
            .ok_or_else(|| GradebookError::not_found(format!("level '{name}'")))
    }

    /// Look up an academic year by name, as a not-found error when absent.
    pub async fn require_academic_year(&self, name: &str) -> Result<AcademicYear> {
        self.references
            .academic_year_by_name(name)
            .await?
            .ok_or_else(|| GradebookError::not_found(format!("academic year '{name}'")))
    }

    async fn require_enrollment(
        &self,
        student: StudentId,
        level: LevelId,
        year: AcademicYearId,
    ) -> Result<Enrollment> {
        self.store
            .enrollment(student, level, year)
            .await?
            .ok_or_else(|| {
                GradebookError::not_found(format!(
                    "enrollment of student {student} in level {level} for year {year}"
                ))
            })
    }

    async fn evaluate_enrollment(&self, enrollment: &Enrollment) -> Result<Evaluation> {
        let subjects = self.references.subjects(enrollment.level_id).await?;
        let policy = self.references.policy(enrollment.level_id).await?;
        let grades = self.store.grades_for_enrollment(enrollment.id).await?;
        Ok(evaluate(&subjects, &grades, &policy))
    }

    /// Derive and store the status of a student for a level and year.
    ///
    /// PASS and CONDITIONAL trigger promotion when `auto_promote` is set.
    pub async fn compute_status(
        &self,
        student: StudentId,
        level: LevelId,
        year: AcademicYearId,
    ) -> Result<StatusEvaluation> {
        let enrollment = self.require_enrollment(student, level, year).await?;
        let evaluation = self.evaluate_enrollment(&enrollment).await?;

        let (record, created) = self
            .store
            .upsert_status(StatusUpdate {
                student_id: student,
                level_id: level,
                academic_year_id: year,
                enrollment_id: Some(enrollment.id),
                status: evaluation.status,
                grades_complete: evaluation.grades_complete(),
                validated_by: None,
                validated_at: None,
                at: Utc::now(),
            })
            .await?;
        tracing::info!(
            student = %student,
            level = %level,
            year = %year,
            status = %record.status,
            created,
            "status computed"
        );

        let promotion = if self.config.auto_promote && record.status.is_promotable() {
            Some(self.promote_if_eligible(&record).await?)
        } else {
            None
        };

        Ok(StatusEvaluation {
            record,
            created,
            promotion,
        })
    }

    /// Promote the student behind `record` if its status allows it.
    pub async fn promote_if_eligible(&self, record: &PassFailedStatus) -> Result<PromotionOutcome> {
        promotion::promote_if_eligible(self.store.as_ref(), &self.references, record).await
    }

    /// Set a status by hand, recording who validated it.
    ///
    /// Decisions (PASS, FAIL, CONDITIONAL) are only accepted once the
    /// student's grades are complete.
    pub async fn validate_status(
        &self,
        student: StudentId,
        level: LevelId,
        year: AcademicYearId,
        status: Status,
        validated_by: &str,
    ) -> Result<StatusEvaluation> {
        let enrollment = self.require_enrollment(student, level, year).await?;
        let grades_complete = match self.store.status(student, level, year).await? {
            Some(existing) => existing.grades_complete,
            None => self.evaluate_enrollment(&enrollment).await?.grades_complete(),
        };
        if status.is_decision() && !grades_complete {
            return Err(GradebookError::validation(format!(
                "cannot mark student {student} as {status}: grades are incomplete"
            )));
        }

        let now = Utc::now();
        let (record, created) = self
            .store
            .upsert_status(StatusUpdate {
                student_id: student,
                level_id: level,
                academic_year_id: year,
                enrollment_id: Some(enrollment.id),
                status,
                grades_complete,
                validated_by: Some(validated_by.to_string()),
                validated_at: Some(now),
                at: now,
            })
            .await?;
        tracing::info!(
            student = %student,
            status = %record.status,
            validated_by,
            "status validated"
        );

        let promotion = if self.config.auto_promote && record.status.is_promotable() {
            Some(self.promote_if_eligible(&record).await?)
        } else {
            None
        };

        Ok(StatusEvaluation {
            record,
            created,
            promotion,
        })
    }

    /// Create missing status rows for every enrollment of a level.
    ///
    /// New rows are PENDING when the enrollment already has a full set of
    /// grades and INCOMPLETE otherwise. Returns every row, new or not, in
    /// enrollment order.
    pub async fn initialize_statuses(
        &self,
        level: LevelId,
        year: AcademicYearId,
    ) -> Result<Vec<PassFailedStatus>> {
        let enrollments = self.store.enrollments_for_level(level, year).await?;
        let subjects = self.references.subjects(level).await?;
        let policy = self.references.policy(level).await?;
        let expected = subjects.len() * policy.required_grade_count as usize;

        let mut records = Vec::with_capacity(enrollments.len());
        let mut created_count = 0usize;
        for enrollment in &enrollments {
            if let Some(existing) = self
                .store
                .status(enrollment.student_id, level, year)
                .await?
            {
                records.push(existing);
                continue;
            }
            let grade_count = self.store.grades_for_enrollment(enrollment.id).await?.len();
            let status = if expected > 0 && grade_count >= expected {
                Status::Pending
            } else {
                Status::Incomplete
            };
            let (record, _) = self
                .store
                .upsert_status(StatusUpdate {
                    student_id: enrollment.student_id,
                    level_id: level,
                    academic_year_id: year,
                    enrollment_id: Some(enrollment.id),
                    status,
                    grades_complete: status != Status::Incomplete,
                    validated_by: None,
                    validated_at: None,
                    at: Utc::now(),
                })
                .await?;
            created_count += 1;
            records.push(record);
        }

        tracing::info!(
            level = %level,
            year = %year,
            created = created_count,
            total = records.len(),
            "statuses initialized"
        );
        Ok(records)
    }

    /// Compute the status of every student enrolled in a level.
    ///
    /// A failure for one student is recorded and does not stop the rest.
    pub async fn evaluate_level(
        &self,
        level: LevelId,
        year: AcademicYearId,
    ) -> Result<LevelEvaluation> {
        let enrollments = self.store.enrollments_for_level(level, year).await?;
        let mut result = LevelEvaluation::default();
        for enrollment in enrollments {
            match self.compute_status(enrollment.student_id, level, year).await {
                Ok(evaluation) => result.evaluations.push(evaluation),
                Err(e) => {
                    tracing::error!(
                        student = %enrollment.student_id,
                        "status evaluation failed: {e:#}"
                    );
                    result.failures.push((enrollment.student_id, e.to_string()));
                }
            }
        }
        Ok(result)
    }

    /// Record a batch of grades. See [`record_grades`].
    pub async fn record_grades(&self, batch: &GradeBatch) -> Result<BatchResult> {
        record_grades(self.store.as_ref(), &self.references, batch, Utc::now()).await
    }

    /// Build the grade sheet shown on a student's report card.
    pub async fn grade_sheet(
        &self,
        student: StudentId,
        level: LevelId,
        year: AcademicYearId,
    ) -> Result<GradeSheet> {
        let enrollment = self.require_enrollment(student, level, year).await?;
        let student_record = self
            .store
            .student(student)
            .await?
            .ok_or_else(|| GradebookError::not_found(format!("student {student}")))?;
        let level_record = self
            .references
            .level(level)
            .await?
            .ok_or_else(|| GradebookError::not_found(format!("level {level}")))?;
        let year_record = self
            .references
            .academic_year(year)
            .await?
            .ok_or_else(|| GradebookError::not_found(format!("academic year {year}")))?;

        let subjects = self.references.subjects(level).await?;
        let policy = self.references.policy(level).await?;
        let grades = self.store.grades_for_enrollment(enrollment.id).await?;
        let status = self
            .store
            .status(student, level, year)
            .await?
            .map(|s| s.status);

        Ok(GradeSheet {
            student_id: student,
            student_name: student_record.full_name(),
            level: level_record.name,
            academic_year: year_record.name,
            status,
            rows: subjects
                .iter()
                .map(|subject| SubjectRow::from_grades(subject, &grades, &policy))
                .collect(),
        })
    }
}
