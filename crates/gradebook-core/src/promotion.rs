//! Level promotion.
//!
//! A PASS or CONDITIONAL status moves the student into level N+1 for the
//! following academic year. Every reason not to promote is a
//! [`PromotionOutcome`] variant rather than an error, and repeating a
//! promotion leaves exactly one target enrollment and one target year.

use std::fmt;

use serde::Serialize;

use crate::error::{GradebookError, Result};
use crate::model::{AcademicYear, Enrollment, EnrollmentStatus, PassFailedStatus, Status};
use crate::policy::ReferenceCache;
use crate::traits::SchoolStore;

/// Where a promotion attempt ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PromotionOutcome {
    Promoted {
        enrollment: Enrollment,
        academic_year: AcademicYear,
        created_enrollment: bool,
        created_academic_year: bool,
    },
    /// Only PASS and CONDITIONAL promote.
    NotEligible { status: Status },
    NonNumericLevel { level: String },
    NoNextLevel { level: String },
    InvalidAcademicYear { academic_year: String },
    NoCurrentEnrollment,
}

impl PromotionOutcome {
    pub fn is_promoted(&self) -> bool {
        matches!(self, PromotionOutcome::Promoted { .. })
    }
}

impl fmt::Display for PromotionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromotionOutcome::Promoted {
                academic_year,
                created_enrollment,
                ..
            } => {
                let verb = if *created_enrollment {
                    "enrolled"
                } else {
                    "re-enrolled"
                };
                write!(f, "promoted ({verb} for {})", academic_year.name)
            }
            PromotionOutcome::NotEligible { status } => {
                write!(f, "not eligible (status {status})")
            }
            PromotionOutcome::NonNumericLevel { level } => {
                write!(f, "level '{level}' is not numeric")
            }
            PromotionOutcome::NoNextLevel { level } => {
                write!(f, "no level after '{level}'")
            }
            PromotionOutcome::InvalidAcademicYear { academic_year } => {
                write!(f, "cannot derive the year after '{academic_year}'")
            }
            PromotionOutcome::NoCurrentEnrollment => write!(f, "no current enrollment"),
        }
    }
}

/// Promote the student behind `record` if its status allows it.
pub async fn promote_if_eligible(
    store: &dyn SchoolStore,
    references: &ReferenceCache,
    record: &PassFailedStatus,
) -> Result<PromotionOutcome> {
    if !record.status.is_promotable() {
        return Ok(PromotionOutcome::NotEligible {
            status: record.status,
        });
    }

    let Some(level) = references.level(record.level_id).await? else {
        return Err(GradebookError::not_found(format!(
            "level {}",
            record.level_id
        )));
    };
    let Some(ordinal) = level.ordinal() else {
        tracing::warn!(level = %level.name, "level is not numeric, skipping promotion");
        return Ok(PromotionOutcome::NonNumericLevel { level: level.name });
    };
    let next_name = (ordinal + 1).to_string();
    let Some(next_level) = references.level_by_name(&next_name).await? else {
        tracing::info!(level = %level.name, "no next level, skipping promotion");
        return Ok(PromotionOutcome::NoNextLevel { level: level.name });
    };

    let Some(current_year) = references.academic_year(record.academic_year_id).await? else {
        return Err(GradebookError::not_found(format!(
            "academic year {}",
            record.academic_year_id
        )));
    };
    let target = AcademicYear::successor_name(&current_year.name).and_then(|name| {
        let (start, _) = AcademicYear::parse_name(&name)?;
        let (start_date, end_date) = AcademicYear::default_bounds(start)?;
        Some((name, start_date, end_date))
    });
    let Some((target_name, start_date, end_date)) = target else {
        tracing::warn!(
            year = %current_year.name,
            "academic year name is malformed, skipping promotion"
        );
        return Ok(PromotionOutcome::InvalidAcademicYear {
            academic_year: current_year.name,
        });
    };

    let Some(current) = store
        .enrollment(record.student_id, record.level_id, record.academic_year_id)
        .await?
    else {
        tracing::warn!(student = %record.student_id, "no current enrollment, skipping promotion");
        return Ok(PromotionOutcome::NoCurrentEnrollment);
    };

    let (academic_year, created_academic_year) = store
        .get_or_create_academic_year(&target_name, start_date, end_date)
        .await?;
    if created_academic_year {
        references.invalidate_academic_years();
        tracing::info!(year = %academic_year.name, "created academic year");
    }

    let (enrollment, created_enrollment) = store
        .upsert_enrollment(
            record.student_id,
            next_level.id,
            academic_year.id,
            academic_year.start_date,
            EnrollmentStatus::Enrolled,
        )
        .await?;
    store
        .set_enrollment_status(current.id, EnrollmentStatus::Promoted)
        .await?;

    tracing::info!(
        student = %record.student_id,
        from = %level.name,
        to = %next_level.name,
        year = %academic_year.name,
        created_enrollment,
        "student promoted"
    );

    Ok(PromotionOutcome::Promoted {
        enrollment,
        academic_year,
        created_enrollment,
        created_academic_year,
    })
}
