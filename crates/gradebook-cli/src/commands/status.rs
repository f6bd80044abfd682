//! The `gradebook status`, `validate-status` and `promote` commands.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use gradebook_core::engine::StatusEvaluation;
use gradebook_core::error::GradebookError;
use gradebook_core::model::{Status, StudentId};
use gradebook_core::traits::SchoolStore;

use super::context::Context;

pub async fn execute(
    level: String,
    year: String,
    student: Option<u64>,
    init_only: bool,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let ctx = Context::load(config_path)?;
    let level = ctx.engine.require_level(&level).await?;
    let year = ctx.engine.require_academic_year(&year).await?;

    if init_only {
        let records = ctx.engine.initialize_statuses(level.id, year.id).await?;
        let mut table = Table::new();
        table.set_header(vec!["Student", "Status", "Grades complete"]);
        for record in &records {
            table.add_row(vec![
                Cell::new(record.student_id),
                Cell::new(record.status),
                Cell::new(yes_no(record.grades_complete)),
            ]);
        }
        println!("{table}");
        return ctx.save();
    }

    let (evaluations, failures) = match student {
        Some(id) => {
            let evaluation = ctx
                .engine
                .compute_status(StudentId(id), level.id, year.id)
                .await?;
            (vec![evaluation], Vec::new())
        }
        None => {
            let result = ctx.engine.evaluate_level(level.id, year.id).await?;
            (result.evaluations, result.failures)
        }
    };

    print_evaluations(&evaluations);
    for (student, message) in &failures {
        eprintln!("  student {student}: {message}");
    }
    println!(
        "Level {} ({}): {} evaluated, {} failed",
        level.name,
        year.name,
        evaluations.len(),
        failures.len()
    );

    ctx.save()
}

pub async fn validate(
    student: u64,
    level: String,
    year: String,
    status: String,
    validated_by: String,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let status: Status = status.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    anyhow::ensure!(!validated_by.trim().is_empty(), "--by must not be empty");

    let ctx = Context::load(config_path)?;
    let level = ctx.engine.require_level(&level).await?;
    let year = ctx.engine.require_academic_year(&year).await?;
    let evaluation = ctx
        .engine
        .validate_status(StudentId(student), level.id, year.id, status, &validated_by)
        .await?;

    print_evaluations(std::slice::from_ref(&evaluation));
    ctx.save()
}

pub async fn promote(
    student: u64,
    level: String,
    year: String,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let ctx = Context::load(config_path)?;
    let level = ctx.engine.require_level(&level).await?;
    let year = ctx.engine.require_academic_year(&year).await?;
    let student = StudentId(student);

    let record = ctx
        .engine
        .store()
        .status(student, level.id, year.id)
        .await?
        .ok_or_else(|| {
            GradebookError::not_found(format!(
                "status of student {student} in level {} for {}",
                level.name, year.name
            ))
        })?;

    let outcome = ctx.engine.promote_if_eligible(&record).await?;
    println!("Student {student}: {outcome}");
    ctx.save()
}

fn print_evaluations(evaluations: &[StatusEvaluation]) {
    let mut table = Table::new();
    table.set_header(vec![
        "Student",
        "Status",
        "Grades complete",
        "Validated by",
        "Promotion",
    ]);
    for evaluation in evaluations {
        let record = &evaluation.record;
        table.add_row(vec![
            Cell::new(record.student_id),
            Cell::new(record.status),
            Cell::new(yes_no(record.grades_complete)),
            Cell::new(record.validated_by.as_deref().unwrap_or("-")),
            Cell::new(
                evaluation
                    .promotion
                    .as_ref()
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]);
    }
    println!("{table}");
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
