//! The `gradebook grades` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use gradebook_core::parser::parse_grade_batch;
use gradebook_report::ArtifactCache;

use super::context::Context;

pub async fn execute(
    batch_path: PathBuf,
    evaluate: bool,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let batch = parse_grade_batch(&batch_path)?;
    let ctx = Context::load(config_path)?;

    let level = ctx.engine.require_level(&batch.level).await?;
    let year = ctx.engine.require_academic_year(&batch.academic_year).await?;
    let result = ctx.engine.record_grades(&batch).await?;

    println!(
        "Grades: {} saved, {} skipped, {} rejected (of {})",
        result.saved.len(),
        result.skipped.len(),
        result.errors.len(),
        result.total()
    );
    for item in &result.skipped {
        println!("  skipped student {}: {}", item.student_id, item.message);
    }
    for item in &result.errors {
        println!("  rejected student {}: {}", item.student_id, item.message);
    }

    if !result.affected_students.is_empty() {
        let removed = ArtifactCache::new(ctx.store.clone())
            .invalidate_reports_for_grades(&result.affected_students, level.id, year.id)
            .await?;
        if !removed.is_empty() {
            println!("Invalidated {} cached report(s)", removed.len());
        }
    }

    // Grades are kept even when evaluating them fails below.
    ctx.save()?;

    if evaluate && !result.affected_students.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Student", "Status", "Grades complete"]);
        let mut failed = 0;
        for student in &result.affected_students {
            match ctx.engine.compute_status(*student, level.id, year.id).await {
                Ok(evaluation) => {
                    table.add_row(vec![
                        Cell::new(student),
                        Cell::new(evaluation.record.status),
                        Cell::new(if evaluation.record.grades_complete {
                            "yes"
                        } else {
                            "no"
                        }),
                    ]);
                }
                Err(e) => {
                    eprintln!("  student {student}: status not computed: {e}");
                    failed += 1;
                }
            }
        }
        println!("{table}");
        ctx.save()?;
        anyhow::ensure!(failed == 0, "{failed} status evaluation(s) failed");
    }

    Ok(())
}
