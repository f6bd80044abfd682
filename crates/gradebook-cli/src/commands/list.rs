//! The `gradebook list` command.

use std::path::PathBuf;

use anyhow::{bail, Result};
use comfy_table::{Cell, Table};

use gradebook_core::traits::SchoolStore;

use super::context::{display_path, Context};

pub async fn execute(
    what: String,
    level: Option<String>,
    year: Option<String>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let ctx = Context::load(config_path)?;
    let mut table = Table::new();

    match what.as_str() {
        "students" => {
            table.set_header(vec!["ID", "Name"]);
            for student in ctx.store.students()? {
                table.add_row(vec![Cell::new(student.id), Cell::new(student.full_name())]);
            }
        }
        "levels" => {
            table.set_header(vec!["ID", "Level", "Subjects"]);
            for level in ctx.store.levels()? {
                let subjects = ctx.store.subjects_for_level(level.id).await?;
                let names: Vec<_> = subjects.iter().map(|s| s.name.as_str()).collect();
                table.add_row(vec![
                    Cell::new(level.id),
                    Cell::new(&level.name),
                    Cell::new(names.join(", ")),
                ]);
            }
        }
        "years" => {
            table.set_header(vec!["ID", "Academic year", "Start", "End"]);
            for year in ctx.store.academic_years()? {
                table.add_row(vec![
                    Cell::new(year.id),
                    Cell::new(&year.name),
                    Cell::new(year.start_date),
                    Cell::new(year.end_date),
                ]);
            }
        }
        "statuses" => {
            let (Some(level), Some(year)) = (level, year) else {
                bail!("listing statuses requires --level and --year");
            };
            let level = ctx.engine.require_level(&level).await?;
            let year = ctx.engine.require_academic_year(&year).await?;
            table.set_header(vec![
                "Student",
                "Status",
                "Grades complete",
                "Validated by",
                "Template",
            ]);
            for record in ctx.store.statuses_for_level(level.id, year.id).await? {
                table.add_row(vec![
                    Cell::new(record.student_id),
                    Cell::new(record.status),
                    Cell::new(if record.grades_complete { "yes" } else { "no" }),
                    Cell::new(record.validated_by.as_deref().unwrap_or("-")),
                    Cell::new(&record.template_name),
                ]);
            }
        }
        "reports" => {
            table.set_header(vec!["Report", "Path", "Generated"]);
            for artifact in ctx.store.artifacts()? {
                table.add_row(vec![
                    Cell::new(&artifact.key),
                    Cell::new(display_path(&artifact.path)),
                    Cell::new(artifact.generated_at.format("%Y-%m-%d %H:%M:%S")),
                ]);
            }
        }
        other => bail!(
            "unknown list target '{other}' (expected students, levels, years, statuses or reports)"
        ),
    }

    println!("{table}");
    Ok(())
}
