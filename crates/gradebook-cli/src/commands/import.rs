//! The `gradebook import` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::Table;

use gradebook_core::parser::{parse_school, validate_school};

use super::context::Context;

pub fn execute(school_path: PathBuf, config_path: Option<PathBuf>) -> Result<()> {
    let seed = parse_school(&school_path)?;
    for w in validate_school(&seed) {
        eprintln!("Warning: {}", w.message);
    }

    let ctx = Context::load(config_path)?;
    let summary = ctx.store.import_seed(&seed)?;
    ctx.engine.references().clear();
    ctx.save()?;

    let mut table = Table::new();
    table.set_header(vec!["Record", "Created"]);
    table.add_row(vec!["Levels".to_string(), summary.levels.to_string()]);
    table.add_row(vec!["Subjects".to_string(), summary.subjects.to_string()]);
    table.add_row(vec![
        "Academic years".to_string(),
        summary.academic_years.to_string(),
    ]);
    table.add_row(vec!["Students".to_string(), summary.students.to_string()]);
    table.add_row(vec![
        "Enrollments".to_string(),
        summary.enrollments.to_string(),
    ]);
    println!("{table}");
    println!("Imported into {}", ctx.config.data_path.display());

    Ok(())
}
