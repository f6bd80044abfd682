//! The `gradebook validate` command.

use std::path::PathBuf;

use anyhow::Result;

use gradebook_core::parser::{parse_school, validate_school};

pub fn execute(school_path: PathBuf) -> Result<()> {
    let seed = parse_school(&school_path)?;
    let enrollments: usize = seed.students.iter().map(|s| s.enrollments.len()).sum();
    println!(
        "School: {} level(s), {} academic year(s), {} student(s), {} enrollment(s)",
        seed.levels.len(),
        seed.academic_years.len(),
        seed.students.len(),
        enrollments
    );

    let warnings = validate_school(&seed);
    for w in &warnings {
        let prefix = w
            .subject
            .as_ref()
            .map(|s| format!("  [{s}]"))
            .unwrap_or_else(|| "  ".to_string());
        println!("{prefix} WARNING: {}", w.message);
    }

    if warnings.is_empty() {
        println!("School dataset valid.");
    } else {
        println!("\n{} warning(s) found.", warnings.len());
    }

    Ok(())
}
