//! The `gradebook init` command.

use std::path::Path;

use anyhow::Result;

use gradebook_report::html::write_default_templates;

pub fn execute(force: bool) -> Result<()> {
    write_if_missing(Path::new("gradebook.toml"), SAMPLE_CONFIG)?;

    let written = write_default_templates(Path::new("templates"), force)?;
    if written.is_empty() {
        println!("templates/ already populated, skipping.");
    } else {
        println!("Created {} template(s) in templates/", written.len());
    }

    write_if_missing(Path::new("school.toml"), SAMPLE_SCHOOL)?;
    std::fs::create_dir_all("grades")?;
    write_if_missing(Path::new("grades/mathematics-1st.toml"), SAMPLE_GRADES)?;

    println!("\nNext steps:");
    println!("  1. Point [converter] in gradebook.toml at your conversion service");
    println!("  2. Run: gradebook validate --school school.toml");
    println!("  3. Run: gradebook import --school school.toml");
    println!("  4. Run: gradebook grades --batch grades/mathematics-1st.toml");

    Ok(())
}

fn write_if_missing(path: &Path, content: &str) -> Result<()> {
    if path.exists() {
        println!("{} already exists, skipping.", path.display());
    } else {
        std::fs::write(path, content)?;
        println!("Created {}", path.display());
    }
    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# gradebook configuration

data_path = "./gradebook.json"
templates_dir = "./templates"
output_dir = "./output_gradesheets"
media_url = "/media/"
retention_days = 2
max_conversion_attempts = 3
retry_delay_ms = 2000
render_parallelism = 4
pair_yearly_level_reports = true

# Gotenberg-compatible conversion service
[converter]
type = "http"
base_url = "http://localhost:3000"
# api_key = "${GRADEBOOK_CONVERTER_KEY}"

# Local programs instead:
# [converter]
# type = "command"
# program = "wkhtmltopdf"
# args = ["--quiet", "{input}", "{output}"]
# merge_program = "pdfunite"
# merge_args = ["{inputs}", "{output}"]
"#;

const SAMPLE_SCHOOL: &str = r#"[[academic_years]]
name = "2024/2025"

[[levels]]
name = "7"
subjects = ["Mathematics", "Science", "History"]

[levels.policy]
period_weight = 0.5
exam_weight = 0.5
required_grade_count = 8
passing_threshold = 50
conditional_threshold = 40

[[levels]]
name = "8"
subjects = ["Mathematics", "Science", "History"]

[[students]]
id = 1
first_name = "Ana"
last_name = "Lopez"

[[students.enrollments]]
level = "7"
academic_year = "2024/2025"

[[students]]
id = 2
first_name = "Ben"
last_name = "Okafor"

[[students.enrollments]]
level = "7"
academic_year = "2024/2025"
"#;

const SAMPLE_GRADES: &str = r#"level = "7"
academic_year = "2024/2025"
subject = "Mathematics"
period = "1st"

[[entries]]
student_id = 1
score = 80

[[entries]]
student_id = 2
score = 64
"#;
