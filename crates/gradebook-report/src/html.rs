//! Built-in HTML report templates.
//!
//! `gradebook init` writes these into the templates directory; schools are
//! expected to restyle them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::render::MIN_ROWS;
use crate::template::TemplateId;

/// Escape a string for safe HTML insertion.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// An empty page used to pad paired level reports.
pub const BLANK_PAGE_HTML: &str = "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><style>@page { size: A4; margin: 0; }</style></head><body></body></html>\n";

/// File name of a pre-converted filler page in the templates directory.
pub const BLANK_PAGE_FILE: &str = "blank_page.pdf";

/// Source of the built-in template for `id`.
pub fn builtin_template(id: TemplateId) -> String {
    match id {
        TemplateId::ReportCardPeriodic => page("Report card", None, &periodic_table()),
        TemplateId::ReportCardDefault => page("Report card", None, &yearly_table()),
        TemplateId::YearlyCardPass => page(
            "Yearly report card",
            Some(("pass", "Promoted to the next level")),
            &yearly_table(),
        ),
        TemplateId::YearlyCardConditional => page(
            "Yearly report card",
            Some(("conditional", "Promoted on condition")),
            &yearly_table(),
        ),
        TemplateId::YearlyCardFail => page(
            "Yearly report card",
            Some(("fail", "Not promoted")),
            &yearly_table(),
        ),
    }
}

/// Write every built-in template into `dir`.
///
/// Existing files are kept unless `overwrite` is set. Returns the files
/// that were written.
pub fn write_default_templates(dir: &Path, overwrite: bool) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let mut written = Vec::new();
    for id in TemplateId::ALL {
        let path = dir.join(id.file_name());
        if path.exists() && !overwrite {
            continue;
        }
        std::fs::write(&path, builtin_template(id))
            .with_context(|| format!("failed to write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

fn page(title: &str, banner: Option<(&str, &str)>, table: &str) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("<meta charset=\"utf-8\">\n");
    html.push_str(&format!("<title>{title}: {{{{name}}}}</title>\n"));
    html.push_str("<style>\n");
    html.push_str(CSS);
    html.push_str("</style>\n</head>\n<body>\n");

    html.push_str("<header>\n");
    html.push_str(&format!("<h1>{title}</h1>\n"));
    html.push_str("<p class=\"meta\">Student: <strong>{{name}}</strong> | Level {{level}} | {{academic_year}}</p>\n");
    html.push_str("</header>\n");

    if let Some((class, text)) = banner {
        html.push_str(&format!(
            "<p class=\"banner {class}\">{text} ({{{{status}}}})</p>\n"
        ));
    } else {
        html.push_str("<p class=\"banner\">Status: {{status}}</p>\n");
    }

    html.push_str(table);
    html.push_str("</body>\n</html>\n");
    html
}

fn periodic_table() -> String {
    let mut table = String::from(
        "<table>\n<thead><tr><th>Subject</th><th>1</th><th>2</th><th>3</th><th>Exam 1</th><th>Sem. 1</th><th>4</th><th>5</th><th>6</th><th>Exam 2</th><th>Sem. 2</th><th>Final</th></tr></thead>\n<tbody>\n",
    );
    for i in 0..MIN_ROWS {
        table.push_str(&format!(
            "<tr><td>{{{{s[{i}].sn}}}}</td><td>{{{{s[{i}].1}}}}</td><td>{{{{s[{i}].2}}}}</td><td>{{{{s[{i}].3}}}}</td><td>{{{{s[{i}][\"1s\"]}}}}</td><td>{{{{s[{i}].1a}}}}</td><td>{{{{s[{i}].4}}}}</td><td>{{{{s[{i}].5}}}}</td><td>{{{{s[{i}].6}}}}</td><td>{{{{s[{i}][\"2s\"]}}}}</td><td>{{{{s[{i}].2a}}}}</td><td>{{{{s[{i}].f}}}}</td></tr>\n"
        ));
    }
    table.push_str("</tbody></table>\n");
    table
}

fn yearly_table() -> String {
    let mut table = String::from(
        "<table>\n<thead><tr><th>Subject</th><th>Semester 1</th><th>Semester 2</th><th>Final</th></tr></thead>\n<tbody>\n",
    );
    for i in 0..MIN_ROWS {
        table.push_str(&format!(
            "<tr><td>{{{{s[{i}].sn}}}}</td><td>{{{{s[{i}].1a}}}}</td><td>{{{{s[{i}].2a}}}}</td><td>{{{{s[{i}].f}}}}</td></tr>\n"
        ));
    }
    table.push_str("</tbody></table>\n");
    table
}

const CSS: &str = r#"
@page { size: A4; margin: 1.5cm; }
body { font-family: 'DejaVu Sans', Arial, sans-serif; font-size: 11pt; color: #1a1a1a; }
h1 { font-size: 16pt; margin: 0 0 0.5rem 0; }
.meta { color: #4b5563; }
.banner { padding: 0.4rem 0.8rem; border: 1px solid #d1d5db; font-weight: bold; }
.banner.pass { background: #dcfce7; }
.banner.conditional { background: #fef9c3; }
.banner.fail { background: #fde2e2; }
table { border-collapse: collapse; width: 100%; margin-top: 1rem; }
th, td { border: 1px solid #d1d5db; padding: 0.3rem 0.5rem; text-align: center; }
td:first-child, th:first-child { text-align: left; }
th { background: #f3f4f6; }
"#;
