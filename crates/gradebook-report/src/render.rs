//! Template context and placeholder rendering.
//!
//! Templates are HTML with `{{...}}` placeholders:
//!
//! - `{{name}}`, `{{level}}`, `{{academic_year}}`, `{{status}}`
//! - `{{s[i].sn}}` for the subject name of row `i`
//! - `{{s[i].KEY}}` or `{{s[i]["KEY"]}}` for a value of row `i`, where KEY
//!   is a period key (`1 2 3 1s 4 5 6 2s`), a semester average (`1a`, `2a`)
//!   or the final average (`f`)
//!
//! A template is parsed completely before anything is substituted, so a
//! malformed placeholder never produces a half-rendered document.

use std::path::{Path, PathBuf};

use gradebook_core::aggregate::{GradeSheet, SubjectRow};
use gradebook_core::error::{GradebookError, Result};
use gradebook_core::model::PeriodCode;

use crate::html::html_escape;

/// Minimum number of subject rows in a context.
pub const MIN_ROWS: usize = 9;

/// Rendered for any value that is not available.
pub const MISSING_VALUE: &str = "-";

/// A value column of a subject row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKey {
    Period(PeriodCode),
    FirstSemester,
    SecondSemester,
    Final,
}

impl RowKey {
    fn parse(key: &str) -> Option<Self> {
        match key {
            "1a" => Some(RowKey::FirstSemester),
            "2a" => Some(RowKey::SecondSemester),
            "f" => Some(RowKey::Final),
            _ => PeriodCode::ALL
                .into_iter()
                .find(|p| p.template_key() == key)
                .map(RowKey::Period),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Placeholder {
    Name,
    Level,
    AcademicYear,
    Status,
    SubjectName(usize),
    Value(usize, RowKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Field(Placeholder),
}

/// One subject line as seen by a template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowContext {
    pub subject: Option<String>,
    pub scores: [Option<u8>; 8],
    pub first_semester: Option<u32>,
    pub second_semester: Option<u32>,
    pub final_average: Option<u32>,
}

impl RowContext {
    fn value(&self, key: RowKey) -> Option<String> {
        match key {
            RowKey::Period(p) => self.scores[p.index()].map(|v| v.to_string()),
            RowKey::FirstSemester => self.first_semester.map(|v| v.to_string()),
            RowKey::SecondSemester => self.second_semester.map(|v| v.to_string()),
            RowKey::Final => self.final_average.map(|v| v.to_string()),
        }
    }
}

impl From<&SubjectRow> for RowContext {
    fn from(row: &SubjectRow) -> Self {
        Self {
            subject: Some(row.subject.clone()),
            scores: row.scores,
            first_semester: row.first_semester,
            second_semester: row.second_semester,
            final_average: row.final_average,
        }
    }
}

/// Everything a template can refer to.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateContext {
    pub name: String,
    pub level: String,
    pub academic_year: String,
    pub status: Option<String>,
    /// At least [`MIN_ROWS`] entries; extra slots are empty rows.
    pub rows: Vec<RowContext>,
}

impl TemplateContext {
    pub fn from_sheet(sheet: &GradeSheet) -> Self {
        let mut rows: Vec<RowContext> = sheet.rows.iter().map(RowContext::from).collect();
        if rows.len() < MIN_ROWS {
            rows.resize_with(MIN_ROWS, RowContext::default);
        }
        Self {
            name: sheet.student_name.clone(),
            level: sheet.level.clone(),
            academic_year: sheet.academic_year.clone(),
            status: sheet.status.map(|s| s.to_string()),
            rows,
        }
    }

    fn lookup(&self, field: &Placeholder) -> Option<String> {
        match field {
            Placeholder::Name => Some(self.name.clone()),
            Placeholder::Level => Some(self.level.clone()),
            Placeholder::AcademicYear => Some(self.academic_year.clone()),
            Placeholder::Status => self.status.clone(),
            Placeholder::SubjectName(i) => self.rows.get(*i).and_then(|r| r.subject.clone()),
            Placeholder::Value(i, key) => self.rows.get(*i).and_then(|r| r.value(*key)),
        }
    }
}

/// A parsed template.
#[derive(Debug, Clone)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parse `source`, rejecting unknown or malformed placeholders.
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                return Err(GradebookError::Template(format!(
                    "unterminated placeholder at byte {}",
                    offset + start
                )));
            };
            let inner = after[..end].trim();
            let field = parse_placeholder(inner).ok_or_else(|| {
                GradebookError::Template(format!(
                    "unknown placeholder '{{{{{inner}}}}}' at byte {}",
                    offset + start
                ))
            })?;
            segments.push(Segment::Field(field));

            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }
        Ok(Self { segments })
    }

    /// Fill every placeholder from `context`.
    pub fn render(&self, context: &TemplateContext) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Field(field) => match context.lookup(field) {
                    Some(value) if !value.is_empty() => out.push_str(&html_escape(&value)),
                    _ => out.push_str(MISSING_VALUE),
                },
            }
        }
        out
    }

    /// Number of placeholders in the template.
    pub fn placeholder_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Field(_)))
            .count()
    }
}

fn parse_placeholder(inner: &str) -> Option<Placeholder> {
    match inner {
        "name" => return Some(Placeholder::Name),
        "level" => return Some(Placeholder::Level),
        "academic_year" => return Some(Placeholder::AcademicYear),
        "status" => return Some(Placeholder::Status),
        _ => {}
    }

    let indexed = inner.strip_prefix("s[")?;
    let close = indexed.find(']')?;
    let index: usize = indexed[..close].trim().parse().ok()?;
    let accessor = &indexed[close + 1..];

    let key = if let Some(field) = accessor.strip_prefix('.') {
        field
    } else {
        let quoted = accessor.strip_prefix('[')?.strip_suffix(']')?;
        quoted
            .strip_prefix('"')
            .and_then(|q| q.strip_suffix('"'))
            .or_else(|| quoted.strip_prefix('\'').and_then(|q| q.strip_suffix('\'')))?
    };

    if key == "sn" {
        return Some(Placeholder::SubjectName(index));
    }
    RowKey::parse(key).map(|k| Placeholder::Value(index, k))
}

/// Render `template` for `context` into `{work_dir}/{stem}.html`.
pub async fn render_to_file(
    template: &Template,
    context: &TemplateContext,
    work_dir: &Path,
    stem: &str,
) -> Result<PathBuf> {
    let path = work_dir.join(format!("{stem}.html"));
    tokio::fs::write(&path, template.render(context)).await?;
    tracing::debug!(path = %path.display(), student = %context.name, "rendered report");
    Ok(path)
}
