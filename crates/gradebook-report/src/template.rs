//! Report template selection and lookup.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use gradebook_core::error::{GradebookError, Result};
use gradebook_core::model::{ReportKind, Status};

/// Report layouts known to the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateId {
    ReportCardDefault,
    ReportCardPeriodic,
    YearlyCardPass,
    YearlyCardConditional,
    YearlyCardFail,
}

impl TemplateId {
    pub const ALL: [TemplateId; 5] = [
        TemplateId::ReportCardDefault,
        TemplateId::ReportCardPeriodic,
        TemplateId::YearlyCardPass,
        TemplateId::YearlyCardConditional,
        TemplateId::YearlyCardFail,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TemplateId::ReportCardDefault => "report_card_default",
            TemplateId::ReportCardPeriodic => "report_card_periodic",
            TemplateId::YearlyCardPass => "yearly_card_pass",
            TemplateId::YearlyCardConditional => "yearly_card_conditional",
            TemplateId::YearlyCardFail => "yearly_card_fail",
        }
    }

    /// File name of the template inside the templates directory.
    pub fn file_name(self) -> String {
        format!("{}.html", self.as_str())
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the layout for one student's report.
///
/// Periodic reports always use the periodic card. Yearly reports follow the
/// evaluated status; anything that is not a decision gets the default card.
/// Whole-level reports call this once per student.
pub fn select_template(status: Option<Status>, kind: ReportKind) -> TemplateId {
    match kind {
        ReportKind::Periodic => TemplateId::ReportCardPeriodic,
        ReportKind::Yearly => match status {
            Some(Status::Pass) => TemplateId::YearlyCardPass,
            Some(Status::Conditional) => TemplateId::YearlyCardConditional,
            Some(Status::Fail) => TemplateId::YearlyCardFail,
            Some(Status::Pending | Status::Incomplete) | None => TemplateId::ReportCardDefault,
        },
    }
}

/// A template file located on disk.
#[derive(Debug, Clone)]
pub struct ResolvedTemplate {
    /// The template that was asked for.
    pub requested: TemplateId,
    /// The template that was found; differs from `requested` after a fallback.
    pub used: TemplateId,
    pub path: PathBuf,
}

/// Finds template files in a directory, falling back to the default card.
#[derive(Debug, Clone)]
pub struct TemplateSelector {
    dir: PathBuf,
}

impl TemplateSelector {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Locate the file for `id`, or the default card when it is missing.
    pub fn resolve(&self, id: TemplateId) -> Result<ResolvedTemplate> {
        let path = self.dir.join(id.file_name());
        if path.is_file() {
            return Ok(ResolvedTemplate {
                requested: id,
                used: id,
                path,
            });
        }

        let fallback = self.dir.join(TemplateId::ReportCardDefault.file_name());
        if fallback.is_file() {
            tracing::warn!(
                template = %id,
                dir = %self.dir.display(),
                "template missing, using {}",
                TemplateId::ReportCardDefault
            );
            return Ok(ResolvedTemplate {
                requested: id,
                used: TemplateId::ReportCardDefault,
                path: fallback,
            });
        }

        tracing::error!(
            template = %id,
            dir = %self.dir.display(),
            "no template and no default template"
        );
        Err(GradebookError::Configuration(format!(
            "template '{id}' not found in {} and no {} to fall back to",
            self.dir.display(),
            TemplateId::ReportCardDefault.file_name()
        )))
    }

    /// Resolve and read a template.
    pub async fn load(&self, id: TemplateId) -> Result<(ResolvedTemplate, String)> {
        let resolved = self.resolve(id)?;
        let source = tokio::fs::read_to_string(&resolved.path).await?;
        Ok((resolved, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periodic_ignores_status() {
        for status in [None, Some(Status::Pass), Some(Status::Fail)] {
            assert_eq!(
                select_template(status, ReportKind::Periodic),
                TemplateId::ReportCardPeriodic
            );
        }
    }

    #[test]
    fn yearly_follows_status() {
        assert_eq!(
            select_template(Some(Status::Pass), ReportKind::Yearly),
            TemplateId::YearlyCardPass
        );
        assert_eq!(
            select_template(Some(Status::Conditional), ReportKind::Yearly),
            TemplateId::YearlyCardConditional
        );
        assert_eq!(
            select_template(Some(Status::Fail), ReportKind::Yearly),
            TemplateId::YearlyCardFail
        );
        assert_eq!(
            select_template(Some(Status::Incomplete), ReportKind::Yearly),
            TemplateId::ReportCardDefault
        );
        assert_eq!(
            select_template(None, ReportKind::Yearly),
            TemplateId::ReportCardDefault
        );
    }

    #[test]
    fn template_names_match_status_names() {
        for status in [Status::Pass, Status::Conditional, Status::Fail] {
            assert_eq!(
                select_template(Some(status), ReportKind::Yearly).as_str(),
                status.template_name()
            );
        }
    }

    #[test]
    fn resolve_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report_card_default.html"), "<p>{{name}}</p>").unwrap();
        let selector = TemplateSelector::new(dir.path());

        let resolved = selector.resolve(TemplateId::YearlyCardPass).unwrap();
        assert_eq!(resolved.requested, TemplateId::YearlyCardPass);
        assert_eq!(resolved.used, TemplateId::ReportCardDefault);

        std::fs::write(dir.path().join("yearly_card_pass.html"), "<p>pass</p>").unwrap();
        let resolved = selector.resolve(TemplateId::YearlyCardPass).unwrap();
        assert_eq!(resolved.used, TemplateId::YearlyCardPass);
    }

    #[test]
    fn missing_default_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let selector = TemplateSelector::new(dir.path());
        let err = selector.resolve(TemplateId::YearlyCardFail).unwrap_err();
        assert!(matches!(err, GradebookError::Configuration(_)));
    }
}
