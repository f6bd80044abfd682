//! Report generation: cache check, template selection, rendering,
//! conversion, merging and cache write.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::Semaphore;

use gradebook_core::aggregate::GradeSheet;
use gradebook_core::conversion::ConverterSession;
use gradebook_core::engine::GradingEngine;
use gradebook_core::error::{GradebookError, Result};
use gradebook_core::model::{
    AcademicYearId, ArtifactKey, Enrollment, LevelId, ReportArtifact, ReportKind, StudentId,
};

use crate::cache::{ArtifactCache, CacheLookup};
use crate::merge::{remove_files, ArtifactMerger, MergeMode};
use crate::render::{render_to_file, Template, TemplateContext};
use crate::template::{select_template, TemplateSelector};

/// Where reports are read from and written to, and how level batches run.
#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub templates_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Scratch space for rendered and per-student documents.
    pub work_dir: PathBuf,
    pub media_url: String,
    /// Students rendered at the same time in a level report.
    pub render_parallelism: usize,
    pub pair_yearly_level_reports: bool,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            templates_dir: PathBuf::from("templates"),
            output_dir: PathBuf::from("output_gradesheets"),
            work_dir: PathBuf::from("output_gradesheets/.work"),
            media_url: "/media/".to_string(),
            render_parallelism: 4,
            pair_yearly_level_reports: true,
        }
    }
}

/// A student left out of a level report.
#[derive(Debug, Clone, Serialize)]
pub struct StudentFailure {
    pub student_id: StudentId,
    pub message: String,
}

/// Result of a generation request.
#[derive(Debug, Clone, Serialize)]
pub struct ReportOutcome {
    pub artifact: ReportArtifact,
    pub url: String,
    /// The artifact was served from the cache.
    pub cached: bool,
    /// Students included in the document.
    pub students: usize,
    pub failures: Vec<StudentFailure>,
}

/// Generates report cards for one student or a whole level.
pub struct ReportGenerator {
    engine: Arc<GradingEngine>,
    session: Arc<ConverterSession>,
    cache: ArtifactCache,
    selector: TemplateSelector,
    settings: ReportSettings,
}

impl ReportGenerator {
    pub fn new(
        engine: Arc<GradingEngine>,
        session: Arc<ConverterSession>,
        settings: ReportSettings,
    ) -> Self {
        let cache = ArtifactCache::new(Arc::clone(engine.store()));
        let selector = TemplateSelector::new(&settings.templates_dir);
        Self {
            engine,
            session,
            cache,
            selector,
            settings,
        }
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn settings(&self) -> &ReportSettings {
        &self.settings
    }

    /// Produce the report for `student`, or for every student of the level
    /// when `student` is `None`.
    ///
    /// A fresh cached artifact is returned as is. Otherwise the report is
    /// rebuilt and the cache entry replaced.
    pub async fn generate_report(
        &self,
        level: LevelId,
        student: Option<StudentId>,
        year: AcademicYearId,
        kind: ReportKind,
    ) -> Result<ReportOutcome> {
        let key = ArtifactKey {
            level_id: level,
            student_id: student,
            academic_year_id: year,
            kind,
        };

        match self.cache.lookup(&key).await? {
            CacheLookup::Fresh(artifact) => {
                tracing::info!(key = %key, file = %artifact.filename, "serving cached report");
                return Ok(ReportOutcome {
                    url: artifact.view_url(&self.settings.media_url),
                    artifact,
                    cached: true,
                    students: 0,
                    failures: Vec::new(),
                });
            }
            CacheLookup::Stale(artifact) => {
                tracing::info!(key = %key, "regenerating report");
                self.cache.evict(&artifact).await?;
            }
            CacheLookup::Missing => {}
        }

        let references = self.engine.references();
        let level_record = references
            .level(level)
            .await?
            .ok_or_else(|| GradebookError::not_found(format!("level {level}")))?;
        references
            .academic_year(year)
            .await?
            .ok_or_else(|| GradebookError::not_found(format!("academic year {year}")))?;

        tokio::fs::create_dir_all(&self.settings.output_dir).await?;
        tokio::fs::create_dir_all(&self.settings.work_dir).await?;

        // Taken before reading grades, so changes made while rendering
        // leave the artifact stale.
        let generated_at = Utc::now();
        let stamp = generated_at.format("%Y%m%d_%H%M%S");

        let (filename, students, failures) = match student {
            Some(student) => {
                let sheet = self.engine.grade_sheet(student, level, year).await?;
                let filename = sanitize_filename(&format!(
                    "{}_{}_{student}_{level}_{year}_{stamp}.pdf",
                    single_prefix(kind),
                    sheet.student_name
                ));
                let output = self.settings.output_dir.join(&filename);
                self.render_and_convert(&sheet, kind, &output).await?;
                (filename, 1, Vec::new())
            }
            None => {
                let enrollments = self
                    .engine
                    .store()
                    .enrollments_for_level(level, year)
                    .await?;
                if enrollments.is_empty() {
                    return Err(GradebookError::not_found(format!(
                        "enrollments for level '{}' in year {year}",
                        level_record.name
                    )));
                }
                let filename = sanitize_filename(&format!(
                    "{}_{}_{year}_{stamp}.pdf",
                    level_prefix(kind),
                    level_record.name
                ));
                let output = self.settings.output_dir.join(&filename);
                let (count, failures) = self.build_level(&enrollments, kind, &output).await?;
                (filename, count, failures)
            }
        };

        let path = self.settings.output_dir.join(&filename);
        let artifact = self.cache.record(key, path, filename, generated_at).await?;
        tracing::info!(
            key = %key,
            file = %artifact.filename,
            students,
            failures = failures.len(),
            "report generated"
        );
        Ok(ReportOutcome {
            url: artifact.view_url(&self.settings.media_url),
            artifact,
            cached: false,
            students,
            failures,
        })
    }

    /// Render and convert every enrolled student, then merge in enrollment
    /// order.
    async fn build_level(
        &self,
        enrollments: &[Enrollment],
        kind: ReportKind,
        output: &Path,
    ) -> Result<(usize, Vec<StudentFailure>)> {
        let semaphore = Semaphore::new(self.settings.render_parallelism.max(1));
        let semaphore = &semaphore;
        let batch = uuid::Uuid::new_v4().simple().to_string();
        let mut futures = FuturesUnordered::new();

        for (index, enrollment) in enrollments.iter().enumerate() {
            let document = self.settings.work_dir.join(format!(
                "{kind}_{}_{batch}_{index:04}.pdf",
                enrollment.student_id
            ));
            futures.push(async move {
                let result = async {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|_| anyhow::anyhow!("semaphore closed"))?;
                    let sheet = self
                        .engine
                        .grade_sheet(
                            enrollment.student_id,
                            enrollment.level_id,
                            enrollment.academic_year_id,
                        )
                        .await?;
                    self.render_and_convert(&sheet, kind, &document).await?;
                    Ok::<_, GradebookError>(document)
                }
                .await;
                (index, enrollment.student_id, result)
            });
        }

        let mut documents = Vec::new();
        let mut failures = Vec::new();
        let mut fatal = None;
        while let Some((index, student_id, result)) = futures.next().await {
            match result {
                Ok(document) => documents.push((index, document)),
                Err(e @ (GradebookError::Configuration(_) | GradebookError::Template(_))) => {
                    // Students still waiting for a permit fail fast; those
                    // in flight finish so their files can be removed.
                    semaphore.close();
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
                Err(e) if fatal.is_some() => {
                    tracing::debug!(student = %student_id, "student abandoned: {e}");
                }
                Err(e) => {
                    tracing::warn!(student = %student_id, "student left out of level report: {e}");
                    failures.push((student_id, e));
                }
            }
        }

        documents.sort_by_key(|(index, _)| *index);
        let documents: Vec<PathBuf> = documents.into_iter().map(|(_, d)| d).collect();

        if let Some(e) = fatal {
            remove_files(&documents).await;
            return Err(e);
        }
        if documents.is_empty() {
            let first = failures
                .into_iter()
                .next()
                .map(|(_, e)| e)
                .unwrap_or_else(|| GradebookError::validation("no students to report on"));
            return Err(first);
        }

        let mode = if kind == ReportKind::Yearly && self.settings.pair_yearly_level_reports {
            MergeMode::Paired
        } else {
            MergeMode::Sequential
        };
        let merger = ArtifactMerger::new(
            &self.session,
            &self.settings.templates_dir,
            &self.settings.work_dir,
        );
        if let Err(e) = merger.merge(&documents, mode, output).await {
            remove_files(&documents).await;
            return Err(e);
        }

        let failures = failures
            .into_iter()
            .map(|(student_id, e)| StudentFailure {
                student_id,
                message: e.to_string(),
            })
            .collect();
        Ok((documents.len(), failures))
    }

    /// Fill the student's template and convert it into `output`.
    async fn render_and_convert(
        &self,
        sheet: &GradeSheet,
        kind: ReportKind,
        output: &Path,
    ) -> Result<()> {
        let id = select_template(sheet.status, kind);
        let (resolved, source) = self.selector.load(id).await?;
        let template = Template::parse(&source).map_err(|e| {
            tracing::error!(template = %resolved.used, path = %resolved.path.display(), "{e}");
            e
        })?;

        let context = TemplateContext::from_sheet(sheet);
        let stem = format!(
            "{}_{}_{}",
            resolved.used,
            sheet.student_id,
            uuid::Uuid::new_v4().simple()
        );
        let rendered = render_to_file(&template, &context, &self.settings.work_dir, &stem).await?;

        let converted = self.session.convert(&rendered, output).await;
        remove_files(std::slice::from_ref(&rendered)).await;
        converted
    }
}

fn single_prefix(kind: ReportKind) -> &'static str {
    match kind {
        ReportKind::Yearly => "yearly_card",
        ReportKind::Periodic => "report_card",
    }
}

fn level_prefix(kind: ReportKind) -> &'static str {
    match kind {
        ReportKind::Yearly => "yearly_cards_level",
        ReportKind::Periodic => "report_cards_level",
    }
}

/// Replace characters that do not belong in a file name.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            ' ' | ':' | '/' | '\\' => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use gradebook_convert::mock::{MockConverter, MOCK_PDF_HEADER};
    use gradebook_core::conversion::RetryPolicy;
    use gradebook_core::engine::GradingEngineConfig;
    use gradebook_core::model::PeriodCode;
    use gradebook_core::store::MemoryStore;
    use gradebook_core::traits::SchoolStore;

    use crate::html::write_default_templates;

    struct Fixture {
        store: Arc<MemoryStore>,
        engine: Arc<GradingEngine>,
        converter: Arc<MockConverter>,
        generator: ReportGenerator,
        level: LevelId,
        year: AcademicYearId,
        students: Vec<StudentId>,
        dir: tempfile::TempDir,
    }

    fn settings(dir: &Path) -> ReportSettings {
        ReportSettings {
            templates_dir: dir.join("templates"),
            output_dir: dir.join("out"),
            work_dir: dir.join("work"),
            media_url: "/media/".into(),
            render_parallelism: 2,
            pair_yearly_level_reports: true,
        }
    }

    async fn fixture(names: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        write_default_templates(&dir.path().join("templates"), false).unwrap();

        let store = Arc::new(MemoryStore::new());
        let level = store.add_level("7").unwrap();
        let math = store.add_subject(level.id, "Mathematics").unwrap();
        let year = store.add_academic_year("2024/2025").unwrap();
        let mut students = Vec::new();
        for name in names {
            let student = store.add_student(name, "Doe").unwrap();
            let enrollment = store
                .enroll(student.id, level.id, year.id, year.start_date)
                .unwrap();
            for period in PeriodCode::ALL {
                store
                    .upsert_grade(enrollment.id, math.id, period, 80, Utc::now())
                    .await
                    .unwrap();
            }
            students.push(student.id);
        }

        let engine = Arc::new(GradingEngine::new(
            store.clone(),
            GradingEngineConfig::default(),
        ));
        let converter = Arc::new(MockConverter::new());
        let session = Arc::new(ConverterSession::new(
            converter.clone(),
            RetryPolicy {
                max_attempts: 1,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
        ));
        let generator = ReportGenerator::new(engine.clone(), session, settings(dir.path()));
        Fixture {
            store,
            engine,
            converter,
            generator,
            level: level.id,
            year: year.id,
            students,
            dir,
        }
    }

    fn work_dir_is_empty(f: &Fixture) -> bool {
        std::fs::read_dir(f.dir.path().join("work"))
            .unwrap()
            .next()
            .is_none()
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(
            sanitize_filename("yearly_card_Ana María/B:C\\D.pdf"),
            "yearly_card_Ana_María_B_C_D.pdf"
        );
    }

    #[tokio::test]
    async fn single_student_yearly_report_uses_status_template() {
        let f = fixture(&["Ana"]).await;
        f.engine
            .compute_status(f.students[0], f.level, f.year)
            .await
            .unwrap();

        let outcome = f
            .generator
            .generate_report(f.level, Some(f.students[0]), f.year, ReportKind::Yearly)
            .await
            .unwrap();

        assert!(!outcome.cached);
        assert!(outcome.artifact.filename.starts_with("yearly_card_Ana_Doe_"));
        assert_eq!(
            outcome.url,
            format!("/media/output_gradesheets/{}", outcome.artifact.filename)
        );
        let body = std::fs::read(&outcome.artifact.path).unwrap();
        assert!(body.starts_with(MOCK_PDF_HEADER));
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("Promoted to the next level (PASS)"));
        assert!(text.contains("Mathematics"));
        assert!(work_dir_is_empty(&f));
    }

    #[tokio::test]
    async fn namesakes_get_separate_artifacts() {
        let f = fixture(&["Ana", "Ana"]).await;
        let first = f
            .generator
            .generate_report(f.level, Some(f.students[0]), f.year, ReportKind::Yearly)
            .await
            .unwrap();
        let body = std::fs::read(&first.artifact.path).unwrap();

        let other = f
            .generator
            .generate_report(f.level, Some(f.students[1]), f.year, ReportKind::Yearly)
            .await
            .unwrap();
        assert_ne!(other.artifact.path, first.artifact.path);

        let again = f
            .generator
            .generate_report(f.level, Some(f.students[0]), f.year, ReportKind::Yearly)
            .await
            .unwrap();
        assert!(again.cached);
        assert_eq!(again.artifact.path, first.artifact.path);
        assert_eq!(std::fs::read(&again.artifact.path).unwrap(), body);
        assert!(other.artifact.path.exists());
    }

    #[tokio::test]
    async fn unchanged_report_is_served_from_cache() {
        let f = fixture(&["Ana"]).await;
        let first = f
            .generator
            .generate_report(f.level, Some(f.students[0]), f.year, ReportKind::Periodic)
            .await
            .unwrap();
        let second = f
            .generator
            .generate_report(f.level, Some(f.students[0]), f.year, ReportKind::Periodic)
            .await
            .unwrap();

        assert!(second.cached);
        assert_eq!(second.artifact, first.artifact);
        assert_eq!(f.converter.convert_calls(), 1);
    }

    #[tokio::test]
    async fn newer_grade_triggers_regeneration() {
        let f = fixture(&["Ana"]).await;
        let first = f
            .generator
            .generate_report(f.level, Some(f.students[0]), f.year, ReportKind::Periodic)
            .await
            .unwrap();

        let enrollment = f
            .store
            .enrollment(f.students[0], f.level, f.year)
            .await
            .unwrap()
            .unwrap();
        let subject = f.store.subjects_for_level(f.level).await.unwrap()[0].id;
        f.store
            .upsert_grade(
                enrollment.id,
                subject,
                PeriodCode::Second,
                95,
                first.artifact.generated_at + chrono::Duration::seconds(1),
            )
            .await
            .unwrap();

        let second = f
            .generator
            .generate_report(f.level, Some(f.students[0]), f.year, ReportKind::Periodic)
            .await
            .unwrap();
        assert!(!second.cached);
        assert_eq!(f.converter.convert_calls(), 2);
        assert!(second.artifact.path.exists());
    }

    #[tokio::test]
    async fn level_report_merges_in_enrollment_order_with_filler() {
        let f = fixture(&["Ana", "Ben", "Cal"]).await;
        let outcome = f
            .generator
            .generate_report(f.level, None, f.year, ReportKind::Yearly)
            .await
            .unwrap();

        assert_eq!(outcome.students, 3);
        assert!(outcome.failures.is_empty());
        assert!(outcome.artifact.filename.starts_with("yearly_cards_level_7_"));
        assert!(outcome.artifact.key.is_level_wide());

        let text = std::fs::read_to_string(&outcome.artifact.path).unwrap();
        let ana = text.find("Ana Doe").unwrap();
        let ben = text.find("Ben Doe").unwrap();
        let cal = text.find("Cal Doe").unwrap();
        assert!(ana < ben && ben < cal);

        // three students plus the converted filler page
        assert_eq!(f.converter.convert_calls(), 4);
        assert_eq!(f.converter.merge_calls(), 1);
        assert_eq!(f.converter.last_merge().unwrap().inputs.len(), 4);
        assert!(work_dir_is_empty(&f));
    }

    #[tokio::test]
    async fn periodic_level_report_is_not_paired() {
        let f = fixture(&["Ana", "Ben", "Cal"]).await;
        f.generator
            .generate_report(f.level, None, f.year, ReportKind::Periodic)
            .await
            .unwrap();
        assert_eq!(f.converter.convert_calls(), 3);
        assert_eq!(f.converter.last_merge().unwrap().inputs.len(), 3);
    }

    #[tokio::test]
    async fn failed_student_does_not_block_the_level() {
        let f = fixture(&["Ana", "Ben", "Cal", "Dan"]).await;
        f.converter.fail_next(1);
        let outcome = f
            .generator
            .generate_report(f.level, None, f.year, ReportKind::Periodic)
            .await
            .unwrap();
        assert_eq!(outcome.students, 3);
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].message.contains("conversion failed"));
    }

    #[tokio::test]
    async fn level_fails_when_no_student_succeeds() {
        let f = fixture(&["Ana", "Ben"]).await;
        f.converter.fail_next(2);
        let err = f
            .generator
            .generate_report(f.level, None, f.year, ReportKind::Periodic)
            .await
            .unwrap_err();
        assert!(matches!(err, GradebookError::Conversion { .. }));
        assert!(f.store.artifacts().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_level_is_not_found() {
        let f = fixture(&[]).await;
        let err = f
            .generator
            .generate_report(f.level, None, f.year, ReportKind::Yearly)
            .await
            .unwrap_err();
        assert!(matches!(err, GradebookError::NotFound(_)));
    }

    #[tokio::test]
    async fn student_without_enrollment_is_not_found() {
        let f = fixture(&["Ana"]).await;
        let err = f
            .generator
            .generate_report(f.level, Some(StudentId(999)), f.year, ReportKind::Yearly)
            .await
            .unwrap_err();
        assert!(matches!(err, GradebookError::NotFound(_)));
    }

    #[tokio::test]
    async fn missing_templates_are_a_configuration_error() {
        let f = fixture(&["Ana", "Ben"]).await;
        std::fs::remove_dir_all(f.dir.path().join("templates")).unwrap();
        let err = f
            .generator
            .generate_report(f.level, None, f.year, ReportKind::Yearly)
            .await
            .unwrap_err();
        assert!(matches!(err, GradebookError::Configuration(_)));
        assert_eq!(f.converter.convert_calls(), 0);
    }

    #[tokio::test]
    async fn broken_template_in_level_batch_leaves_no_work_files() {
        let f = fixture(&["Ana", "Ben", "Cal"]).await;
        // Ana passes and uses the pass layout; the others have no status yet.
        f.engine
            .compute_status(f.students[0], f.level, f.year)
            .await
            .unwrap();
        std::fs::write(
            f.dir.path().join("templates/yearly_card_pass.html"),
            "<p>{{s[0].nickname}}</p>",
        )
        .unwrap();

        let err = f
            .generator
            .generate_report(f.level, None, f.year, ReportKind::Yearly)
            .await
            .unwrap_err();
        assert!(matches!(err, GradebookError::Template(_)));
        assert!(work_dir_is_empty(&f));
        assert!(f.store.artifacts().unwrap().is_empty());
    }

    #[tokio::test]
    async fn broken_template_is_a_template_error() {
        let f = fixture(&["Ana"]).await;
        std::fs::write(
            f.dir.path().join("templates/report_card_periodic.html"),
            "<p>{{nickname}}</p>",
        )
        .unwrap();
        let err = f
            .generator
            .generate_report(f.level, Some(f.students[0]), f.year, ReportKind::Periodic)
            .await
            .unwrap_err();
        assert!(matches!(err, GradebookError::Template(_)));
        assert!(work_dir_is_empty(&f));
    }
}
