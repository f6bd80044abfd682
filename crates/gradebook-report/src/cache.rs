//! Artifact cache: freshness checks, invalidation and expiry.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use gradebook_core::error::Result;
use gradebook_core::model::{
    AcademicYearId, ArtifactKey, LevelId, ReportArtifact, ReportKind, StudentId,
};
use gradebook_core::traits::SchoolStore;

/// Default age, in days, after which artifacts are swept.
pub const DEFAULT_RETENTION_DAYS: u32 = 2;

/// Result of looking up a cache key.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Up to date and the file exists.
    Fresh(ReportArtifact),
    /// Outdated by newer grades or statuses, or its file is gone.
    Stale(ReportArtifact),
    Missing,
}

/// What a sweep removed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub removed: Vec<ArtifactKey>,
    pub files_deleted: usize,
}

/// Report artifacts stored in the record store, with their files.
#[derive(Clone)]
pub struct ArtifactCache {
    store: Arc<dyn SchoolStore>,
}

impl ArtifactCache {
    pub fn new(store: Arc<dyn SchoolStore>) -> Self {
        Self { store }
    }

    /// Check whether the artifact under `key` can be served as is.
    pub async fn lookup(&self, key: &ArtifactKey) -> Result<CacheLookup> {
        let Some(artifact) = self.store.artifact(key).await? else {
            return Ok(CacheLookup::Missing);
        };

        if let Some(changed) = self.latest_change(key).await? {
            if changed > artifact.generated_at {
                tracing::info!(
                    key = %key,
                    generated_at = %artifact.generated_at,
                    changed_at = %changed,
                    "report outdated by newer changes"
                );
                return Ok(CacheLookup::Stale(artifact));
            }
        }

        if !tokio::fs::try_exists(&artifact.path).await.unwrap_or(false) {
            tracing::info!(key = %key, path = %artifact.path.display(), "report file missing");
            return Ok(CacheLookup::Stale(artifact));
        }

        Ok(CacheLookup::Fresh(artifact))
    }

    /// Latest grade change in the key's scope; yearly reports also watch
    /// status changes.
    async fn latest_change(&self, key: &ArtifactKey) -> Result<Option<DateTime<Utc>>> {
        let grades = self
            .store
            .latest_grade_update(key.level_id, key.student_id, key.academic_year_id)
            .await?;
        let statuses = match key.kind {
            ReportKind::Yearly => {
                self.store
                    .latest_status_update(key.level_id, key.student_id, key.academic_year_id)
                    .await?
            }
            ReportKind::Periodic => None,
        };
        Ok(grades.max(statuses))
    }

    /// Store a freshly generated artifact under `key`.
    pub async fn record(
        &self,
        key: ArtifactKey,
        path: PathBuf,
        filename: String,
        generated_at: DateTime<Utc>,
    ) -> Result<ReportArtifact> {
        let artifact = ReportArtifact {
            id: uuid::Uuid::new_v4(),
            key,
            path,
            filename,
            generated_at,
        };
        Ok(self.store.put_artifact(artifact).await?)
    }

    /// Remove the entry and its file.
    pub async fn evict(&self, artifact: &ReportArtifact) -> Result<()> {
        self.store.remove_artifact(&artifact.key).await?;
        remove_artifact_file(&artifact.path).await;
        Ok(())
    }

    /// Drop cached reports affected by grade changes for `students`.
    ///
    /// Removes the students' own reports and every whole-level report of
    /// the level and year. Returns the removed keys.
    pub async fn invalidate_reports_for_grades(
        &self,
        students: &BTreeSet<StudentId>,
        level: LevelId,
        year: AcademicYearId,
    ) -> Result<Vec<ArtifactKey>> {
        let mut removed = Vec::new();
        for artifact in self.store.artifacts_for_level(level, year).await? {
            let affected = match artifact.key.student_id {
                None => true,
                Some(student) => students.contains(&student),
            };
            if !affected {
                continue;
            }
            self.evict(&artifact).await?;
            removed.push(artifact.key);
        }
        if !removed.is_empty() {
            tracing::info!(
                level = %level,
                year = %year,
                removed = removed.len(),
                "invalidated cached reports"
            );
        }
        Ok(removed)
    }

    /// Remove artifacts generated more than `retention_days` before `now`.
    pub async fn sweep_expired_artifacts(
        &self,
        retention_days: u32,
        now: DateTime<Utc>,
    ) -> Result<SweepReport> {
        let cutoff = now - chrono::Duration::days(i64::from(retention_days));
        let mut report = SweepReport::default();
        for artifact in self.store.artifacts_generated_before(cutoff).await? {
            self.store.remove_artifact(&artifact.key).await?;
            if remove_artifact_file(&artifact.path).await {
                report.files_deleted += 1;
            }
            report.removed.push(artifact.key);
        }
        tracing::info!(
            retention_days,
            removed = report.removed.len(),
            files_deleted = report.files_deleted,
            "swept expired reports"
        );
        Ok(report)
    }

    /// Run [`sweep_expired_artifacts`](Self::sweep_expired_artifacts) every
    /// `every` until the handle is aborted.
    pub fn spawn_sweeper(&self, retention_days: u32, every: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = cache.sweep_expired_artifacts(retention_days, Utc::now()).await {
                    tracing::warn!("report sweep failed: {e}");
                }
            }
        })
    }
}

/// Delete an artifact file. Returns whether a file was removed.
async fn remove_artifact_file(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!(path = %path.display(), "failed to remove report file: {e}");
            false
        }
    }
}
