//! Concatenating per-student documents into one level artifact.

use std::path::{Path, PathBuf};

use gradebook_core::conversion::ConverterSession;
use gradebook_core::error::Result;

use crate::html::{BLANK_PAGE_FILE, BLANK_PAGE_HTML};

/// How student documents are laid out in a level artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// One document after the other.
    Sequential,
    /// Two students per printed sheet; an odd final student gets a blank
    /// back side.
    Paired,
}

/// Group `documents` into print units.
///
/// In paired mode every unit has exactly two entries, padded with `filler`.
pub fn plan_units(documents: &[PathBuf], mode: MergeMode, filler: &Path) -> Vec<Vec<PathBuf>> {
    match mode {
        MergeMode::Sequential => documents.iter().map(|d| vec![d.clone()]).collect(),
        MergeMode::Paired => documents
            .chunks(2)
            .map(|pair| {
                let mut unit = pair.to_vec();
                if unit.len() == 1 {
                    unit.push(filler.to_path_buf());
                }
                unit
            })
            .collect(),
    }
}

/// Whether `plan_units` would need a filler page.
pub fn needs_filler(count: usize, mode: MergeMode) -> bool {
    mode == MergeMode::Paired && count % 2 == 1
}

/// Merges converted documents through the converter session.
pub struct ArtifactMerger<'a> {
    session: &'a ConverterSession,
    templates_dir: &'a Path,
    work_dir: &'a Path,
}

impl<'a> ArtifactMerger<'a> {
    pub fn new(session: &'a ConverterSession, templates_dir: &'a Path, work_dir: &'a Path) -> Self {
        Self {
            session,
            templates_dir,
            work_dir,
        }
    }

    /// Merge `documents`, in order, into `output`.
    ///
    /// The input documents are deleted once the merge succeeds; on failure
    /// they are left for the caller to clean up.
    pub async fn merge(&self, documents: &[PathBuf], mode: MergeMode, output: &Path) -> Result<()> {
        let mut generated_filler = None;
        let filler = if needs_filler(documents.len(), mode) {
            let (path, generated) = self.filler_page().await?;
            if generated {
                generated_filler = Some(path.clone());
            }
            path
        } else {
            self.templates_dir.join(BLANK_PAGE_FILE)
        };

        let ordered: Vec<PathBuf> = plan_units(documents, mode, &filler)
            .into_iter()
            .flatten()
            .collect();

        tracing::info!(
            documents = documents.len(),
            pages = ordered.len(),
            mode = ?mode,
            output = %output.display(),
            "merging level report"
        );
        let merged = self.session.merge(&ordered, output).await;

        if let Some(path) = generated_filler {
            remove_files(std::slice::from_ref(&path)).await;
        }
        merged?;
        remove_files(documents).await;
        Ok(())
    }

    /// The filler page, and whether it was generated for this merge.
    async fn filler_page(&self) -> Result<(PathBuf, bool)> {
        let provided = self.templates_dir.join(BLANK_PAGE_FILE);
        if provided.is_file() {
            return Ok((provided, false));
        }

        let stem = format!("blank_{}", uuid::Uuid::new_v4().simple());
        let html = self.work_dir.join(format!("{stem}.html"));
        let pdf = self.work_dir.join(format!("{stem}.pdf"));
        tokio::fs::write(&html, BLANK_PAGE_HTML).await?;
        let converted = self.session.convert(&html, &pdf).await;
        remove_files(std::slice::from_ref(&html)).await;
        converted?;
        Ok((pdf, true))
    }
}

/// Delete files, logging the ones that could not be removed.
pub async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), "failed to remove intermediate file: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradebook_convert::mock::MockConverter;
    use gradebook_core::conversion::RetryPolicy;
    use std::sync::Arc;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn sequential_units_are_single() {
        let units = plan_units(&paths(&["a", "b", "c"]), MergeMode::Sequential, Path::new("blank"));
        assert_eq!(units, vec![paths(&["a"]), paths(&["b"]), paths(&["c"])]);
    }

    #[test]
    fn paired_units_pad_odd_tail() {
        let units = plan_units(&paths(&["a", "b", "c"]), MergeMode::Paired, Path::new("blank"));
        assert_eq!(units, vec![paths(&["a", "b"]), paths(&["c", "blank"])]);
        assert!(units.iter().all(|u| u.len() == 2));

        let even = plan_units(&paths(&["a", "b"]), MergeMode::Paired, Path::new("blank"));
        assert_eq!(even, vec![paths(&["a", "b"])]);
    }

    #[tokio::test]
    async fn merges_in_order_and_removes_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let templates = dir.path().join("templates");
        std::fs::create_dir_all(&templates).unwrap();
        std::fs::write(templates.join(BLANK_PAGE_FILE), "[blank]").unwrap();

        let docs: Vec<PathBuf> = ["a", "b", "c"]
            .iter()
            .map(|name| {
                let path = dir.path().join(format!("{name}.pdf"));
                std::fs::write(&path, format!("[{name}]")).unwrap();
                path
            })
            .collect();

        let converter = Arc::new(MockConverter::new());
        let session = ConverterSession::new(converter.clone(), RetryPolicy::default());
        let merger = ArtifactMerger::new(&session, &templates, dir.path());
        let output = dir.path().join("level.pdf");
        merger.merge(&docs, MergeMode::Paired, &output).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "[a][b][c][blank]"
        );
        assert!(docs.iter().all(|d| !d.exists()));
        assert!(templates.join(BLANK_PAGE_FILE).exists());
        assert_eq!(converter.convert_calls(), 0);
    }

    #[tokio::test]
    async fn generates_filler_when_none_is_provided() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("only.pdf");
        std::fs::write(&doc, "[only]").unwrap();

        let converter = Arc::new(MockConverter::new());
        let session = ConverterSession::new(converter.clone(), RetryPolicy::default());
        let merger = ArtifactMerger::new(&session, dir.path(), dir.path());
        let output = dir.path().join("level.pdf");
        merger
            .merge(std::slice::from_ref(&doc), MergeMode::Paired, &output)
            .await
            .unwrap();

        assert_eq!(converter.convert_calls(), 1);
        assert_eq!(converter.last_merge().unwrap().inputs.len(), 2);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("blank_"))
            .collect();
        assert!(leftovers.is_empty(), "filler not cleaned up: {leftovers:?}");
    }

    #[tokio::test]
    async fn generated_filler_is_removed_when_merge_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.pdf");

        let converter = Arc::new(MockConverter::new());
        let session = ConverterSession::new(converter.clone(), RetryPolicy::default());
        let merger = ArtifactMerger::new(&session, dir.path(), dir.path());
        let output = dir.path().join("level.pdf");
        let result = merger
            .merge(std::slice::from_ref(&missing), MergeMode::Paired, &output)
            .await;

        assert!(result.is_err());
        assert_eq!(converter.convert_calls(), 1);
        assert!(!output.exists());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("blank_"))
            .collect();
        assert!(leftovers.is_empty(), "filler left behind: {leftovers:?}");
    }
}
