//! Mock converter for testing report generation without a conversion service.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use gradebook_core::error::ConversionError;
use gradebook_core::traits::{ConvertRequest, DocumentConverter, MergeRequest};

/// Header written in front of every mock document.
pub const MOCK_PDF_HEADER: &[u8] = b"%PDF-1.4\n% mock\n";

/// Writes placeholder documents instead of real PDFs.
///
/// `convert` writes [`MOCK_PDF_HEADER`] followed by the input bytes, and
/// `merge` concatenates its inputs in order, so tests can inspect what
/// ended up where.
pub struct MockConverter {
    convert_calls: AtomicU32,
    merge_calls: AtomicU32,
    /// Number of upcoming calls that fail with a transient error.
    pending_failures: AtomicU32,
    last_merge: Mutex<Option<MergeRequest>>,
}

impl MockConverter {
    pub fn new() -> Self {
        Self {
            convert_calls: AtomicU32::new(0),
            merge_calls: AtomicU32::new(0),
            pending_failures: AtomicU32::new(0),
            last_merge: Mutex::new(None),
        }
    }

    /// Make the next `n` calls fail as if the service were down.
    pub fn fail_next(&self, n: u32) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    pub fn convert_calls(&self) -> u32 {
        self.convert_calls.load(Ordering::Relaxed)
    }

    pub fn merge_calls(&self) -> u32 {
        self.merge_calls.load(Ordering::Relaxed)
    }

    /// The last merge request received.
    pub fn last_merge(&self) -> Option<MergeRequest> {
        self.last_merge
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn take_failure(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MockConverter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentConverter for MockConverter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn convert(&self, request: &ConvertRequest) -> anyhow::Result<()> {
        self.convert_calls.fetch_add(1, Ordering::Relaxed);
        if self.take_failure() {
            return Err(ConversionError::Unavailable("mock outage".into()).into());
        }
        let body = tokio::fs::read(&request.input).await.map_err(|e| {
            ConversionError::InvalidInput(format!("{}: {e}", request.input.display()))
        })?;
        let mut document = MOCK_PDF_HEADER.to_vec();
        document.extend_from_slice(&body);
        tokio::fs::write(&request.output, document).await?;
        Ok(())
    }

    async fn merge(&self, request: &MergeRequest) -> anyhow::Result<()> {
        self.merge_calls.fetch_add(1, Ordering::Relaxed);
        *self
            .last_merge
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(request.clone());
        if self.take_failure() {
            return Err(ConversionError::Unavailable("mock outage".into()).into());
        }
        let mut merged = Vec::new();
        for input in &request.inputs {
            let bytes = tokio::fs::read(input).await.map_err(|e| {
                ConversionError::InvalidInput(format!("{}: {e}", input.display()))
            })?;
            merged.extend_from_slice(&bytes);
        }
        tokio::fs::write(&request.output, merged).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn convert_wraps_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("card.html");
        let output = dir.path().join("card.pdf");
        tokio::fs::write(&input, "<p>Ana</p>").await.unwrap();

        let converter = MockConverter::new();
        converter
            .convert(&ConvertRequest {
                input,
                output: output.clone(),
            })
            .await
            .unwrap();

        let written = tokio::fs::read(&output).await.unwrap();
        assert!(written.starts_with(MOCK_PDF_HEADER));
        assert!(written.ends_with(b"<p>Ana</p>"));
        assert_eq!(converter.convert_calls(), 1);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.pdf");
        tokio::fs::write(&a, "a").await.unwrap();
        let request = MergeRequest {
            inputs: vec![a],
            output: dir.path().join("all.pdf"),
        };

        let converter = MockConverter::new();
        converter.fail_next(1);
        assert!(converter.merge(&request).await.is_err());
        converter.merge(&request).await.unwrap();
        assert_eq!(converter.merge_calls(), 2);
        assert_eq!(converter.last_merge().unwrap().inputs.len(), 1);
    }
}
