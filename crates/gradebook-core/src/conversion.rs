//! Serialized, retrying access to a [`DocumentConverter`].
//!
//! The converter is a single-capacity resource: [`ConverterSession`] holds
//! a one-permit semaphore and takes the permit around each attempt, so the
//! permit is released on every exit path, including errors and panics
//! unwinding through the attempt.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::error::{ConversionError, GradebookError, Result};
use crate::traits::{ConvertRequest, DocumentConverter, MergeRequest};

/// How often and how patiently a conversion is retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each later one.
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

enum Job<'a> {
    Convert(&'a ConvertRequest),
    Merge(&'a MergeRequest),
}

impl Job<'_> {
    fn label(&self) -> &'static str {
        match self {
            Job::Convert(_) => "convert",
            Job::Merge(_) => "merge",
        }
    }

    fn output(&self) -> &Path {
        match self {
            Job::Convert(r) => &r.output,
            Job::Merge(r) => &r.output,
        }
    }
}

/// Single-capacity session over a document converter.
pub struct ConverterSession {
    converter: Arc<dyn DocumentConverter>,
    slot: Semaphore,
    retry: RetryPolicy,
}

impl ConverterSession {
    pub fn new(converter: Arc<dyn DocumentConverter>, retry: RetryPolicy) -> Self {
        Self {
            converter,
            slot: Semaphore::new(1),
            retry,
        }
    }

    pub fn converter_name(&self) -> &str {
        self.converter.name()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Convert one rendered document into `output`.
    pub async fn convert(&self, input: &Path, output: &Path) -> Result<()> {
        let request = ConvertRequest {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
        };
        self.run(Job::Convert(&request)).await
    }

    /// Concatenate `inputs` in order into `output`.
    pub async fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let request = MergeRequest {
            inputs: inputs.to_vec(),
            output: output.to_path_buf(),
        };
        self.run(Job::Merge(&request)).await
    }

    async fn run(&self, job: Job<'_>) -> Result<()> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut delay = self.retry.initial_delay;
        let mut last_error: Option<anyhow::Error> = None;
        let mut attempts = 0;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(self.retry.max_delay);
            }
            attempts = attempt;

            match self.attempt(&job).await {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::info!(
                            converter = self.converter.name(),
                            job = job.label(),
                            attempt,
                            "conversion succeeded after retry"
                        );
                    }
                    return Ok(());
                }
                Err(e) => {
                    let permanent = e
                        .downcast_ref::<ConversionError>()
                        .is_some_and(ConversionError::is_permanent);
                    tracing::warn!(
                        converter = self.converter.name(),
                        job = job.label(),
                        attempt,
                        max_attempts,
                        permanent,
                        "conversion attempt failed: {e:#}"
                    );
                    last_error = Some(e);
                    if permanent {
                        break;
                    }
                }
            }
        }

        let message = last_error
            .map(|e| format!("{e:#}"))
            .unwrap_or_else(|| "unknown error".to_string());
        tracing::error!(
            converter = self.converter.name(),
            job = job.label(),
            output = %job.output().display(),
            "conversion failed: {message}"
        );
        Err(GradebookError::Conversion { attempts, message })
    }

    async fn attempt(&self, job: &Job<'_>) -> anyhow::Result<()> {
        let _permit = self
            .slot
            .acquire()
            .await
            .map_err(|_| anyhow::anyhow!("converter session closed"))?;

        match job {
            Job::Convert(request) => self.converter.convert(request).await?,
            Job::Merge(request) => self.converter.merge(request).await?,
        }

        let output = job.output();
        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(ConversionError::MissingOutput(output.to_path_buf()).into());
        }
        Ok(())
    }
}
