//! Error types.
//!
//! [`GradebookError`] is what the public operations return. Converter
//! implementations report [`ConversionError`] through `anyhow`, and the
//! converter session downcasts it to decide whether a retry makes sense.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by gradebook operations.
#[derive(Debug, Error)]
pub enum GradebookError {
    /// Input rejected before anything was written.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Document conversion kept failing after all retry attempts.
    #[error("document conversion failed after {attempts} attempt(s): {message}")]
    Conversion { attempts: u32, message: String },

    /// Missing template or bad settings. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A template could not be parsed or filled.
    #[error("template error: {0}")]
    Template(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result alias used across the crate.
pub type Result<T, E = GradebookError> = std::result::Result<T, E>;

impl GradebookError {
    pub fn not_found(what: impl Into<String>) -> Self {
        GradebookError::NotFound(what.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        GradebookError::Validation(message.into())
    }
}

/// Failures reported by a document converter.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The conversion service could not be reached.
    #[error("converter unavailable: {0}")]
    Unavailable(String),

    /// The conversion service answered with an error status.
    #[error("conversion service error (HTTP {status}): {message}")]
    Service { status: u16, message: String },

    /// The converter did not answer in time.
    #[error("conversion timed out after {0}s")]
    Timeout(u64),

    /// The converter reported success but wrote nothing.
    #[error("converter produced no output at {}", .0.display())]
    MissingOutput(PathBuf),

    /// An external converter command exited unsuccessfully.
    #[error("converter command failed (exit code {code:?}): {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },

    /// The converter program is not installed.
    #[error("converter program not found: {0}")]
    ProgramNotFound(String),

    /// The input document cannot be converted at all.
    #[error("invalid input document: {0}")]
    InvalidInput(String),
}

impl ConversionError {
    /// Returns `true` if retrying the same request cannot succeed.
    pub fn is_permanent(&self) -> bool {
        match self {
            ConversionError::InvalidInput(_) | ConversionError::ProgramNotFound(_) => true,
            ConversionError::Service { status, .. } => {
                (400..500).contains(status) && *status != 429
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_permanent() {
        let bad_request = ConversionError::Service {
            status: 400,
            message: "bad html".into(),
        };
        assert!(bad_request.is_permanent());
        let throttled = ConversionError::Service {
            status: 429,
            message: "slow down".into(),
        };
        assert!(!throttled.is_permanent());
        let down = ConversionError::Service {
            status: 503,
            message: "busy".into(),
        };
        assert!(!down.is_permanent());
        assert!(!ConversionError::Timeout(30).is_permanent());
        assert!(ConversionError::ProgramNotFound("wkhtmltopdf".into()).is_permanent());
    }

    #[test]
    fn downcast_through_anyhow() {
        let err: anyhow::Error = ConversionError::InvalidInput("empty file".into()).into();
        let classified = err.downcast_ref::<ConversionError>();
        assert!(classified.is_some_and(|e| e.is_permanent()));
    }

    #[test]
    fn conversion_error_message_names_attempts() {
        let err = GradebookError::Conversion {
            attempts: 3,
            message: "converter unavailable".into(),
        };
        assert!(err.to_string().contains("3 attempt(s)"));
    }
}
