//! Local command-line converter (wkhtmltopdf, LibreOffice, pdfunite, ...).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::instrument;

use gradebook_core::error::ConversionError;
use gradebook_core::traits::{ConvertRequest, DocumentConverter, MergeRequest};

/// Runs external programs to convert and merge documents.
///
/// Arguments may contain `{input}` and `{output}`. An argument that is exactly
/// `{inputs}` expands to one argument per merge input.
pub struct CommandConverter {
    program: String,
    args: Vec<String>,
    merge_program: String,
    merge_args: Vec<String>,
    timeout: Duration,
}

impl CommandConverter {
    pub fn new(
        program: &str,
        args: Vec<String>,
        merge_program: &str,
        merge_args: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.to_string(),
            args,
            merge_program: merge_program.to_string(),
            merge_args,
            timeout,
        }
    }

    async fn run(&self, program: &str, args: Vec<String>) -> anyhow::Result<()> {
        tracing::debug!(program, ?args, "running converter command");

        let mut cmd = Command::new(program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ConversionError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ConversionError::ProgramNotFound(program.to_string())
                }
                _ => ConversionError::Unavailable(format!("failed to run {program}: {e}")),
            })?;

        if !output.status.success() {
            return Err(ConversionError::CommandFailed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Fill placeholders in a configured argument list.
fn expand_args(
    template: &[String],
    input: Option<&Path>,
    inputs: &[PathBuf],
    output: &Path,
) -> Vec<String> {
    let mut args = Vec::with_capacity(template.len() + inputs.len());
    for arg in template {
        if arg == "{inputs}" {
            args.extend(inputs.iter().map(|p| p.display().to_string()));
            continue;
        }
        let mut expanded = arg.replace("{output}", &output.display().to_string());
        if let Some(input) = input {
            expanded = expanded.replace("{input}", &input.display().to_string());
        }
        args.push(expanded);
    }
    args
}

#[async_trait]
impl DocumentConverter for CommandConverter {
    fn name(&self) -> &str {
        "command"
    }

    #[instrument(skip(self, request), fields(program = %self.program))]
    async fn convert(&self, request: &ConvertRequest) -> anyhow::Result<()> {
        if !request.input.exists() {
            return Err(ConversionError::InvalidInput(format!(
                "input not found: {}",
                request.input.display()
            ))
            .into());
        }
        let args = expand_args(&self.args, Some(&request.input), &[], &request.output);
        self.run(&self.program, args).await
    }

    #[instrument(skip(self, request), fields(program = %self.merge_program))]
    async fn merge(&self, request: &MergeRequest) -> anyhow::Result<()> {
        if request.inputs.is_empty() {
            return Err(ConversionError::InvalidInput("nothing to merge".into()).into());
        }
        let args = expand_args(&self.merge_args, None, &request.inputs, &request.output);
        self.run(&self.merge_program, args).await
    }
}
