//! Gradebook configuration and converter factory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use gradebook_core::conversion::RetryPolicy;
use gradebook_core::traits::DocumentConverter;

use crate::command::CommandConverter;
use crate::http::HttpConverter;
use crate::mock::MockConverter;

/// Which document converter to use.
///
/// Note: Custom Debug impl masks API keys to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConverterConfig {
    /// A Gotenberg-compatible conversion service.
    Http {
        #[serde(default = "default_http_url")]
        base_url: String,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// Local programs. `{input}`, `{output}` and `{inputs}` are substituted.
    Command {
        #[serde(default = "default_convert_program")]
        program: String,
        #[serde(default = "default_convert_args")]
        args: Vec<String>,
        #[serde(default = "default_merge_program")]
        merge_program: String,
        #[serde(default = "default_merge_args")]
        merge_args: Vec<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// In-process stand-in that writes placeholder documents.
    Mock {},
}

impl std::fmt::Debug for ConverterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConverterConfig::Http {
                base_url,
                api_key,
                timeout_secs,
            } => f
                .debug_struct("Http")
                .field("base_url", base_url)
                .field("api_key", &api_key.as_ref().map(|_| "***"))
                .field("timeout_secs", timeout_secs)
                .finish(),
            ConverterConfig::Command {
                program,
                args,
                merge_program,
                merge_args,
                timeout_secs,
            } => f
                .debug_struct("Command")
                .field("program", program)
                .field("args", args)
                .field("merge_program", merge_program)
                .field("merge_args", merge_args)
                .field("timeout_secs", timeout_secs)
                .finish(),
            ConverterConfig::Mock {} => f.debug_struct("Mock").finish(),
        }
    }
}

impl Default for ConverterConfig {
    fn default() -> Self {
        ConverterConfig::Http {
            base_url: default_http_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_http_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_convert_program() -> String {
    "wkhtmltopdf".to_string()
}
fn default_convert_args() -> Vec<String> {
    vec!["--quiet".into(), "{input}".into(), "{output}".into()]
}
fn default_merge_program() -> String {
    "pdfunite".to_string()
}
fn default_merge_args() -> Vec<String> {
    vec!["{inputs}".into(), "{output}".into()]
}

/// Top-level gradebook configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradebookConfig {
    /// JSON snapshot holding the school records.
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
    /// Directory holding `<template>.html` files.
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,
    /// Directory generated reports are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Scratch directory for rendered intermediates (defaults to
    /// `<output_dir>/.work`).
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    /// Public prefix of `output_dir`, used to build artifact URLs.
    #[serde(default = "default_media_url")]
    pub media_url: String,
    /// Age in days after which cached reports are swept.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_attempts")]
    pub max_conversion_attempts: u32,
    /// Delay before the first conversion retry in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Students rendered concurrently in a level report.
    #[serde(default = "default_parallelism")]
    pub render_parallelism: usize,
    /// Print yearly level reports two students per sheet.
    #[serde(default = "default_true")]
    pub pair_yearly_level_reports: bool,
    #[serde(default = "default_reference_ttl")]
    pub reference_ttl_secs: u64,
    #[serde(default)]
    pub converter: ConverterConfig,
}

fn default_data_path() -> PathBuf {
    PathBuf::from("./gradebook.json")
}
fn default_templates_dir() -> PathBuf {
    PathBuf::from("./templates")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./output_gradesheets")
}
fn default_media_url() -> String {
    "/media/".to_string()
}
fn default_retention_days() -> u32 {
    2
}
fn default_attempts() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    2000
}
fn default_parallelism() -> usize {
    4
}
fn default_true() -> bool {
    true
}
fn default_reference_ttl() -> u64 {
    300
}

impl Default for GradebookConfig {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
            templates_dir: default_templates_dir(),
            output_dir: default_output_dir(),
            work_dir: None,
            media_url: default_media_url(),
            retention_days: default_retention_days(),
            max_conversion_attempts: default_attempts(),
            retry_delay_ms: default_retry_delay(),
            render_parallelism: default_parallelism(),
            pair_yearly_level_reports: true,
            reference_ttl_secs: default_reference_ttl(),
            converter: ConverterConfig::default(),
        }
    }
}

impl GradebookConfig {
    /// Scratch directory for rendered intermediates.
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join(".work"))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_conversion_attempts.max(1),
            initial_delay: Duration::from_millis(self.retry_delay_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn reference_ttl(&self) -> Duration {
        Duration::from_secs(self.reference_ttl_secs)
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let var_name = &result[start + 2..start + end];
        let value = std::env::var(var_name).unwrap_or_default();
        result = format!(
            "{}{}{}",
            &result[..start],
            value,
            &result[start + end + 1..]
        );
    }
    result
}

fn resolve_converter_config(config: &ConverterConfig) -> ConverterConfig {
    match config {
        ConverterConfig::Http {
            base_url,
            api_key,
            timeout_secs,
        } => ConverterConfig::Http {
            base_url: resolve_env_vars(base_url),
            api_key: api_key.as_deref().map(resolve_env_vars),
            timeout_secs: *timeout_secs,
        },
        ConverterConfig::Command {
            program,
            args,
            merge_program,
            merge_args,
            timeout_secs,
        } => ConverterConfig::Command {
            program: resolve_env_vars(program),
            args: args.iter().map(|a| resolve_env_vars(a)).collect(),
            merge_program: resolve_env_vars(merge_program),
            merge_args: merge_args.iter().map(|a| resolve_env_vars(a)).collect(),
            timeout_secs: *timeout_secs,
        },
        ConverterConfig::Mock {} => ConverterConfig::Mock {},
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `gradebook.toml` in the current directory
/// 2. `~/.config/gradebook/config.toml`
///
/// Environment variable override: `GRADEBOOK_CONVERTER_URL` selects the HTTP
/// converter at that URL.
pub fn load_config() -> Result<GradebookConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<GradebookConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("gradebook.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            parse_config_str(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => GradebookConfig::default(),
    };

    if let Ok(url) = std::env::var("GRADEBOOK_CONVERTER_URL") {
        match &mut config.converter {
            ConverterConfig::Http { base_url, .. } => *base_url = url,
            other => {
                *other = ConverterConfig::Http {
                    base_url: url,
                    api_key: None,
                    timeout_secs: default_timeout_secs(),
                }
            }
        }
    }

    config.converter = resolve_converter_config(&config.converter);
    Ok(config)
}

/// Parse a configuration file body.
pub fn parse_config_str(content: &str) -> Result<GradebookConfig> {
    Ok(toml::from_str::<GradebookConfig>(content)?)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("gradebook"))
}

/// Create a converter instance from its configuration.
pub fn create_converter(config: &ConverterConfig) -> Result<Box<dyn DocumentConverter>> {
    match config {
        ConverterConfig::Http {
            base_url,
            api_key,
            timeout_secs,
        } => Ok(Box::new(HttpConverter::new(
            base_url,
            api_key.clone(),
            Duration::from_secs(*timeout_secs),
        )?)),
        ConverterConfig::Command {
            program,
            args,
            merge_program,
            merge_args,
            timeout_secs,
        } => Ok(Box::new(CommandConverter::new(
            program,
            args.clone(),
            merge_program,
            merge_args.clone(),
            Duration::from_secs(*timeout_secs),
        ))),
        ConverterConfig::Mock {} => Ok(Box::new(MockConverter::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_GRADEBOOK_TEST_VAR", "hello");
        assert_eq!(resolve_env_vars("${_GRADEBOOK_TEST_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix_${_GRADEBOOK_TEST_VAR}_suffix"),
            "prefix_hello_suffix"
        );
        assert_eq!(resolve_env_vars("${unterminated"), "${unterminated");
        std::env::remove_var("_GRADEBOOK_TEST_VAR");
    }

    #[test]
    fn default_config() {
        let config = GradebookConfig::default();
        assert_eq!(config.retention_days, 2);
        assert_eq!(config.max_conversion_attempts, 3);
        assert_eq!(config.render_parallelism, 4);
        assert!(config.pair_yearly_level_reports);
        assert_eq!(config.work_dir(), PathBuf::from("./output_gradesheets/.work"));
        assert!(matches!(config.converter, ConverterConfig::Http { .. }));
    }

    #[test]
    fn parse_command_converter() {
        let config = parse_config_str(
            r#"
output_dir = "/srv/reports"
retention_days = 7
retry_delay_ms = 10

[converter]
type = "command"
program = "soffice"
args = ["--headless", "--convert-to", "pdf", "{input}", "--outdir", "{output}"]
"#,
        )
        .unwrap();
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.retry_policy().initial_delay, Duration::from_millis(10));
        let ConverterConfig::Command {
            program,
            merge_program,
            args,
            ..
        } = &config.converter
        else {
            panic!("expected command converter");
        };
        assert_eq!(program, "soffice");
        assert_eq!(args.len(), 6);
        assert_eq!(merge_program, "pdfunite");
    }

    #[test]
    fn debug_masks_api_key() {
        let config = ConverterConfig::Http {
            base_url: "http://gotenberg:3000".into(),
            api_key: Some("secret-token".into()),
            timeout_secs: 30,
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = load_config_from(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn explicit_path_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gradebook.toml");
        std::fs::write(
            &path,
            "media_url = \"https://school.example/media/\"\n[converter]\ntype = \"mock\"\n",
        )
        .unwrap();
        let config = load_config_from(Some(&path)).unwrap();
        assert_eq!(config.media_url, "https://school.example/media/");
    }

    #[test]
    fn mock_converter_is_created() {
        let converter = create_converter(&ConverterConfig::Mock {}).unwrap();
        assert_eq!(converter.name(), "mock");
    }
}
