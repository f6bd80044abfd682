//! Gotenberg-compatible HTTP conversion service.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tracing::instrument;

use gradebook_core::error::ConversionError;
use gradebook_core::traits::{ConvertRequest, DocumentConverter, MergeRequest};

const CONVERT_ROUTE: &str = "/forms/chromium/convert/html";
const MERGE_ROUTE: &str = "/forms/pdfengines/merge";

/// Converts HTML to PDF and merges PDFs over HTTP.
pub struct HttpConverter {
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpConverter {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            timeout,
            client,
        })
    }

    async fn read_input(path: &Path) -> Result<Vec<u8>, ConversionError> {
        tokio::fs::read(path).await.map_err(|e| {
            ConversionError::InvalidInput(format!("cannot read {}: {e}", path.display()))
        })
    }

    fn part(bytes: Vec<u8>, file_name: String, mime: &str) -> Result<Part, ConversionError> {
        Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime)
            .map_err(|e| ConversionError::InvalidInput(e.to_string()))
    }

    /// Post a form and write the response body to `output`.
    async fn submit(&self, route: &str, form: Form, output: &Path) -> anyhow::Result<()> {
        let mut request = self
            .client
            .post(format!("{}{route}", self.base_url))
            .multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;

        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(ConversionError::Service {
                status,
                message: body,
            }
            .into());
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.map_send_error(e))?;
        if bytes.is_empty() {
            return Err(ConversionError::MissingOutput(output.to_path_buf()).into());
        }
        tokio::fs::write(output, &bytes).await?;
        Ok(())
    }

    fn map_send_error(&self, e: reqwest::Error) -> ConversionError {
        if e.is_timeout() {
            ConversionError::Timeout(self.timeout.as_secs())
        } else if e.is_connect() {
            ConversionError::Unavailable(format!(
                "conversion service not reachable at {}",
                self.base_url
            ))
        } else {
            ConversionError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
impl DocumentConverter for HttpConverter {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self, request), fields(input = %request.input.display()))]
    async fn convert(&self, request: &ConvertRequest) -> anyhow::Result<()> {
        let html = Self::read_input(&request.input).await?;
        let form = Form::new().part(
            "files",
            Self::part(html, "index.html".to_string(), "text/html")?,
        );
        self.submit(CONVERT_ROUTE, form, &request.output).await
    }

    #[instrument(skip(self, request), fields(inputs = request.inputs.len()))]
    async fn merge(&self, request: &MergeRequest) -> anyhow::Result<()> {
        if request.inputs.is_empty() {
            return Err(ConversionError::InvalidInput("nothing to merge".into()).into());
        }
        // The service merges in alphabetical order of file names.
        let mut form = Form::new();
        for (i, input) in request.inputs.iter().enumerate() {
            let bytes = Self::read_input(input).await?;
            form = form.part(
                "files",
                Self::part(bytes, format!("{:03}.pdf", i + 1), "application/pdf")?,
            );
        }
        self.submit(MERGE_ROUTE, form, &request.output).await
    }
}
