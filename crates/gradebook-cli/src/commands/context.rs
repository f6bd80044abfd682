//! State shared by the commands that touch the data file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};

use gradebook_convert::config::{create_converter, load_config_from, GradebookConfig};
use gradebook_core::conversion::ConverterSession;
use gradebook_core::engine::{GradingEngine, GradingEngineConfig};
use gradebook_core::store::MemoryStore;
use gradebook_report::{ReportGenerator, ReportSettings};

/// Loaded configuration, record store and grading engine.
pub struct Context {
    pub config: GradebookConfig,
    pub store: Arc<MemoryStore>,
    pub engine: Arc<GradingEngine>,
}

impl Context {
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let config = load_config_from(config_path.as_deref())?;
        let store = Arc::new(
            MemoryStore::open(&config.data_path)
                .with_context(|| format!("failed to open {}", config.data_path.display()))?,
        );
        let engine = Arc::new(GradingEngine::new(
            store.clone(),
            GradingEngineConfig {
                reference_ttl: config.reference_ttl(),
                ..GradingEngineConfig::default()
            },
        ));
        tracing::debug!(data = %config.data_path.display(), "loaded gradebook data");
        Ok(Self {
            config,
            store,
            engine,
        })
    }

    /// Write the record store back to the data file.
    pub fn save(&self) -> Result<()> {
        let stats = self.engine.references().stats();
        tracing::debug!(hits = stats.hits, misses = stats.misses, "reference cache");
        self.store.save_json(&self.config.data_path)
    }

    pub fn report_generator(&self) -> Result<ReportGenerator> {
        let converter = create_converter(&self.config.converter)?;
        let session = Arc::new(ConverterSession::new(
            Arc::from(converter),
            self.config.retry_policy(),
        ));
        let settings = ReportSettings {
            templates_dir: self.config.templates_dir.clone(),
            output_dir: self.config.output_dir.clone(),
            work_dir: self.config.work_dir(),
            media_url: self.config.media_url.clone(),
            render_parallelism: self.config.render_parallelism.max(1),
            pair_yearly_level_reports: self.config.pair_yearly_level_reports,
        };
        Ok(ReportGenerator::new(self.engine.clone(), session, settings))
    }
}

/// Display a path relative to the working directory when possible.
pub fn display_path(path: &Path) -> String {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| path.strip_prefix(cwd).ok().map(Path::to_path_buf))
        .unwrap_or_else(|| path.to_path_buf())
        .display()
        .to_string()
}
