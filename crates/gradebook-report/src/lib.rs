//! gradebook-report: printable report cards.
//!
//! Selects a template from the student's status, fills it from the grade
//! sheet, converts it through the converter session, merges whole-level
//! batches and caches the resulting artifacts.

pub mod cache;
pub mod generator;
pub mod html;
pub mod merge;
pub mod render;
pub mod template;

pub use cache::{ArtifactCache, CacheLookup, SweepReport};
pub use generator::{ReportGenerator, ReportOutcome, ReportSettings};
pub use template::{select_template, TemplateId, TemplateSelector};
