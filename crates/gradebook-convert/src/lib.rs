//! gradebook-convert: document converter integrations.
//!
//! Implements the `DocumentConverter` trait for an HTTP conversion service,
//! external commands and an in-process mock, and loads the gradebook
//! configuration that selects between them.

pub mod command;
pub mod config;
pub mod http;
pub mod mock;

pub use config::{
    create_converter, load_config, load_config_from, ConverterConfig, GradebookConfig,
};
pub use gradebook_core::error::ConversionError;
