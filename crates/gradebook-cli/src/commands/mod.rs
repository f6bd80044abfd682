//! Subcommand implementations.

pub mod context;
pub mod grades;
pub mod import;
pub mod init;
pub mod list;
pub mod report;
pub mod status;
pub mod validate;
