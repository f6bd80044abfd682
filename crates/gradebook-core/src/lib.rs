//! gradebook-core: grade aggregation, status evaluation and promotion.
//!
//! This crate defines the data model, the store and converter traits, and
//! the grading rules that the rest of the gradebook system builds on.

pub mod aggregate;
pub mod conversion;
pub mod engine;
pub mod error;
pub mod evaluate;
pub mod grades;
pub mod model;
pub mod parser;
pub mod policy;
pub mod promotion;
pub mod store;
pub mod traits;
