//! Training data ingestion: per-line parse errors and the aggregated report
//! shown to users once a model's input has been consumed.

pub mod schema;
pub mod report;
pub mod usage;

pub use schema::*;
pub use report::*;
pub use usage::*;
