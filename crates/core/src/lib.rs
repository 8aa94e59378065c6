//! `reportworks-core` — domain foundation for the report pipeline.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the report-type tag and the typed filter specs.

pub mod id;
pub mod report;

pub use id::JobId;
pub use report::{ProductSalesFilters, ReportFilters, ReportType, SortOrder};
