//! `reportworks-reports` — report builders and spreadsheet rendering.
//!
//! A builder is a pure transformation: fetch rows through the repository
//! capability, project them into report lines, render an XLSX artifact in
//! memory and return the bytes plus the row count. Dispatch from a job's
//! report type to a builder goes through [`BuilderRegistry`].

pub mod builder;
pub mod product_sales;
pub mod repository;
pub mod rows;

pub use builder::{BuildError, BuilderRegistry, BuiltReport, ReportBuilder};
pub use product_sales::ProductSalesBuilder;
pub use repository::{InMemorySalesRepository, RepositoryError, SalesRepository};
pub use rows::{order_status_label, BatchAllocation, SaleRow};
