//! Report-type tags and typed filter specs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of report a job asks for.
///
/// Only [`ReportType::ProductSales`] has a builder today; the remaining tags
/// are reserved and fail fast when dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    ProductSales,
    Sales,
    UserActivity,
    Inventory,
    Invoices,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::ProductSales => "product_sales",
            ReportType::Sales => "sales",
            ReportType::UserActivity => "user_activity",
            ReportType::Inventory => "inventory",
            ReportType::Invoices => "invoices",
        }
    }
}

impl core::fmt::Display for ReportType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ReportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product_sales" => Ok(ReportType::ProductSales),
            "sales" => Ok(ReportType::Sales),
            "user_activity" => Ok(ReportType::UserActivity),
            "inventory" => Ok(ReportType::Inventory),
            "invoices" => Ok(ReportType::Invoices),
            other => Err(format!("unknown report type: {other}")),
        }
    }
}

/// Sort applied by the repository when fetching rows.
///
/// Result order is whatever the repository returns; callers that need a
/// deterministic report must pass an explicit sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    CreatedAtAsc,
    CreatedAtDesc,
}

/// Query spec for the product-sales report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductSalesFilters {
    /// Restrict to sales of one vendor.
    pub vendor_id: Option<Uuid>,
    /// Inclusive lower bound on the sale creation date.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on the sale creation date.
    pub to: Option<DateTime<Utc>>,
    pub sort: Option<SortOrder>,
}

/// Typed per-report query spec.
///
/// One variant per implemented report type; the repository capability is the
/// only component that interprets the contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "report", rename_all = "snake_case")]
pub enum ReportFilters {
    ProductSales(ProductSalesFilters),
}
