//! Repository capability: how report data is fetched.
//!
//! The pipeline treats the relational store as opaque; builders only see this
//! trait. The in-memory implementation backs tests and dev setups.

use std::sync::RwLock;

use reportworks_core::{ProductSalesFilters, SortOrder};

use crate::rows::SaleRow;

/// Repository failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    /// Connectivity/transport fault; safe to retry.
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    /// The filter predicate itself is malformed; retrying cannot help.
    #[error("invalid filters: {0}")]
    InvalidFilters(String),
}

/// Read access to sales rows.
///
/// Implementations must be safe to share across worker threads.
pub trait SalesRepository: Send + Sync {
    /// Rows matching the filters, in repository order unless an explicit sort
    /// was requested.
    fn find_product_sales(
        &self,
        filters: &ProductSalesFilters,
    ) -> Result<Vec<SaleRow>, RepositoryError>;
}

/// In-memory repository for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySalesRepository {
    rows: RwLock<Vec<SaleRow>>,
}

impl InMemorySalesRepository {
    pub fn new(rows: Vec<SaleRow>) -> Self {
        Self {
            rows: RwLock::new(rows),
        }
    }

    pub fn push(&self, row: SaleRow) {
        if let Ok(mut rows) = self.rows.write() {
            rows.push(row);
        }
    }
}

impl SalesRepository for InMemorySalesRepository {
    fn find_product_sales(
        &self,
        filters: &ProductSalesFilters,
    ) -> Result<Vec<SaleRow>, RepositoryError> {
        let rows = self
            .rows
            .read()
            .map_err(|e| RepositoryError::Unavailable(e.to_string()))?;

        let mut matched: Vec<SaleRow> = rows
            .iter()
            .filter(|r| filters.vendor_id.map_or(true, |v| r.vendor_id == v))
            .filter(|r| filters.from.map_or(true, |from| r.created_at >= from))
            .filter(|r| filters.to.map_or(true, |to| r.created_at < to))
            .cloned()
            .collect();

        match filters.sort {
            Some(SortOrder::CreatedAtAsc) => matched.sort_by_key(|r| r.created_at),
            Some(SortOrder::CreatedAtDesc) => {
                matched.sort_by_key(|r| std::cmp::Reverse(r.created_at))
            }
            None => {}
        }

        Ok(matched)
    }
}
