//! The product-sales report builder.

use std::sync::Arc;

use rust_xlsxwriter::{Format, Workbook, XlsxError};
use tracing::debug;

use reportworks_core::{ReportFilters, ReportType};

use crate::builder::{BuildError, BuiltReport, ProgressSink, ReportBuilder};
use crate::repository::SalesRepository;
use crate::rows::{order_status_label, SaleRow};

const HEADERS: [&str; 8] = [
    "#",
    "Order Ref",
    "Status",
    "Amount",
    "Quantity",
    "Unit Price",
    "Batch Details",
    "Date",
];

/// Column index of the batch-breakdown cell (word-wrapped, widened).
const BATCH_COL: u16 = 6;

/// Builds the product-sales spreadsheet from repository rows.
///
/// Serves as the template for future report types: fetch via the capability,
/// project rows, render with [`render_sheet`].
pub struct ProductSalesBuilder {
    repository: Arc<dyn SalesRepository>,
}

impl ProductSalesBuilder {
    pub fn new(repository: Arc<dyn SalesRepository>) -> Self {
        Self { repository }
    }
}

impl ReportBuilder for ProductSalesBuilder {
    fn report_type(&self) -> ReportType {
        ReportType::ProductSales
    }

    fn build(
        &self,
        filters: &ReportFilters,
        progress: ProgressSink<'_>,
    ) -> Result<BuiltReport, BuildError> {
        let ReportFilters::ProductSales(filters) = filters;

        let rows = self.repository.find_product_sales(filters)?;
        if rows.is_empty() {
            return Err(BuildError::NoData);
        }
        progress(20);
        debug!(rows = rows.len(), "fetched product sales rows");

        let bytes = render_sheet(&rows).map_err(|e| BuildError::Render(e.to_string()))?;
        progress(80);

        Ok(BuiltReport {
            bytes,
            rows: rows.len(),
        })
    }
}

/// Newline-joined breakdown of a row's batch allocations; empty when the row
/// has none.
pub fn batch_breakdown(row: &SaleRow) -> String {
    row.batches
        .iter()
        .map(|b| format!("Batch: {} · Cost: {} · Qty: {}", b.batch_no, b.cost_price, b.quantity))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_sheet(rows: &[SaleRow]) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Product Sales")?;

    let bold = Format::new().set_bold();
    let currency = Format::new().set_num_format("#,##0.00");
    let wrap = Format::new().set_text_wrap();

    for (col, header) in HEADERS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *header, &bold)?;
    }

    for (i, row) in rows.iter().enumerate() {
        let r = (i + 1) as u32;
        // Sequence is 1-based and reflects repository order.
        sheet.write_number(r, 0, (i + 1) as f64)?;
        sheet.write_string(r, 1, &row.order_ref)?;
        sheet.write_string(r, 2, order_status_label(row.order_status))?;
        // Amount is computed here; the number format is the only rounding.
        sheet.write_number_with_format(r, 3, row.amount(), &currency)?;
        sheet.write_number(r, 4, f64::from(row.quantity))?;
        sheet.write_number_with_format(r, 5, row.unit_price, &currency)?;
        sheet.write_string_with_format(r, BATCH_COL, batch_breakdown(row), &wrap)?;
        sheet.write_string(r, 7, row.created_at.format("%Y-%m-%d").to_string())?;
    }

    sheet.set_column_width(1, 16)?;
    sheet.set_column_width(2, 12)?;
    sheet.set_column_width(BATCH_COL, 40)?;
    sheet.set_column_width(7, 12)?;

    workbook.save_to_buffer()
}
