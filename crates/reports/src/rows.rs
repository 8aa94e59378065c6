//! Row shapes returned by the repository capability.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One batch allocation under a sale line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchAllocation {
    pub batch_no: String,
    pub cost_price: f64,
    pub quantity: u32,
}

/// One sold line as the repository returns it.
///
/// `unit_price` is the price at time of purchase; the report amount is always
/// computed from it, never read pre-computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleRow {
    pub vendor_id: Uuid,
    /// Reference number of the parent order group.
    pub order_ref: String,
    /// Numeric status code of the parent order group.
    pub order_status: i32,
    pub quantity: u32,
    pub unit_price: f64,
    pub batches: Vec<BatchAllocation>,
    pub created_at: DateTime<Utc>,
}

impl SaleRow {
    /// Line amount; precision is only applied by the renderer's number
    /// format.
    pub fn amount(&self) -> f64 {
        f64::from(self.quantity) * self.unit_price
    }
}

/// Human-readable label for an order-group status code.
pub fn order_status_label(code: i32) -> String {
    match code {
        0 => "Pending".to_string(),
        1 => "Approved".to_string(),
        2 => "Processing".to_string(),
        3 => "Shipped".to_string(),
        4 => "Delivered".to_string(),
        5 => "Cancelled".to_string(),
        other => format!("Unknown ({other})"),
    }
}
