//! Structured data extracted from an invoice document.
//!
//! These value types mirror the JSON the extraction prompt asks the model to
//! produce. They are never persisted as rows; the whole payload is stored
//! serialized inside the invoice record.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One part/item line extracted from the invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedPart {
    pub name: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: f64,
    pub unit_price: f64,
    pub total_price: f64,
}

fn default_quantity() -> f64 {
    1.0
}

/// One maintenance/service group extracted from the invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMaintenance {
    pub description: String,
    #[serde(default)]
    pub labor_cost: Option<f64>,
    #[serde(default)]
    pub parts: Vec<ExtractedPart>,
}

impl ExtractedMaintenance {
    /// Aggregated cost: labor (default 0) plus every part's total price.
    pub fn total_cost(&self) -> f64 {
        self.labor_cost.unwrap_or(0.0)
            + self.parts.iter().map(|p| p.total_price).sum::<f64>()
    }
}

/// How the extraction classified the document.
///
/// The underlying schema keeps `is_maintenance` and `is_parts_only` as
/// independent booleans (the prompt asks for mutual exclusivity but nothing
/// enforces it), so an inconsistent response surfaces as `Ambiguous` rather
/// than being rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceClassification {
    Maintenance,
    PartsOnly,
    Ambiguous,
}

/// The full extraction result for one invoice document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedInvoiceData {
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub invoice_date: Option<NaiveDate>,
    #[serde(default)]
    pub supplier_name: Option<String>,
    #[serde(default)]
    pub supplier_address: Option<String>,
    #[serde(default)]
    pub supplier_tax_id: Option<String>,

    // Document classification
    #[serde(default)]
    pub is_maintenance: bool,
    #[serde(default)]
    pub is_parts_only: bool,

    // Vehicle hints, if the document mentions them
    #[serde(default)]
    pub vehicle_id: Option<Uuid>,
    #[serde(default)]
    pub vehicle_plate: Option<String>,
    #[serde(default)]
    pub vehicle_vin: Option<String>,
    #[serde(default)]
    pub mileage: Option<i32>,

    // Content
    #[serde(default)]
    pub maintenances: Vec<ExtractedMaintenance>,
    #[serde(default)]
    pub parts_only: Vec<ExtractedPart>,

    // Totals; only total_amount is guaranteed present
    #[serde(default)]
    pub subtotal: Option<f64>,
    #[serde(default)]
    pub tax_amount: Option<f64>,
    pub total_amount: f64,

    /// Model confidence in the extraction, in [0, 1].
    pub confidence: f64,
}

impl ExtractedInvoiceData {
    /// Schema-level validation run after JSON deserialization.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!(
                "confidence {} out of range [0, 1]",
                self.confidence
            ));
        }
        if !self.total_amount.is_finite() {
            return Err("total_amount is not a finite number".to_string());
        }
        Ok(())
    }

    pub fn classification(&self) -> InvoiceClassification {
        match (self.is_maintenance, self.is_parts_only) {
            (true, false) => InvoiceClassification::Maintenance,
            (false, true) => InvoiceClassification::PartsOnly,
            _ => InvoiceClassification::Ambiguous,
        }
    }

    /// Mileage to record on created maintenance rows: the extraction's value
    /// if present, else the linked vehicle's odometer, else 0.
    pub fn resolve_mileage(&self, vehicle_odometer: Option<i32>) -> i32 {
        self.mileage.or(vehicle_odometer).unwrap_or(0)
    }
}
