//! Paddock Core Library
//!
//! This crate provides the domain models, invoice status state machine,
//! extraction payload value types, and configuration shared across all
//! Paddock components.

pub mod config;
pub mod models;
pub mod telemetry;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use models::{
    CreatedItemsSummary, CreatedMaintenance, CreatedPart, ExtractedInvoiceData,
    ExtractedMaintenance, ExtractedPart, Invoice, InvoiceClassification, InvoiceStatus,
    Maintenance, Part, ResolvedSupplier, ReviewEdit, Supplier, Vehicle,
};
pub use telemetry::init_tracing;
