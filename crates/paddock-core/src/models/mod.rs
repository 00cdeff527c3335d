//! Domain models shared across the pipeline crates.

pub mod domain;
pub mod extraction;
pub mod invoice;

pub use domain::{
    CreatedItemsSummary, CreatedMaintenance, CreatedPart, Maintenance, Part, ResolvedSupplier,
    Supplier, Vehicle,
};
pub use extraction::{
    ExtractedInvoiceData, ExtractedMaintenance, ExtractedPart, InvoiceClassification,
};
pub use invoice::{Invoice, InvoiceStatus, ReviewEdit};
