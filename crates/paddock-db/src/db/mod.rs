//! Database repositories for the data access layer.
//!
//! Status-changing invoice updates are guarded by the expected current
//! status in the WHERE clause, so the state machine holds even under
//! concurrent operators. Supplier and vehicle rows are only touched inside
//! the approval transaction and have no standalone repository.

pub mod invoice;

pub use invoice::InvoiceRepository;
