//! Document storage for uploaded invoice files.
//!
//! The pipeline only needs a minimal contract from storage: validate and save
//! a binary blob under a collision-free name, read it back, and delete it.
//! Keys are relative (`invoices/{uuid}.{ext}`) and resolve to a path under
//! the configured base directory.

pub mod local;
pub mod traits;

pub use local::LocalDocumentStore;
pub use traits::{DocumentStore, StorageError, StorageResult, StoredDocument};
