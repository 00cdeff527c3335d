use paddock_core::InvoiceStatus;
use paddock_extraction::ExtractionError;
use paddock_storage::StorageError;
use thiserror::Error;

/// Pipeline-level errors surfaced to callers of the workflow operations.
///
/// `InvalidTransition` and `InvalidPayload` are operator mistakes (reject the
/// request), `NotFound` a lookup miss, `Configuration` a deployment problem,
/// and `Internal` everything the operator cannot act on.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: InvoiceStatus,
        to: InvoiceStatus,
    },

    #[error("Invalid extraction payload: {0}")]
    InvalidPayload(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::Internal(e.into())
    }
}
