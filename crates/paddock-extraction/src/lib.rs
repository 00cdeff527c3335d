//! Invoice document extraction via a multimodal inference provider.
//!
//! The client tries an ordered list of candidate models until one returns a
//! parseable, schema-valid extraction. Quota errors, malformed responses and
//! transport failures all advance to the next candidate; only exhausting the
//! whole list is fatal.

pub mod client;
pub mod prompt;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use paddock_core::ExtractedInvoiceData;

pub use client::{is_quota_error, GeminiClient};
pub use prompt::build_extraction_prompt;

/// Extraction failures surfaced to the orchestrator.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("All {attempts} extraction models failed; last error: {last_error}")]
    Exhausted { attempts: usize, last_error: String },

    #[error("Unsupported document type: {0}")]
    UnsupportedDocument(String),

    #[error("Failed to prepare document for extraction: {0}")]
    DocumentPreparation(String),

    #[error("IO error reading document: {0}")]
    Io(#[from] std::io::Error),
}

/// Seam between the orchestrator and the concrete inference provider.
///
/// The credential is a per-call argument by design: client instances are
/// shared across concurrent jobs and must not carry per-operator state.
#[async_trait]
pub trait InvoiceExtractor: Send + Sync {
    async fn extract(
        &self,
        document_path: &Path,
        credential: &str,
        detailed_mode: bool,
    ) -> Result<ExtractedInvoiceData, ExtractionError>;
}
