//! Upload ingestion: validate, persist and queue a new invoice document.

use paddock_core::Invoice;
use paddock_db::InvoiceRepository;
use paddock_storage::DocumentStore;
use std::sync::Arc;

use crate::error::PipelineError;
use crate::orchestrator::ExtractionOrchestrator;
use crate::workflow::{resolve_credential, ProcessingJob};

/// Entry point for new invoice documents.
#[derive(Clone)]
pub struct IngestService {
    store: Arc<dyn DocumentStore>,
    invoices: InvoiceRepository,
    orchestrator: Arc<ExtractionOrchestrator>,
    default_credential: Option<String>,
}

impl IngestService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        invoices: InvoiceRepository,
        orchestrator: Arc<ExtractionOrchestrator>,
        default_credential: Option<String>,
    ) -> Self {
        Self {
            store,
            invoices,
            orchestrator,
            default_credential,
        }
    }

    /// Accept an uploaded document and start extraction in the background.
    ///
    /// The document is validated and persisted before the invoice row is
    /// created, so a rejected upload leaves no trace. Returns the PENDING
    /// invoice immediately; extraction runs fire-and-forget.
    pub async fn upload(
        &self,
        filename: &str,
        data: Vec<u8>,
        operator_key: Option<&str>,
    ) -> Result<Invoice, PipelineError> {
        // A missing credential rejects the upload before anything persists.
        let credential = resolve_credential(operator_key, self.default_credential.as_deref())?;

        let stored = self.store.save(filename, data).await?;

        let invoice = match self
            .invoices
            .create(&stored.key, &stored.url, filename)
            .await
        {
            Ok(invoice) => invoice,
            Err(e) => {
                // Don't leave an orphaned document behind.
                if let Err(cleanup_err) = self.store.delete(&stored.key).await {
                    tracing::warn!(key = %stored.key, error = %cleanup_err, "Failed to clean up document after insert failure");
                }
                return Err(e.into());
            }
        };

        tracing::info!(
            invoice_id = %invoice.id,
            filename = %filename,
            key = %stored.key,
            "Invoice uploaded"
        );

        let job = ProcessingJob {
            invoice_id: invoice.id,
            document_path: self.store.resolve_path(&stored.key)?,
            credential,
            detailed_mode: false,
        };
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move { orchestrator.run(job).await });

        Ok(invoice)
    }
}
