//! Background extraction run for one invoice.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use paddock_core::Invoice;
use paddock_db::InvoiceRepository;
use paddock_extraction::{is_quota_error, InvoiceExtractor};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::workflow::ProcessingJob;

const MAX_ERROR_MESSAGE_LEN: usize = 500;

const QUOTA_MESSAGE: &str =
    "The extraction service is temporarily over its usage limit. Please try again later.";

/// The three invoice writes an extraction run performs.
///
/// All of them are status-guarded: `None` means the invoice was not in the
/// expected state, which the orchestrator treats as a lost race, not an
/// error.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn claim_for_processing(&self, id: Uuid) -> Result<Option<Invoice>>;

    async fn store_extraction(
        &self,
        id: Uuid,
        payload: &serde_json::Value,
        number: Option<&str>,
        date: Option<NaiveDate>,
        amount: f64,
        tax_amount: Option<f64>,
    ) -> Result<Option<Invoice>>;

    async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<Option<Invoice>>;
}

#[async_trait]
impl InvoiceStore for InvoiceRepository {
    async fn claim_for_processing(&self, id: Uuid) -> Result<Option<Invoice>> {
        InvoiceRepository::claim_for_processing(self, id).await
    }

    async fn store_extraction(
        &self,
        id: Uuid,
        payload: &serde_json::Value,
        number: Option<&str>,
        date: Option<NaiveDate>,
        amount: f64,
        tax_amount: Option<f64>,
    ) -> Result<Option<Invoice>> {
        InvoiceRepository::store_extraction(self, id, payload, number, date, amount, tax_amount)
            .await
    }

    async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<Option<Invoice>> {
        InvoiceRepository::mark_failed(self, id, error_message).await
    }
}

/// Drives one invoice from PENDING through extraction to REVIEW or FAILED.
///
/// `run` never returns an error: callers spawn it fire-and-forget, so every
/// failure ends up either on the invoice row or in the log.
pub struct ExtractionOrchestrator {
    invoices: Arc<dyn InvoiceStore>,
    extractor: Arc<dyn InvoiceExtractor>,
}

impl ExtractionOrchestrator {
    pub fn new(invoices: Arc<dyn InvoiceStore>, extractor: Arc<dyn InvoiceExtractor>) -> Self {
        Self {
            invoices,
            extractor,
        }
    }

    pub async fn run(&self, job: ProcessingJob) {
        let invoice_id = job.invoice_id;

        // Claim first. A job whose invoice is no longer PENDING (already
        // claimed, deleted, or approved meanwhile) is silently dropped.
        match self.invoices.claim_for_processing(invoice_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::warn!(invoice_id = %invoice_id, "Invoice is not pending, skipping extraction");
                return;
            }
            Err(e) => {
                tracing::error!(invoice_id = %invoice_id, error = %e, "Failed to claim invoice for processing");
                return;
            }
        }

        if let Err(e) = self.process(&job).await {
            let message = normalize_error_message(&e.to_string());
            tracing::error!(invoice_id = %invoice_id, error = %e, "Invoice extraction failed");

            // Best-effort: a failed status write must not panic the task.
            match self.invoices.mark_failed(invoice_id, &message).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::warn!(invoice_id = %invoice_id, "Invoice left processing concurrently, failure not recorded");
                }
                Err(db_err) => {
                    tracing::error!(invoice_id = %invoice_id, error = %db_err, "Failed to record extraction failure");
                }
            }
        }
    }

    async fn process(&self, job: &ProcessingJob) -> Result<(), PipelineError> {
        tracing::info!(
            invoice_id = %job.invoice_id,
            path = %job.document_path.display(),
            detailed_mode = job.detailed_mode,
            "Starting invoice extraction"
        );

        let extracted = self
            .extractor
            .extract(&job.document_path, &job.credential, job.detailed_mode)
            .await?;

        let payload = serde_json::to_value(&extracted)
            .map_err(|e| PipelineError::InvalidPayload(e.to_string()))?;

        // Payload, headline fields and the REVIEW status land in one
        // statement; an operator never sees REVIEW without the payload.
        let stored = self
            .invoices
            .store_extraction(
                job.invoice_id,
                &payload,
                extracted.invoice_number.as_deref(),
                extracted.invoice_date,
                extracted.total_amount,
                extracted.tax_amount,
            )
            .await?;

        match stored {
            Some(invoice) => {
                tracing::info!(
                    invoice_id = %invoice.id,
                    amount = extracted.total_amount,
                    confidence = extracted.confidence,
                    "Invoice extracted and ready for review"
                );
                Ok(())
            }
            None => {
                // Deleted or force-transitioned while we were extracting.
                tracing::warn!(invoice_id = %job.invoice_id, "Invoice left processing before the extraction could be stored");
                Ok(())
            }
        }
    }
}

/// Turn an internal error into the message stored on the invoice row.
///
/// Quota-style failures get a stable operator-facing message; anything else
/// is stored verbatim but length-bounded.
pub(crate) fn normalize_error_message(message: &str) -> String {
    if is_quota_error(message) {
        return QUOTA_MESSAGE.to_string();
    }
    if message.chars().count() > MAX_ERROR_MESSAGE_LEN {
        message.chars().take(MAX_ERROR_MESSAGE_LEN).collect()
    } else {
        message.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use paddock_core::{ExtractedInvoiceData, InvoiceStatus};
    use paddock_extraction::ExtractionError;
    use serde_json::json;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory store with the same status-guarded semantics as the
    /// database-backed repository.
    struct MemoryStore {
        invoice: Mutex<Invoice>,
    }

    impl MemoryStore {
        fn new(status: InvoiceStatus) -> Self {
            Self {
                invoice: Mutex::new(Invoice {
                    id: Uuid::new_v4(),
                    file_path: "invoices/scan.pdf".to_string(),
                    file_url: "/uploads/invoices/scan.pdf".to_string(),
                    original_filename: "scan.pdf".to_string(),
                    status,
                    number: None,
                    date: None,
                    amount: None,
                    tax_amount: None,
                    extracted_data: None,
                    error_message: None,
                    vehicle_id: None,
                    supplier_id: None,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                }),
            }
        }

        fn invoice_id(&self) -> Uuid {
            self.invoice.lock().unwrap().id
        }

        fn snapshot(&self) -> Invoice {
            self.invoice.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl InvoiceStore for MemoryStore {
        async fn claim_for_processing(&self, id: Uuid) -> Result<Option<Invoice>> {
            let mut invoice = self.invoice.lock().unwrap();
            if invoice.id == id && invoice.status == InvoiceStatus::Pending {
                invoice.status = InvoiceStatus::Processing;
                Ok(Some(invoice.clone()))
            } else {
                Ok(None)
            }
        }

        async fn store_extraction(
            &self,
            id: Uuid,
            payload: &serde_json::Value,
            number: Option<&str>,
            date: Option<NaiveDate>,
            amount: f64,
            tax_amount: Option<f64>,
        ) -> Result<Option<Invoice>> {
            let mut invoice = self.invoice.lock().unwrap();
            if invoice.id == id && invoice.status == InvoiceStatus::Processing {
                invoice.status = InvoiceStatus::Review;
                invoice.extracted_data = Some(payload.clone());
                invoice.number = number.map(str::to_string);
                invoice.date = date;
                invoice.amount = Some(amount);
                invoice.tax_amount = tax_amount;
                invoice.error_message = None;
                Ok(Some(invoice.clone()))
            } else {
                Ok(None)
            }
        }

        async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<Option<Invoice>> {
            let mut invoice = self.invoice.lock().unwrap();
            if invoice.id == id && invoice.status == InvoiceStatus::Processing {
                invoice.status = InvoiceStatus::Failed;
                invoice.error_message = Some(error_message.to_string());
                Ok(Some(invoice.clone()))
            } else {
                Ok(None)
            }
        }
    }

    struct StubExtractor {
        outcome: Mutex<Option<Result<ExtractedInvoiceData, ExtractionError>>>,
        calls: AtomicUsize,
    }

    impl StubExtractor {
        fn with(outcome: Result<ExtractedInvoiceData, ExtractionError>) -> Self {
            Self {
                outcome: Mutex::new(Some(outcome)),
                calls: AtomicUsize::new(0),
            }
        }

        fn never_called() -> Self {
            Self {
                outcome: Mutex::new(None),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl InvoiceExtractor for StubExtractor {
        async fn extract(
            &self,
            _document_path: &Path,
            _credential: &str,
            _detailed_mode: bool,
        ) -> Result<ExtractedInvoiceData, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome
                .lock()
                .unwrap()
                .take()
                .expect("extractor invoked unexpectedly")
        }
    }

    fn sample_extraction() -> ExtractedInvoiceData {
        serde_json::from_value(json!({
            "invoice_number": "F-2024-0042",
            "total_amount": 40.0,
            "confidence": 0.9
        }))
        .unwrap()
    }

    fn job(invoice_id: Uuid) -> ProcessingJob {
        ProcessingJob {
            invoice_id,
            document_path: PathBuf::from("invoices/scan.pdf"),
            credential: "test-key".to_string(),
            detailed_mode: false,
        }
    }

    #[tokio::test]
    async fn test_successful_extraction_lands_in_review() {
        let store = Arc::new(MemoryStore::new(InvoiceStatus::Pending));
        let extractor = Arc::new(StubExtractor::with(Ok(sample_extraction())));
        let orchestrator = ExtractionOrchestrator::new(store.clone(), extractor.clone());

        orchestrator.run(job(store.invoice_id())).await;

        let invoice = store.snapshot();
        assert_eq!(invoice.status, InvoiceStatus::Review);
        assert!(invoice.extracted_data.is_some());
        assert_eq!(invoice.amount, Some(40.0));
        assert_eq!(invoice.number.as_deref(), Some("F-2024-0042"));
        assert_eq!(invoice.error_message, None);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_quota_records_normalized_failure() {
        let store = Arc::new(MemoryStore::new(InvoiceStatus::Pending));
        let extractor = Arc::new(StubExtractor::with(Err(ExtractionError::Exhausted {
            attempts: 4,
            last_error: "429 Too Many Requests".to_string(),
        })));
        let orchestrator = ExtractionOrchestrator::new(store.clone(), extractor);

        orchestrator.run(job(store.invoice_id())).await;

        let invoice = store.snapshot();
        assert_eq!(invoice.status, InvoiceStatus::Failed);
        assert_eq!(invoice.error_message.as_deref(), Some(QUOTA_MESSAGE));
        assert!(invoice.extracted_data.is_none());
    }

    #[tokio::test]
    async fn test_non_pending_invoice_is_skipped() {
        // Already claimed (or already reviewed): the run must not extract
        // or touch the row.
        let store = Arc::new(MemoryStore::new(InvoiceStatus::Review));
        let extractor = Arc::new(StubExtractor::never_called());
        let orchestrator = ExtractionOrchestrator::new(store.clone(), extractor.clone());

        orchestrator.run(job(store.invoice_id())).await;

        assert_eq!(store.snapshot().status, InvoiceStatus::Review);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_quota_errors_are_rewritten() {
        let normalized = normalize_error_message(
            "All 4 extraction models failed; last error: 429 Too Many Requests",
        );
        assert_eq!(normalized, QUOTA_MESSAGE);

        let normalized = normalize_error_message("RESOURCE_EXHAUSTED: quota exceeded");
        assert_eq!(normalized, QUOTA_MESSAGE);
    }

    #[test]
    fn test_other_errors_pass_through() {
        let normalized = normalize_error_message("connection reset by peer");
        assert_eq!(normalized, "connection reset by peer");
    }

    #[test]
    fn test_long_errors_are_bounded() {
        let long = "x".repeat(2000);
        let normalized = normalize_error_message(&long);
        assert_eq!(normalized.chars().count(), MAX_ERROR_MESSAGE_LEN);
    }
}
