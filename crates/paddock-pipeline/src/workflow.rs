//! Operator-facing workflow operations: reject, retry and review edits.

use paddock_core::{Invoice, InvoiceStatus, ReviewEdit};
use paddock_db::InvoiceRepository;
use paddock_storage::DocumentStore;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::orchestrator::ExtractionOrchestrator;

/// One unit of extraction work handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    pub invoice_id: Uuid,
    pub document_path: PathBuf,
    pub credential: String,
    /// Detailed mode re-runs the extraction with the stricter prompt; set
    /// after an operator reject.
    pub detailed_mode: bool,
}

/// Pick the credential an extraction run should use: the operator's own key
/// when provided, otherwise the server default. No key at all is a
/// deployment problem, not a processing failure.
pub fn resolve_credential(
    operator_key: Option<&str>,
    default_key: Option<&str>,
) -> Result<String, PipelineError> {
    operator_key
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .or_else(|| default_key.map(str::trim).filter(|k| !k.is_empty()))
        .map(str::to_string)
        .ok_or_else(|| {
            PipelineError::Configuration(
                "No extraction credential available: provide an operator key or configure a server default".to_string(),
            )
        })
}

/// Operator workflow over reviewed and failed invoices.
#[derive(Clone)]
pub struct WorkflowController {
    invoices: InvoiceRepository,
    store: Arc<dyn DocumentStore>,
    orchestrator: Arc<ExtractionOrchestrator>,
    default_credential: Option<String>,
}

impl WorkflowController {
    pub fn new(
        invoices: InvoiceRepository,
        store: Arc<dyn DocumentStore>,
        orchestrator: Arc<ExtractionOrchestrator>,
        default_credential: Option<String>,
    ) -> Self {
        Self {
            invoices,
            store,
            orchestrator,
            default_credential,
        }
    }

    /// Reject a reviewed extraction and reprocess in detailed mode
    /// (REVIEW -> PENDING).
    pub async fn reject_for_reprocess(
        &self,
        id: Uuid,
        operator_key: Option<&str>,
    ) -> Result<Invoice, PipelineError> {
        self.requeue_and_spawn(id, InvoiceStatus::Review, operator_key, true)
            .await
    }

    /// Retry a failed extraction with the normal prompt (FAILED -> PENDING).
    pub async fn retry_failed(
        &self,
        id: Uuid,
        operator_key: Option<&str>,
    ) -> Result<Invoice, PipelineError> {
        self.requeue_and_spawn(id, InvoiceStatus::Failed, operator_key, false)
            .await
    }

    async fn requeue_and_spawn(
        &self,
        id: Uuid,
        from: InvoiceStatus,
        operator_key: Option<&str>,
        detailed_mode: bool,
    ) -> Result<Invoice, PipelineError> {
        // Resolve the credential up front so a misconfigured deployment
        // fails the request instead of leaving a PENDING invoice stuck.
        let credential = resolve_credential(operator_key, self.default_credential.as_deref())?;

        let invoice = self
            .invoices
            .get(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("Invoice {}", id)))?;

        if invoice.status != from {
            return Err(PipelineError::InvalidTransition {
                from: invoice.status,
                to: InvoiceStatus::Pending,
            });
        }

        // The guarded UPDATE may still lose a race with another operator.
        let requeued =
            self.invoices
                .requeue(id, from)
                .await?
                .ok_or(PipelineError::InvalidTransition {
                    from,
                    to: InvoiceStatus::Pending,
                })?;

        tracing::info!(
            invoice_id = %id,
            from = %from,
            detailed_mode,
            "Invoice requeued for extraction"
        );

        let job = ProcessingJob {
            invoice_id: id,
            document_path: self.store.resolve_path(&requeued.file_path)?,
            credential,
            detailed_mode,
        };
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move { orchestrator.run(job).await });

        Ok(requeued)
    }

    /// Apply an operator correction to a reviewed invoice's headline fields.
    /// The stored extraction payload and the status are untouched.
    pub async fn edit_review(&self, id: Uuid, edit: ReviewEdit) -> Result<Invoice, PipelineError> {
        if edit.is_empty() {
            return Err(PipelineError::InvalidPayload(
                "Edit contains no fields".to_string(),
            ));
        }

        match self.invoices.update_review_fields(id, &edit).await? {
            Some(invoice) => Ok(invoice),
            None => match self.invoices.get(id).await? {
                None => Err(PipelineError::NotFound(format!("Invoice {}", id))),
                Some(invoice) => Err(PipelineError::InvalidPayload(format!(
                    "Invoice in status {} cannot be edited; only invoices under review can",
                    invoice.status
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_key_wins_over_default() {
        let credential = resolve_credential(Some("operator-key"), Some("server-key")).unwrap();
        assert_eq!(credential, "operator-key");
    }

    #[test]
    fn test_falls_back_to_server_default() {
        let credential = resolve_credential(None, Some("server-key")).unwrap();
        assert_eq!(credential, "server-key");

        // Blank operator keys do not count
        let credential = resolve_credential(Some("   "), Some("server-key")).unwrap();
        assert_eq!(credential, "server-key");
    }

    #[test]
    fn test_no_credential_is_a_configuration_error() {
        assert!(matches!(
            resolve_credential(None, None),
            Err(PipelineError::Configuration(_))
        ));
        assert!(matches!(
            resolve_credential(Some(""), Some("  ")),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn test_credential_is_trimmed() {
        let credential = resolve_credential(Some("  key  "), None).unwrap();
        assert_eq!(credential, "key");
    }
}
