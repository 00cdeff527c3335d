//! Wiring: build the full pipeline from configuration.

use anyhow::{Context, Result};
use paddock_core::PipelineConfig;
use paddock_db::{setup_database, InvoiceRepository};
use paddock_extraction::GeminiClient;
use paddock_storage::{DocumentStore, LocalDocumentStore};
use std::sync::Arc;
use std::time::Duration;

use crate::approval::ApprovalEngine;
use crate::ingest::IngestService;
use crate::orchestrator::ExtractionOrchestrator;
use crate::workflow::WorkflowController;

/// The assembled pipeline services, sharing one pool and one store.
#[derive(Clone)]
pub struct Pipeline {
    pub ingest: IngestService,
    pub workflow: WorkflowController,
    pub approval: ApprovalEngine,
    pub invoices: InvoiceRepository,
}

/// Connect, migrate and wire every service from configuration.
pub async fn setup_pipeline(config: &PipelineConfig) -> Result<Pipeline> {
    let pool = setup_database(&config.database_url).await?;

    let store: Arc<dyn DocumentStore> = Arc::new(
        LocalDocumentStore::new(
            config.upload_dir.clone(),
            config.upload_base_url.clone(),
            config.max_document_size_bytes,
            config.allowed_extensions.clone(),
        )
        .await
        .context("Failed to initialize document store")?,
    );

    let extractor = Arc::new(GeminiClient::new(
        config.extraction_models.clone(),
        Duration::from_secs(config.request_timeout_secs),
    ));

    let invoices = InvoiceRepository::new(pool.clone());
    let orchestrator = Arc::new(ExtractionOrchestrator::new(
        Arc::new(invoices.clone()),
        extractor,
    ));

    Ok(Pipeline {
        ingest: IngestService::new(
            Arc::clone(&store),
            invoices.clone(),
            Arc::clone(&orchestrator),
            config.default_api_key.clone(),
        ),
        workflow: WorkflowController::new(
            invoices.clone(),
            Arc::clone(&store),
            orchestrator,
            config.default_api_key.clone(),
        ),
        approval: ApprovalEngine::new(pool, store),
        invoices,
    })
}
