//! Invoice processing pipeline: ingestion, extraction orchestration,
//! operator workflow and approval.
//!
//! The pipeline is a small state machine over invoice rows. Uploads enter in
//! PENDING, a spawned orchestrator run moves them to REVIEW or FAILED, and an
//! operator either approves (materializing the maintenance records), rejects
//! for a detailed re-extraction, or retries a failure.

pub mod approval;
pub mod error;
pub mod ingest;
pub mod orchestrator;
pub mod setup;
pub mod workflow;

pub use approval::ApprovalEngine;
pub use error::PipelineError;
pub use ingest::IngestService;
pub use orchestrator::{ExtractionOrchestrator, InvoiceStore};
pub use setup::{setup_pipeline, Pipeline};
pub use workflow::{resolve_credential, ProcessingJob, WorkflowController};
